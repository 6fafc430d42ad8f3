use std::time::Duration;

// FILES
pub const CONFIG_FILE_PATH: &str = "data/config.toml";
pub const ACCOUNTS_FILE_PATH: &str = "data/data.txt";
pub const PROXIES_FILE_PATH: &str = "data/proxy.txt";
pub const TOKENS_FILE_PATH: &str = "data/tokens.json";
pub const USER_AGENTS_FILE_PATH: &str = "data/session_user_agents.json";
pub const LOG_DIR: &str = "logs";

pub const DEFAULT_IP_CHECK_URL: &str = "https://api.ipify.org?format=json";
pub const DEFAULT_MODELS_URL: &str = "https://socket.sogni.ai/api/v1/models/list";
pub const APP_ID: &str = "998e8a7f-e2e3-490f-9a0a-9e10684ac601";

// Recurring daily boost, only inspected for its next claim window.
pub const DAILY_BOOST_TASK_ID: &str = "2";

pub const WORKER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
