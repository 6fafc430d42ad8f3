use serde::Deserialize;
use std::{path::Path, time::Duration};

use crate::constants::{CONFIG_FILE_PATH, DEFAULT_IP_CHECK_URL, DEFAULT_MODELS_URL};

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Config {
    pub use_proxy: bool,
    pub max_threads: usize,
    pub max_threads_no_proxy: usize,
    pub delay_between_requests: u64,
    pub delay_start_bot: [u64; 2],
    /// Minutes between two passes over the account list.
    pub time_sleep: u64,
    pub enable_debug: bool,
    pub ref_code: String,
    pub api_endpoints: Vec<String>,
    pub models_url: String,
    /// Echo service returning `{"ip": ...}`, queried through each proxy.
    pub ip_check_url: String,
    pub rate_limit_cooldown: u64,
    pub request_retries: usize,
    pub request_timeout: u64,
    pub delay_between_batches: u64,
    pub delay_between_claims: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_proxy: false,
            max_threads: 10,
            max_threads_no_proxy: 5,
            delay_between_requests: 3,
            delay_start_bot: [1, 15],
            time_sleep: 1440,
            enable_debug: false,
            ref_code: String::new(),
            api_endpoints: vec![],
            models_url: DEFAULT_MODELS_URL.to_string(),
            ip_check_url: DEFAULT_IP_CHECK_URL.to_string(),
            rate_limit_cooldown: 60,
            request_retries: 1,
            request_timeout: 30,
            delay_between_batches: 3,
            delay_between_claims: 1,
        }
    }
}

impl Config {
    async fn read_from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let cfg_str = tokio::fs::read_to_string(path).await?;
        Self::parse(&cfg_str)
    }

    pub async fn read_default() -> eyre::Result<Self> {
        Self::read_from_file(CONFIG_FILE_PATH).await
    }

    pub fn parse(cfg_str: &str) -> eyre::Result<Self> {
        let config: Self = toml::from_str(cfg_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        let [min, max] = self.delay_start_bot;
        if min > max {
            eyre::bail!("DELAY_START_BOT lower bound {min} exceeds upper bound {max}");
        }
        if self.max_threads == 0 || self.max_threads_no_proxy == 0 {
            eyre::bail!("MAX_THREADS and MAX_THREADS_NO_PROXY must be at least 1");
        }
        if self.api_endpoints.is_empty() {
            eyre::bail!("API_ENDPOINTS must list at least one base url");
        }
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        if self.use_proxy {
            self.max_threads
        } else {
            self.max_threads_no_proxy
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.delay_between_requests)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown)
    }

    pub fn cycle_sleep(&self) -> Duration {
        Duration::from_secs(self.time_sleep.saturating_mul(60))
    }
}
