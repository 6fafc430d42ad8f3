use std::{collections::BTreeMap, path::PathBuf};

use rand::{seq::SliceRandom, thread_rng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::utils::write_atomic;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (iPad; CPU OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8 Build/UQ1A.240205.004; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/127.0.6533.103 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 13; SM-S918B Build/TP1A.220624.014; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/127.0.6533.64 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 12; M2101K20G Build/SKQ1.211006.001; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/126.0.6478.134 Mobile Safari/537.36",
];

/// User agents chosen per account address, persisted so an account keeps
/// the same browser identity between runs.
pub struct SessionAgents {
    path: PathBuf,
    agents: BTreeMap<String, String>,
}

impl SessionAgents {
    pub async fn load(path: PathBuf) -> eyre::Result<Self> {
        let agents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, agents })
    }

    pub fn get(&self, address: &str) -> Option<&str> {
        self.agents.get(address).map(String::as_str)
    }

    /// Returns `true` when a new agent had to be picked.
    pub fn ensure(&mut self, address: &str) -> bool {
        if self.agents.contains_key(address) {
            return false;
        }
        let agent = random_user_agent();
        tracing::info!(%address, "Created user agent");
        self.agents.insert(address.to_string(), agent.to_string());
        true
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.agents
    }

    pub async fn save(&self) -> eyre::Result<()> {
        let json = serde_json::to_string_pretty(&self.agents)?;
        write_atomic(&self.path, json.as_bytes()).await
    }
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub fn platform(user_agent: &str) -> &'static str {
    let lower = user_agent.to_ascii_lowercase();
    if lower.contains("iphone") || lower.contains("ipad") {
        "ios"
    } else if lower.contains("android") {
        "android"
    } else {
        "Unknown"
    }
}

/// Browser-like header set for one account, built once and reused for every
/// request that account makes.
pub fn account_headers(user_agent: &str) -> HeaderMap {
    let platform = platform(user_agent);
    let mut headers = HeaderMap::new();

    headers.insert(
        HeaderName::from_static("accept"),
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        HeaderName::from_static("accept-language"),
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        HeaderName::from_static("origin"),
        HeaderValue::from_static("https://app.sogni.ai"),
    );
    headers.insert(
        HeaderName::from_static("referer"),
        HeaderValue::from_static("https://app.sogni.ai/"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-site"),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static("?1"),
    );

    let sec_ch_ua = format!(
        "\"Not)A;Brand\";v=\"99\", \"{platform} WebView\";v=\"127\", \"Chromium\";v=\"127\""
    );
    if let Ok(value) = HeaderValue::from_str(&sec_ch_ua) {
        headers.insert(HeaderName::from_static("sec-ch-ua"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{platform}\"")) {
        headers.insert(HeaderName::from_static("sec-ch-ua-platform"), value);
    }
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(reqwest::header::USER_AGENT, value);
    }

    headers
}
