use std::time::Duration;

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::{
    client::{ApiClient, ApiResponse},
    constants::APP_ID,
    error::RequestError,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardTask {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(default)]
    pub can_claim: i64,
    #[serde(default)]
    pub claim_reset_frequency_sec: i64,
    #[serde(default)]
    pub last_claim_timestamp: Option<i64>,
}

impl RewardTask {
    /// One-shot rewards that can be claimed right now.
    pub fn is_claimable(&self) -> bool {
        self.can_claim > 0 && self.claim_reset_frequency_sec <= 0
    }

    /// Time left until a recurring reward can be claimed again.
    pub fn next_claim_in(&self, now_unix: i64) -> Option<Duration> {
        let last = self.last_claim_timestamp.filter(|t| *t > 0)?;
        if self.claim_reset_frequency_sec <= 0 {
            return None;
        }
        let remaining = last + self.claim_reset_frequency_sec - now_unix;
        (remaining > 0).then(|| Duration::from_secs(remaining as u64))
    }
}

#[derive(Debug, Deserialize)]
struct Rewards {
    #[serde(default)]
    rewards: Vec<RewardTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub rank: Value,
}

#[derive(Debug, Deserialize)]
struct Transactions {
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    amount: Value,
}

#[derive(Debug, Deserialize)]
struct Balance {
    #[serde(default)]
    token: Value,
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    ip: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

/// Numbers sometimes arrive as strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, RequestError> {
    serde_json::from_value(response.data).map_err(|e| RequestError::Decode(e.to_string()))
}

impl ApiClient {
    async fn get(&mut self, path: &str) -> Result<ApiResponse, RequestError> {
        let url = self.url(path);
        let options = self.options();
        self.request(Method::GET, &url, None, options).await
    }

    async fn post(&mut self, path: &str, body: Value, is_auth: bool) -> Result<ApiResponse, RequestError> {
        let url = self.url(path);
        let options = if is_auth {
            self.auth_options()
        } else {
            self.options()
        };
        self.request(Method::POST, &url, Some(body), options).await
    }

    /// Outbound IP as seen by the outside world, through the account's proxy.
    pub async fn check_ip(&mut self) -> Result<String, RequestError> {
        let options = self.auth_options();
        let url = self.config.ip_check_url.clone();
        let response = self.request(Method::GET, &url, None, options).await?;
        Ok(decode::<IpInfo>(response)?.ip)
    }

    pub async fn get_nonce(&mut self) -> Result<String, RequestError> {
        let address = self.address().to_string();
        let response = self
            .post("/v1/account/nonce", json!({ "walletAddress": address }), true)
            .await?;
        match response.data {
            Value::String(nonce) => Ok(nonce),
            Value::Object(map) => map
                .get("nonce")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RequestError::Decode("nonce missing from response".into())),
            other => Err(RequestError::Decode(format!("unexpected nonce payload: {other}"))),
        }
    }

    pub async fn validate_user(&mut self, username: &str) -> Result<ApiResponse, RequestError> {
        self.post("/v1/account/create", json!({ "username": username }), true)
            .await
    }

    /// Wallet signatures are produced elsewhere; the payload carries an empty one.
    pub async fn register(&mut self, username: &str, email: &str) -> Result<ApiResponse, RequestError> {
        self.get_nonce().await.map_err(|e| match e {
            RequestError::Unauthorized => e,
            other => RequestError::Decode(format!("can't get nonce: {other}")),
        })?;

        let payload = json!({
            "appid": APP_ID,
            "username": username,
            "email": email,
            "subscribe": 1,
            "walletAddress": self.address(),
            "referralCode": self.config.ref_code,
            "signature": "",
        });
        self.post("/v1/account/create", payload, true).await
    }

    pub async fn get_profile(&mut self) -> Result<ApiResponse, RequestError> {
        self.get("/profile").await
    }

    pub async fn get_rewards(&mut self) -> Result<Vec<RewardTask>, RequestError> {
        let response = self.get("/v2/account/rewards").await?;
        Ok(decode::<Rewards>(response)?.rewards)
    }

    pub async fn claim_reward(&mut self, task_id: &str) -> Result<ApiResponse, RequestError> {
        self.post("/v2/account/rewards/claim", json!({ "claims": [task_id] }), false)
            .await
    }

    pub async fn get_leaderboard(&mut self) -> Result<Vec<LeaderboardEntry>, RequestError> {
        let path = format!(
            "/v1/leaderboard/?type=renderTokenCompleteArtist&period=lifetime&address={}",
            self.address()
        );
        let response = self.get(&path).await?;
        decode(response)
    }

    /// Sum of the amounts of completed transactions.
    pub async fn get_transactions_total(&mut self) -> Result<f64, RequestError> {
        let path = format!(
            "/v1/transactions/list?status=completed&address={}&limit=50",
            self.address()
        );
        let response = self.get(&path).await?;
        let transactions = decode::<Transactions>(response)?.transactions;
        Ok(transactions.iter().filter_map(|t| as_f64(&t.amount)).sum())
    }

    pub async fn get_balance(&mut self) -> Result<f64, RequestError> {
        let path = format!("/v1/wallet/balance?walletAddress={}", self.address());
        let response = self.get(&path).await?;
        Ok(as_f64(&decode::<Balance>(response)?.token).unwrap_or_default())
    }
}

/// Number of models listed by the render network, used as a liveness probe.
pub async fn get_models(http: &reqwest::Client, url: &str) -> eyre::Result<usize> {
    let body: Value = http.get(url).send().await?.error_for_status()?.json().await?;
    let models = body.get("data").unwrap_or(&body);
    Ok(match models {
        Value::Array(list) => list.len(),
        Value::Object(map) => map
            .get("models")
            .and_then(Value::as_array)
            .map_or(map.len(), Vec::len),
        _ => 0,
    })
}
