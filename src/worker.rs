use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand::{thread_rng, Rng};
use tracing::{field, Instrument, Span};

use crate::{
    api::RewardTask,
    client::ApiClient,
    config::Config,
    constants::DAILY_BOOST_TASK_ID,
    error::{RequestError, WorkerError},
    token_store::{TokenPair, TokenStoreHandle},
    user_agent::account_headers,
    utils::Account,
};

/// Everything one worker needs, owned, so workers share nothing mutable.
#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub account: Account,
    pub proxy: Option<String>,
    pub tokens: TokenPair,
    pub user_agent: String,
}

#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub base_url: String,
    pub store: TokenStoreHandle,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub account_index: usize,
    pub error: Option<String>,
    pub fatal: bool,
}

impl WorkerResult {
    pub fn failed(account_index: usize, error: impl Into<String>) -> Self {
        Self {
            account_index,
            error: Some(error.into()),
            fatal: false,
        }
    }

    fn from_outcome(account_index: usize, outcome: Result<(), WorkerError>) -> Self {
        match outcome {
            Ok(()) => Self {
                account_index,
                error: None,
                fatal: false,
            },
            Err(e) => Self {
                account_index,
                fatal: e.is_fatal(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Never fails: every error, including the hard timeout, ends up in the result.
pub async fn run_worker(job: Job, ctx: WorkerContext) -> WorkerResult {
    let index = job.index;
    let span = tracing::info_span!(
        "account",
        index = index + 1,
        address = %job.account.address,
        ip = field::Empty,
    );

    let outcome = match tokio::time::timeout(ctx.timeout, run_account(job, &ctx))
        .instrument(span.clone())
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(WorkerError::Timeout),
    };

    span.in_scope(|| match &outcome {
        Err(e) if e.is_fatal() => tracing::error!("Stopping: {e}"),
        Err(e) => tracing::warn!("Skipping account: {e}"),
        Ok(()) => tracing::debug!("Account done"),
    });

    WorkerResult::from_outcome(index, outcome)
}

async fn run_account(job: Job, ctx: &WorkerContext) -> Result<(), WorkerError> {
    let config = &ctx.config;
    let mut client = ApiClient::new(
        job.account,
        ctx.base_url.clone(),
        job.tokens,
        account_headers(&job.user_agent),
        job.proxy.as_deref(),
        ctx.store.clone(),
        config.clone(),
    )
    .map_err(|e| match e {
        RequestError::InvalidProxy(_) => WorkerError::ProxyResolution(e.to_string()),
        other => other.into(),
    })?;

    let ip = resolve_ip(&mut client).await?;
    Span::current().record("ip", ip.as_str());

    let [min, max] = config.delay_start_bot;
    let jitter = thread_rng().gen_range(min..=max);
    if jitter > 0 {
        tracing::info!("Starting in {jitter}s...");
        tokio::time::sleep(Duration::from_secs(jitter)).await;
    }

    client
        .get_valid_token(false, false)
        .await
        .ok_or(WorkerError::TokenExhausted)?;

    sync_account(&mut client).await?;
    handle_tasks(&mut client, config).await
}

/// Outbound IP through the account's proxy, or `local` without proxies.
async fn resolve_ip(client: &mut ApiClient) -> Result<String, WorkerError> {
    if !client.config.use_proxy {
        return Ok("local".into());
    }
    client
        .check_ip()
        .await
        .map_err(|e| WorkerError::ProxyResolution(e.to_string()))
}

/// Keeps a fatal auth failure as the worker's error and hands everything
/// else back to the caller.
fn escalate<T>(result: Result<T, RequestError>) -> Result<Result<T, RequestError>, WorkerError> {
    match result {
        Err(RequestError::Unauthorized) => Err(RequestError::Unauthorized.into()),
        other => Ok(other),
    }
}

async fn sync_account(client: &mut ApiClient) -> Result<(), WorkerError> {
    let total = escalate(client.get_transactions_total().await)?.unwrap_or_else(|e| {
        tracing::warn!("Can't load transactions: {e}");
        0.0
    });

    let mut leaderboard = escalate(client.get_leaderboard().await)?;
    if let Err(e) = &leaderboard {
        if e.status() != Some(400) {
            leaderboard = escalate(client.get_leaderboard().await)?;
        }
    }

    let balance = escalate(client.get_balance().await)?;

    let (entries, wallet) = match (leaderboard, balance) {
        (Ok(entries), Ok(wallet)) => (entries, wallet),
        (Err(e), _) | (_, Err(e)) => return Err(WorkerError::Sync(e.to_string())),
    };

    let entry = entries.first();
    let name = entry
        .and_then(|e| e.username.as_deref())
        .unwrap_or("Unknown");
    let rank = entry
        .map(|e| e.rank.to_string())
        .unwrap_or_else(|| "null".into());
    let account_balance = if total > 0.0 {
        format!("{:.4}", total - wallet)
    } else {
        "Updating".into()
    };

    tracing::info!(
        "Name: {name} | Account balance: {account_balance} | Wallet balance: {wallet} | Rank: {rank}"
    );
    Ok(())
}

fn log_daily_boost(tasks: &[RewardTask]) {
    let Some(boost) = tasks.iter().find(|t| t.id == DAILY_BOOST_TASK_ID) else {
        return;
    };
    if let Some(left) = boost.next_claim_in(Utc::now().timestamp()) {
        let secs = left.as_secs();
        tracing::info!("Next daily boost in {}h {}m", secs / 3600, (secs % 3600) / 60);
    }
}

async fn handle_tasks(client: &mut ApiClient, config: &Config) -> Result<(), WorkerError> {
    let tasks = escalate(client.get_rewards().await)??;

    log_daily_boost(&tasks);

    let claimable: Vec<&RewardTask> = tasks.iter().filter(|t| t.is_claimable()).collect();
    if claimable.is_empty() {
        tracing::warn!("No tasks available!");
        return Ok(());
    }

    for task in claimable {
        tokio::time::sleep(Duration::from_secs(config.delay_between_claims)).await;

        match escalate(client.claim_reward(&task.id).await)? {
            Ok(_) => tracing::info!(
                "Claim task {} | {} success | Reward: {}",
                task.id,
                task.title,
                task.amount
            ),
            Err(e) => {
                tracing::warn!("Can't claim task {} | {} | {e}", task.id, task.title);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        client::test_support::{fast_config, test_store},
        jwt::test_support::{in_hours, make_token},
        mock_api::MockApi,
    };

    const CLAIM_PATH: &str = "/v2/account/rewards/claim";

    fn job(access_hours: i64, refresh_hours: i64) -> Job {
        Job {
            index: 0,
            account: Account {
                address: "0xa".into(),
                refresh_token: make_token("0xa", in_hours(refresh_hours)),
            },
            proxy: None,
            tokens: TokenPair {
                token: Some(make_token("0xa", in_hours(access_hours))),
                refresh_token: None,
            },
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X)".into(),
        }
    }

    async fn context(mock: &MockApi, dir: &tempfile::TempDir, config: Config) -> WorkerContext {
        WorkerContext {
            config: Arc::new(config),
            base_url: mock.url(),
            store: test_store(dir).await,
            timeout: Duration::from_secs(30),
        }
    }

    fn healthy_sync(mock: &MockApi) {
        mock.respond(
            "/v1/transactions/list",
            200,
            json!({ "data": { "transactions": [{ "amount": "12.5" }] } }),
        );
        mock.respond(
            "/v1/leaderboard/",
            200,
            json!({ "data": [{ "username": "alice", "value": 1, "rank": 5 }] }),
        );
        mock.respond("/v1/wallet/balance", 200, json!({ "data": { "token": 2.5 } }));
    }

    #[tokio::test]
    async fn one_shot_task_is_claimed_once() {
        let mock = MockApi::start().await;
        healthy_sync(&mock);
        mock.respond(
            "/v2/account/rewards",
            200,
            json!({ "data": { "rewards": [
                { "id": "1", "title": "Welcome", "amount": "100", "canClaim": 2, "claimResetFrequencySec": 0 },
                { "id": "2", "title": "Daily boost", "amount": "10", "canClaim": 1,
                  "claimResetFrequencySec": 86400, "lastClaimTimestamp": Utc::now().timestamp() - 60 }
            ] } }),
        );
        mock.respond(CLAIM_PATH, 200, json!({ "data": { "ok": true } }));
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, fast_config()).await;

        let result = run_worker(job(1, 24), ctx).await;

        assert_eq!(result.error, None);
        assert_eq!(mock.hits(CLAIM_PATH), 1);
        assert_eq!(mock.requests(CLAIM_PATH)[0].body, json!({ "claims": ["1"] }));
    }

    #[tokio::test]
    async fn first_claim_failure_stops_remaining_claims() {
        let mock = MockApi::start().await;
        healthy_sync(&mock);
        mock.respond(
            "/v2/account/rewards",
            200,
            json!({ "data": { "rewards": [
                { "id": "1", "title": "A", "amount": "1", "canClaim": 1, "claimResetFrequencySec": 0 },
                { "id": "3", "title": "B", "amount": "1", "canClaim": 1, "claimResetFrequencySec": 0 }
            ] } }),
        );
        mock.respond(CLAIM_PATH, 500, json!({ "error": "nope" }));
        let config = Config {
            request_retries: 0,
            ..fast_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, config).await;

        let result = run_worker(job(1, 24), ctx).await;

        assert_eq!(result.error, None);
        assert_eq!(mock.hits(CLAIM_PATH), 1);
    }

    #[tokio::test]
    async fn exhausted_tokens_skip_the_account() {
        let mock = MockApi::start().await;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, fast_config()).await;

        let result = run_worker(job(-2, -1), ctx).await;

        assert!(!result.fatal);
        assert!(result.error.is_some());
        assert_eq!(mock.total_hits(), 0);
    }

    #[tokio::test]
    async fn leaderboard_is_retried_once_unless_bad_request() {
        let mock = MockApi::start().await;
        healthy_sync(&mock);
        mock.enqueue("/v1/leaderboard/", 503, json!({ "error": "busy" }));
        mock.respond("/v2/account/rewards", 200, json!({ "data": { "rewards": [] } }));
        let config = Config {
            request_retries: 0,
            ..fast_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, config.clone()).await;

        let result = run_worker(job(1, 24), ctx).await;
        assert_eq!(result.error, None);
        assert_eq!(mock.hits("/v1/leaderboard/"), 2);

        let mock = MockApi::start().await;
        healthy_sync(&mock);
        mock.respond("/v1/leaderboard/", 400, json!({ "error": "old client" }));
        let ctx = context(&mock, &dir, config).await;

        let result = run_worker(job(1, 24), ctx).await;
        assert!(result.error.unwrap().contains("sync"));
        assert_eq!(mock.hits("/v1/leaderboard/"), 1);
        assert_eq!(mock.hits("/v2/account/rewards"), 0);
    }

    #[tokio::test]
    async fn unrecoverable_auth_is_fatal() {
        let mock = MockApi::start().await;
        mock.respond("/v1/transactions/list", 401, json!({ "error": "expired" }));
        mock.respond("/v1/account/refresh-token", 401, json!({ "error": "revoked" }));
        let config = Config {
            request_retries: 0,
            ..fast_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, config).await;

        let result = run_worker(job(1, 24), ctx).await;

        assert!(result.fatal);
        assert_eq!(mock.hits("/v1/account/refresh-token"), 1);
        assert_eq!(mock.hits("/v1/leaderboard/"), 0);
    }

    fn proxied(proxy: &str) -> Job {
        Job {
            proxy: Some(proxy.into()),
            ..job(1, 24)
        }
    }

    fn proxy_config() -> Config {
        Config {
            use_proxy: true,
            request_retries: 0,
            // Unresolvable host: only reachable through the proxy.
            ip_check_url: "http://ip-echo.invalid/ip".into(),
            ..fast_config()
        }
    }

    #[tokio::test]
    async fn requests_go_through_the_account_proxy() {
        let mock = MockApi::start().await;
        healthy_sync(&mock);
        mock.respond("/ip", 200, json!({ "ip": "203.0.113.7" }));
        mock.respond("/v2/account/rewards", 200, json!({ "data": { "rewards": [] } }));
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, proxy_config()).await;

        let job = proxied(&mock.url());
        let mut client = ApiClient::new(
            job.account.clone(),
            ctx.base_url.clone(),
            job.tokens.clone(),
            account_headers(&job.user_agent),
            job.proxy.as_deref(),
            ctx.store.clone(),
            ctx.config.clone(),
        )
        .unwrap();
        assert_eq!(resolve_ip(&mut client).await.unwrap(), "203.0.113.7");

        let result = run_worker(job, ctx).await;
        assert_eq!(result.error, None);
        assert_eq!(mock.hits("/ip"), 2);
        assert_eq!(mock.hits("/v2/account/rewards"), 1);
    }

    #[tokio::test]
    async fn unreachable_proxy_ends_the_worker_early() {
        let mock = MockApi::start().await;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, proxy_config()).await;

        let result = run_worker(proxied("http://127.0.0.1:1"), ctx).await;

        assert!(!result.fatal);
        assert!(result.error.unwrap().starts_with("cannot check proxy IP"));
        assert_eq!(mock.total_hits(), 0);
    }

    #[tokio::test]
    async fn malformed_proxy_is_a_proxy_failure() {
        let mock = MockApi::start().await;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&mock, &dir, proxy_config()).await;

        let result = run_worker(proxied("::not a url::"), ctx).await;

        assert!(!result.fatal);
        let error = result.error.unwrap();
        assert!(error.starts_with("cannot check proxy IP"), "{error}");
        assert!(error.contains("invalid proxy"), "{error}");
        assert_eq!(mock.total_hits(), 0);
    }

    #[tokio::test]
    async fn hard_timeout_is_reported() {
        let mock = MockApi::start().await;
        let config = Config {
            delay_start_bot: [5, 5],
            ..fast_config()
        };
        let dir = tempfile::tempdir().unwrap();
        let ctx = WorkerContext {
            timeout: Duration::from_millis(50),
            ..context(&mock, &dir, config).await
        };

        let result = run_worker(job(1, 24), ctx).await;

        assert_eq!(result.error.as_deref(), Some("worker timed out"));
        assert!(!result.fatal);
    }
}
