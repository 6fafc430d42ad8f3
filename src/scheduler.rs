use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use tokio::task::JoinSet;

use crate::{
    config::Config,
    token_store::TokenStoreHandle,
    utils::{write_refresh_tokens, Account},
    worker::{run_worker, Job, WorkerContext, WorkerResult},
};

/// Runs `jobs` in sequential batches of at most `max_concurrency` workers.
///
/// A batch only ends once every worker in it has reported, crashed or timed
/// out. Stops early after a batch that produced a fatal result.
pub async fn run_cycle<F, Fut>(
    jobs: Vec<Job>,
    max_concurrency: usize,
    batch_pause: Duration,
    worker: F,
) -> Vec<WorkerResult>
where
    F: Fn(Job) -> Fut,
    Fut: Future<Output = WorkerResult> + Send + 'static,
{
    let batch_size = max_concurrency.max(1);
    let mut results = Vec::with_capacity(jobs.len());
    let mut jobs = jobs.into_iter().peekable();

    while jobs.peek().is_some() {
        let mut handles = JoinSet::new();
        let mut indices = HashMap::new();

        for job in jobs.by_ref().take(batch_size) {
            let index = job.index;
            let handle = handles.spawn(worker(job));
            indices.insert(handle.id(), index);
        }

        while let Some(joined) = handles.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let index = indices.get(&e.id()).copied().unwrap_or_default();
                    tracing::error!("Worker for account {} crashed: {e}", index + 1);
                    WorkerResult::failed(index, format!("worker crashed: {e}"))
                }
            };
            tracing::debug!(?result, "Worker finished");
            results.push(result);
        }

        if results.iter().any(|r| r.fatal) {
            break;
        }
        if jobs.peek().is_some() {
            tokio::time::sleep(batch_pause).await;
        }
    }

    results
}

pub struct Scheduler {
    accounts: Vec<Account>,
    proxies: Vec<String>,
    user_agents: BTreeMap<String, String>,
    store: TokenStoreHandle,
    config: Arc<Config>,
    base_url: String,
    accounts_path: PathBuf,
    worker_timeout: Duration,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Vec<Account>,
        proxies: Vec<String>,
        user_agents: BTreeMap<String, String>,
        store: TokenStoreHandle,
        config: Arc<Config>,
        base_url: String,
        accounts_path: PathBuf,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            proxies,
            user_agents,
            store,
            config,
            base_url,
            accounts_path,
            worker_timeout,
        }
    }

    /// Loops until a worker hits an unrecoverable auth failure or `shutdown`
    /// resolves. Only the former is an error.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> eyre::Result<()> {
        tokio::select! {
            result = self.run_forever() => result,
            _ = shutdown => {
                tracing::info!("Shutdown requested, stopping");
                Ok(())
            }
        }
    }

    async fn run_forever(&self) -> eyre::Result<()> {
        loop {
            self.run_once().await?;

            let minutes = self.config.time_sleep;
            tracing::info!(
                "{} | Completed all accounts | Waiting {minutes} minutes",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            tokio::time::sleep(self.config.cycle_sleep()).await;
        }
    }

    /// One full pass over every account with freshly reloaded tokens.
    pub async fn run_once(&self) -> eyre::Result<Vec<WorkerResult>> {
        if let Err(e) = self.store.reload().await {
            tracing::warn!("Can't reload tokens, using cached ones: {e:#}");
        }

        let jobs = self.jobs().await?;
        let ctx = WorkerContext {
            config: self.config.clone(),
            base_url: self.base_url.clone(),
            store: self.store.clone(),
            timeout: self.worker_timeout,
        };
        let pause = Duration::from_secs(self.config.delay_between_batches);

        let results = run_cycle(jobs, self.config.max_concurrency(), pause, |job| {
            run_worker(job, ctx.clone())
        })
        .await;

        if let Some(fatal) = results.iter().find(|r| r.fatal) {
            eyre::bail!(
                "Account {} can't authenticate: {}",
                fatal.account_index + 1,
                fatal.error.as_deref().unwrap_or("unauthorized")
            );
        }

        tracing::info!("Updating new data...");
        let tokens = self.store.snapshot().await?;
        if let Err(e) = write_refresh_tokens(&self.accounts_path, &self.accounts, &tokens).await {
            tracing::warn!("Can't update {}: {e:#}", self.accounts_path.display());
        }

        Ok(results)
    }

    async fn jobs(&self) -> eyre::Result<Vec<Job>> {
        let tokens = self.store.snapshot().await?;

        Ok(self
            .accounts
            .iter()
            .enumerate()
            .map(|(index, account)| Job {
                index,
                account: account.clone(),
                proxy: (!self.proxies.is_empty())
                    .then(|| self.proxies[index % self.proxies.len()].clone()),
                tokens: tokens.get(&account.address).cloned().unwrap_or_default(),
                user_agent: self
                    .user_agents
                    .get(&account.address)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }
}
