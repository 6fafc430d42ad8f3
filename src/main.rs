use std::sync::Arc;

use rewards_farmer::{
    config::Config,
    constants::{
        ACCOUNTS_FILE_PATH, PROXIES_FILE_PATH, TOKENS_FILE_PATH, USER_AGENTS_FILE_PATH,
        WORKER_TIMEOUT,
    },
    logger::init_logger,
    probe::check_base_url,
    scheduler::Scheduler,
    token_store::TokenStore,
    user_agent::SessionAgents,
    utils::{check_inputs, read_accounts, read_proxies},
};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let config = Config::read_default().await?;
    let _guard = init_logger(config.enable_debug);

    let accounts = read_accounts(ACCOUNTS_FILE_PATH).await?;
    let proxies = read_proxies(PROXIES_FILE_PATH, config.use_proxy).await?;
    if let Err(e) = check_inputs(&accounts, &proxies, config.use_proxy) {
        tracing::error!("{e} (data: {}, proxy: {})", accounts.len(), proxies.len());
        return Err(e);
    }
    if !config.use_proxy {
        tracing::warn!("You are running bot without proxies!!!");
    }

    let (endpoint, message) = check_base_url(&config).await?;
    tracing::info!("{message}");

    let mut agents = SessionAgents::load(USER_AGENTS_FILE_PATH.into()).await?;
    let mut created = false;
    for account in &accounts {
        created |= agents.ensure(&account.address);
    }
    if created {
        agents.save().await?;
    }

    let store = TokenStore::load(TOKENS_FILE_PATH.into()).await?.spawn();

    let scheduler = Scheduler::new(
        accounts,
        if config.use_proxy { proxies } else { vec![] },
        agents.into_map(),
        store,
        Arc::new(config),
        endpoint,
        ACCOUNTS_FILE_PATH.into(),
        WORKER_TIMEOUT,
    );

    scheduler.run(shutdown_signal()).await
}
