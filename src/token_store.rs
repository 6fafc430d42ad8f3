use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::utils::write_atomic;

const COMMAND_CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Older token files stored every pair as a JSON-encoded string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPair {
    Pair(TokenPair),
    Encoded(String),
}

impl StoredPair {
    fn into_pair(self) -> eyre::Result<TokenPair> {
        match self {
            StoredPair::Pair(pair) => Ok(pair),
            StoredPair::Encoded(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }
}

pub type Tokens = BTreeMap<String, TokenPair>;

/// Owned by a single task after [`TokenStore::spawn`]; writes are serialized there.
pub struct TokenStore {
    path: PathBuf,
    tokens: Tokens,
}

impl TokenStore {
    /// Missing files start an empty store and are created on the spot.
    pub async fn load(path: PathBuf) -> eyre::Result<Self> {
        let tokens = if tokio::fs::try_exists(&path).await? {
            read_tokens(&path).await?
        } else {
            tracing::info!(path = %path.display(), "Token file not found, starting empty");
            let tokens = Tokens::new();
            write_tokens(&path, &tokens).await?;
            tokens
        };

        Ok(Self { path, tokens })
    }

    async fn reload(&mut self) -> eyre::Result<usize> {
        self.tokens = read_tokens(&self.path).await?;
        Ok(self.tokens.len())
    }

    async fn update(&mut self, address: String, pair: TokenPair) -> eyre::Result<()> {
        self.tokens.insert(address, pair);
        write_tokens(&self.path, &self.tokens).await
    }

    pub fn spawn(self) -> TokenStoreHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);
        tokio::spawn(self.run(rx));
        TokenStoreHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.tokens.clone());
                }
                Command::Reload(reply) => {
                    let _ = reply.send(self.reload().await);
                }
                Command::Update {
                    address,
                    pair,
                    reply,
                } => {
                    let result = self.update(address.clone(), pair).await;
                    if let Err(e) = &result {
                        tracing::error!(%address, "Failed to persist tokens: {e:#}");
                    }
                    let _ = reply.send(result);
                }
            }
        }
        tracing::debug!("Token store stopped");
    }
}

enum Command {
    Snapshot(oneshot::Sender<Tokens>),
    Reload(oneshot::Sender<eyre::Result<usize>>),
    Update {
        address: String,
        pair: TokenPair,
        reply: oneshot::Sender<eyre::Result<()>>,
    },
}

#[derive(Clone)]
pub struct TokenStoreHandle {
    tx: mpsc::Sender<Command>,
}

impl TokenStoreHandle {
    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> eyre::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| eyre::eyre!("token store is not running"))?;
        rx.await
            .map_err(|_| eyre::eyre!("token store dropped the request"))
    }

    pub async fn snapshot(&self) -> eyre::Result<Tokens> {
        self.call(Command::Snapshot).await
    }

    /// Re-reads the token file so externally edited tokens are picked up.
    pub async fn reload(&self) -> eyre::Result<usize> {
        self.call(Command::Reload).await?
    }

    pub async fn update(&self, address: &str, pair: TokenPair) -> eyre::Result<()> {
        let address = address.to_string();
        self.call(|reply| Command::Update {
            address,
            pair,
            reply,
        })
        .await?
    }
}

async fn read_tokens(path: &Path) -> eyre::Result<Tokens> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("reading token file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Tokens::new());
    }

    let raw: BTreeMap<String, StoredPair> = serde_json::from_str(&contents)
        .wrap_err_with(|| format!("parsing token file {}", path.display()))?;

    raw.into_iter()
        .map(|(address, stored)| Ok((address, stored.into_pair()?)))
        .collect()
}

async fn write_tokens(path: &Path, tokens: &Tokens) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(tokens)?;
    write_atomic(path, json.as_bytes()).await?;
    tracing::debug!(path = %path.display(), "Persisted tokens");
    Ok(())
}
