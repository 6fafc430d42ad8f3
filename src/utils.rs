use std::path::Path;

use eyre::WrapErr;
use tokio::io::AsyncBufReadExt;

use crate::{
    jwt::{self, decode_claims},
    token_store::Tokens,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: String,
    /// Refresh token the account was loaded with.
    pub refresh_token: String,
}

impl Account {
    pub fn from_refresh_token(token: &str) -> eyre::Result<Self> {
        let claims = decode_claims(token)?;
        let address = claims
            .addr
            .ok_or_else(|| eyre::eyre!("token has no `addr` claim"))?;
        Ok(Self {
            address,
            refresh_token: token.to_string(),
        })
    }

    /// The stored refresh token, unless the one this account was loaded with
    /// expires later. A token without a readable `exp` never wins.
    pub fn newest_refresh_token<'a>(&'a self, stored: Option<&'a str>) -> &'a str {
        let Some(stored) = stored else {
            return self.refresh_token.as_str();
        };
        let stored_exp = jwt::expiry(Some(stored)).expires_at;
        let loaded_exp = jwt::expiry(Some(&self.refresh_token)).expires_at;
        if loaded_exp > stored_exp {
            self.refresh_token.as_str()
        } else {
            stored
        }
    }
}

/// Non-empty, trimmed lines of a text file.
pub async fn read_file_lines(path: impl AsRef<Path>) -> eyre::Result<Vec<String>> {
    let file = tokio::fs::read(path).await?;
    let mut lines = file.lines();

    let mut contents = vec![];
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            contents.push(line.to_string());
        }
    }

    Ok(contents)
}

pub async fn read_accounts(path: impl AsRef<Path>) -> eyre::Result<Vec<Account>> {
    let path = path.as_ref();
    read_file_lines(path)
        .await
        .wrap_err_with(|| format!("reading accounts from {}", path.display()))?
        .iter()
        .enumerate()
        .map(|(i, token)| {
            Account::from_refresh_token(token)
                .wrap_err_with(|| format!("line {} of {}", i + 1, path.display()))
        })
        .collect()
}

/// A missing proxy file is only an error when proxies are required.
pub async fn read_proxies(path: impl AsRef<Path>, required: bool) -> eyre::Result<Vec<String>> {
    match read_file_lines(path.as_ref()).await {
        Ok(proxies) => Ok(proxies),
        Err(_) if !required => Ok(vec![]),
        Err(e) => Err(e.wrap_err(format!("reading proxies from {}", path.as_ref().display()))),
    }
}

pub fn check_inputs(accounts: &[Account], proxies: &[String], use_proxy: bool) -> eyre::Result<()> {
    if accounts.is_empty() {
        eyre::bail!("No accounts found");
    }
    if use_proxy && accounts.len() > proxies.len() {
        eyre::bail!(
            "Proxy count must match account count (accounts: {}, proxies: {})",
            accounts.len(),
            proxies.len()
        );
    }
    Ok(())
}

/// Rewrites the accounts file with the newest refresh token of every account.
pub async fn write_refresh_tokens(
    path: impl AsRef<Path>,
    accounts: &[Account],
    tokens: &Tokens,
) -> eyre::Result<()> {
    let lines: Vec<&str> = accounts
        .iter()
        .map(|account| {
            let stored = tokens
                .get(&account.address)
                .and_then(|pair| pair.refresh_token.as_deref());
            account.newest_refresh_token(stored)
        })
        .collect();

    write_atomic(path.as_ref(), lines.join("\n").as_bytes()).await
}

/// Temp file in the same directory, then rename over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> eyre::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| eyre::eyre!("{} has no parent directory", path.display()))?;
    let name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("{} has no file name", path.display()))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(".{name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents)
        .await
        .wrap_err_with(|| format!("writing {}", tmp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .wrap_err("setting file permissions")?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .wrap_err_with(|| format!("replacing {}", path.display()))
}
