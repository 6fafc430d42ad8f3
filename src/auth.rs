use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::{
    client::ApiClient,
    jwt::{self, Expiry},
    token_store::TokenPair,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    ExpiredAccess,
    ExpiredBoth,
    ForceRefresh,
}

impl TokenState {
    /// `force_new` asks for a brand new session, which only a wallet login
    /// could provide, so it never reuses or refreshes.
    pub fn classify(access: Expiry, refresh: Expiry, force_new: bool, force_refresh: bool) -> Self {
        if force_refresh {
            TokenState::ForceRefresh
        } else if force_new {
            TokenState::ExpiredBoth
        } else if !access.expired {
            TokenState::Valid
        } else if !refresh.expired {
            TokenState::ExpiredAccess
        } else {
            TokenState::ExpiredBoth
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    token: String,
    refresh_token: String,
}

fn describe(expiry: &Expiry) -> String {
    let status = if expiry.expired { "Expired" } else { "Valid" };
    match expiry.expires_at {
        Some(at) => format!("{status} | exp: {at}"),
        None => format!("{status} | exp: unknown"),
    }
}

impl ApiClient {
    fn current_refresh_token(&self) -> String {
        self.account
            .newest_refresh_token(self.tokens.refresh_token.as_deref())
            .to_string()
    }

    pub async fn get_valid_token(&mut self, force_new: bool, force_refresh: bool) -> Option<String> {
        let access = jwt::expiry(self.tokens.token.as_deref());
        let refresh_token = self.current_refresh_token();
        let refresh = jwt::expiry(Some(&refresh_token));

        if !force_refresh {
            tracing::info!("Access token status: {}", describe(&access));
        }

        match TokenState::classify(access, refresh, force_new, force_refresh) {
            TokenState::Valid => {
                tracing::info!("Using valid token");
                self.tokens.token.clone()
            }
            TokenState::ExpiredAccess | TokenState::ForceRefresh => {
                tracing::info!("Refresh token status: {}", describe(&refresh));
                self.handle_refresh_token(refresh_token).await
            }
            TokenState::ExpiredBoth => {
                tracing::warn!("Refresh token status: {}", describe(&refresh));
                None
            }
        }
    }

    /// On success the new pair replaces the live one and is persisted.
    /// On failure nothing is touched.
    async fn handle_refresh_token(&mut self, refresh_token: String) -> Option<String> {
        tracing::info!("Trying to refresh token...");
        let url = self.url("/v1/account/refresh-token");
        let body = json!({ "refreshToken": refresh_token });

        let response = match self
            .execute(&Method::POST, &url, Some(&body), self.auth_options())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Can't refresh token: {e}");
                return None;
            }
        };

        let refreshed: RefreshResponse = match serde_json::from_value(response.data) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("Unexpected refresh response: {e}");
                return None;
            }
        };

        let pair = TokenPair {
            token: Some(refreshed.token.clone()),
            refresh_token: Some(refreshed.refresh_token),
        };
        self.tokens = pair.clone();
        if let Err(e) = self.store.update(&self.account.address, pair).await {
            tracing::warn!("Refreshed token could not be saved: {e:#}");
        }

        tracing::info!("Token refreshed");
        Some(refreshed.token)
    }
}
