use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderMap, AUTHORIZATION},
    Client, Method, Proxy,
};
use serde_json::Value;

use crate::{
    config::Config,
    error::RequestError,
    token_store::{TokenPair, TokenStoreHandle},
    utils::Account,
};

#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    /// Additional attempts after the first one on generic failures.
    pub retries: usize,
    /// Auth calls never carry the access token and never trigger a refresh.
    pub is_auth: bool,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

impl ApiResponse {
    /// Unwraps the `data` envelope when the server sends one.
    fn from_body(status: u16, body: Value) -> Self {
        let data = match body {
            Value::Object(mut map) if map.get("data").is_some_and(|d| !d.is_null()) => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };
        Self { status, data }
    }
}

pub struct ApiClient {
    pub(crate) http: Client,
    pub(crate) headers: HeaderMap,
    pub(crate) base_url: String,
    pub(crate) account: Account,
    pub(crate) tokens: TokenPair,
    pub(crate) store: TokenStoreHandle,
    pub(crate) config: Arc<Config>,
}

impl ApiClient {
    pub fn new(
        account: Account,
        base_url: String,
        tokens: TokenPair,
        headers: HeaderMap,
        proxy: Option<&str>,
        store: TokenStoreHandle,
        config: Arc<Config>,
    ) -> Result<Self, RequestError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.request_timeout));
        if let Some(proxy) = proxy.filter(|_| config.use_proxy) {
            let proxy = Proxy::all(proxy)
                .map_err(|e| RequestError::InvalidProxy(format!("{proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            http: builder.build()?,
            headers,
            base_url: base_url.trim_end_matches('/').to_string(),
            account,
            tokens,
            store,
            config,
        })
    }

    pub fn address(&self) -> &str {
        &self.account.address
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn options(&self) -> RequestOptions {
        RequestOptions {
            retries: self.config.request_retries,
            is_auth: false,
        }
    }

    pub fn auth_options(&self) -> RequestOptions {
        RequestOptions {
            is_auth: true,
            ..self.options()
        }
    }

    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, RequestError> {
        let result = self.execute(&method, url, body.as_ref(), options).await;

        let unauthorized = matches!(&result, Err(e) if e.status() == Some(401));
        if options.is_auth || !unauthorized {
            return result;
        }

        tracing::warn!("Error 401 for {url}, refreshing token");
        if self.get_valid_token(false, true).await.is_none() {
            tracing::error!("Token refresh failed, session can't be recovered");
            return Err(RequestError::Unauthorized);
        }

        match self.execute(&method, url, body.as_ref(), options).await {
            Err(e) if e.status() == Some(401) => {
                tracing::error!("Still unauthorized after token refresh: {e}");
                Err(RequestError::Unauthorized)
            }
            replay => replay,
        }
    }

    /// Retry loop without any token handling. 401 and 400 return at once.
    pub(crate) async fn execute(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, RequestError> {
        let mut attempt = 0;
        loop {
            let err = match self.send_once(method, url, body, options.is_auth).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            tracing::warn!("Request failed: {url} | {err}");

            match &err {
                RequestError::Status { status: 401, .. } => return Err(err),
                RequestError::BadRequest(_) => {
                    tracing::error!("Invalid request for {url}, the API may have been updated");
                    return Err(err);
                }
                _ => {}
            }

            if attempt >= options.retries {
                return Err(err);
            }
            attempt += 1;

            if matches!(err, RequestError::RateLimited(_)) {
                let cooldown = self.config.rate_limit_cooldown();
                tracing::warn!("Rate limited, waiting {}s before retrying", cooldown.as_secs());
                tokio::time::sleep(cooldown).await;
            }
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        is_auth: bool,
    ) -> Result<ApiResponse, RequestError> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(self.headers.clone());

        if !is_auth {
            if let Some(token) = &self.tokens.token {
                request = request.header(AUTHORIZATION, token);
            }
        }

        if *method != Method::GET {
            let empty = Value::Object(Default::default());
            request = request.json(body.unwrap_or(&empty));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            return Ok(ApiResponse::from_body(status.as_u16(), body));
        }

        let message = error_message(&body).unwrap_or_else(|| status.to_string());
        Err(match status.as_u16() {
            400 => RequestError::BadRequest(message),
            429 => RequestError::RateLimited(message),
            status => RequestError::Status { status, message },
        })
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        _ => None,
    }
}
