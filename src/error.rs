use thiserror::Error;

/// Final outcome of a request that did not succeed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited (429): {0}")]
    RateLimited(String),

    /// The server rejected the payload, usually after an API update.
    #[error("bad request (400): {0}")]
    BadRequest(String),

    #[error("http {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid proxy {0}")]
    InvalidProxy(String),

    /// Token refresh or the replay after it failed. Not recoverable.
    #[error("unauthorized after token refresh")]
    Unauthorized,
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Network(e) => e.status().map(|s| s.as_u16()),
            RequestError::RateLimited(_) => Some(429),
            RequestError::BadRequest(_) => Some(400),
            RequestError::Status { status, .. } => Some(*status),
            RequestError::Unauthorized => Some(401),
            RequestError::Decode(_) | RequestError::InvalidProxy(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("cannot check proxy IP: {0}")]
    ProxyResolution(String),

    #[error("access and refresh tokens are both unusable")]
    TokenExhausted,

    #[error("can't sync account data: {0}")]
    Sync(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("worker timed out")]
    Timeout,
}

impl WorkerError {
    /// Fatal errors stop the whole process, not just this account.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Request(RequestError::Unauthorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unauthorized_is_fatal() {
        assert!(WorkerError::Request(RequestError::Unauthorized).is_fatal());
        assert!(!WorkerError::TokenExhausted.is_fatal());
        assert!(!WorkerError::Request(RequestError::BadRequest("x".into())).is_fatal());
        assert!(!WorkerError::Timeout.is_fatal());
    }

    #[test]
    fn status_is_exposed() {
        assert_eq!(RequestError::BadRequest("x".into()).status(), Some(400));
        assert_eq!(
            RequestError::Status {
                status: 503,
                message: "down".into()
            }
            .status(),
            Some(503)
        );
        assert_eq!(RequestError::Decode("x".into()).status(), None);
    }
}
