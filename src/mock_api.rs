use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct Inner {
    queued: HashMap<String, VecDeque<(u16, Value)>>,
    fixed: HashMap<String, (u16, Value)>,
    requests: Vec<Recorded>,
}

/// Responses keyed by path, query ignored. Queued ones go first, then the fixed one.
#[derive(Clone)]
pub struct MockApi {
    addr: SocketAddr,
    inner: Arc<Mutex<Inner>>,
}

impl MockApi {
    pub async fn start() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let app = Router::new().fallback(handle).with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, inner }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.inner
            .lock()
            .unwrap()
            .fixed
            .insert(path.to_string(), (status, body));
    }

    pub fn enqueue(&self, path: &str, status: u16, body: Value) {
        self.inner
            .lock()
            .unwrap()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back((status, body));
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    pub fn authorization(&self, path: &str) -> Vec<Option<String>> {
        self.requests(path)
            .into_iter()
            .map(|r| r.authorization)
            .collect()
    }

    pub fn total_hits(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }
}

async fn handle(
    State(inner): State<Arc<Mutex<Inner>>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    let mut inner = inner.lock().unwrap();

    inner.requests.push(Recorded {
        path: path.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let queued = inner.queued.get_mut(&path).and_then(VecDeque::pop_front);
    let (status, body) = queued
        .or_else(|| inner.fixed.get(&path).cloned())
        .unwrap_or((404, json!({ "error": "not found" })));

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}
