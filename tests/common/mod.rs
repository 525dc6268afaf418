//! Purpose: In-process mock of the store's HTTP API for integration tests.
//! Exports: `MockStore`, `Reply`, `Recorded`, `TestResult`.
//! Role: Scriptable responses per endpoint plus a log of every request received.
//! Invariants: Binds loopback on an ephemeral port; one server per test, no shared state.
//! Invariants: The server thread is shut down and joined on drop.
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

pub const RECEIPT_7: &str =
    r#"{:xtdb.api/tx-id 7, :xtdb.api/tx-time #inst "2024-05-01T10:00:00Z"}"#;

#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug)]
pub struct StoreState {
    pub submit: Reply,
    pub await_tx: Reply,
    pub entity: Reply,
    pub query: Reply,
    /// 1-based sync call that first succeeds; `None` fails every call.
    pub sync_succeeds_on: Option<u32>,
    pub sync_calls: u32,
    pub requests: Vec<Recorded>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            submit: Reply::new(202, RECEIPT_7),
            await_tx: Reply::new(200, RECEIPT_7),
            entity: Reply::new(404, ""),
            query: Reply::new(200, "[]"),
            sync_succeeds_on: Some(1),
            sync_calls: 0,
            requests: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<StoreState>>;

pub struct MockStore {
    addr: SocketAddr,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockStore {
    pub fn start() -> TestResult<Self> {
        Self::start_with(StoreState::default())
    }

    pub fn start_with(state: StoreState) -> TestResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(Mutex::new(state));
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = std::thread::spawn(move || {
            runtime.block_on(async move {
                let Ok(listener) = tokio::net::TcpListener::from_std(listener) else {
                    return;
                };
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });
        });

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let reply = {
        let mut state = state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.requests.push(Recorded {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            accept: header_value(header::ACCEPT),
            content_type: header_value(header::CONTENT_TYPE),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        match uri.path() {
            "/_xtdb/submit-tx" => state.submit.clone(),
            "/_xtdb/await-tx" => state.await_tx.clone(),
            "/_xtdb/entity" => state.entity.clone(),
            "/_xtdb/query" => state.query.clone(),
            "/_xtdb/sync" => {
                state.sync_calls += 1;
                match state.sync_succeeds_on {
                    Some(k) if state.sync_calls >= k => Reply::new(200, "{}"),
                    _ => Reply::new(500, "not caught up"),
                }
            }
            _ => Reply::new(404, "no route"),
        }
    };
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, reply.body)
}
