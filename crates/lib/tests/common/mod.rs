//! Shared test helpers: a recording fake HTTP server (stands in for Dify, WeCom and artifact
//! hosts) and a recording outbound channel.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use relay::channels::{OutboundChannel, OutboundMessage, SendError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A port nothing listens on (bound, then released).
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// One request seen by the fake server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct FakeState {
    requests: Mutex<Vec<Recorded>>,
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
}

/// Fake HTTP server on a loopback port. Unconfigured routes answer 404.
pub struct FakeServer {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    /// Absolute URL for `path` on this server (`path` starts with '/', or is empty).
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), (status, body.into()));
    }

    pub fn respond_json(&self, method: &str, path: &str, body: serde_json::Value) {
        self.respond(method, path, 200, body.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

async fn record(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: header("authorization"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });
    let key = format!("{} {}", method, uri.path());
    let configured = state.responses.lock().unwrap().get(&key).cloned();
    match configured {
        Some((status, body)) => (
            StatusCode::from_u16(status).expect("valid status"),
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// One outbound send attempt.
#[derive(Debug, Clone)]
pub struct Sent {
    pub message: OutboundMessage,
    /// Bytes of the media file at send time.
    pub media: Option<Vec<u8>>,
    pub delivered: bool,
}

/// Outbound channel that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Sent>>,
    fail_media: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose image/file sends fail with an API error.
    pub fn failing_media() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_media: true,
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages that were delivered.
    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|s| s.delivered)
            .map(|s| s.message)
            .collect()
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let media = message.path().and_then(|p| std::fs::read(p).ok());
        let fail = self.fail_media && message.path().is_some();
        self.sent.lock().unwrap().push(Sent {
            message: message.clone(),
            media,
            delivered: !fail,
        });
        if fail {
            return Err(SendError::Api {
                code: 40008,
                message: "invalid media".to_string(),
            });
        }
        Ok(())
    }
}
