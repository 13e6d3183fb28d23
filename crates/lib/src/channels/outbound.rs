//! Outbound channel abstraction: one typed message per relay run.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

/// Message shapes the outbound channel accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Markdown(String),
    /// Local image file; the channel uploads it and sends the resulting media handle.
    Image(PathBuf),
    /// Local file; same upload-then-send flow as images.
    File(PathBuf),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Text(_) => "text",
            OutboundMessage::Markdown(_) => "markdown",
            OutboundMessage::Image(_) => "image",
            OutboundMessage::File(_) => "file",
        }
    }

    /// Local path for media messages.
    pub fn path(&self) -> Option<&Path> {
        match self {
            OutboundMessage::Image(p) | OutboundMessage::File(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundMessage::Text(s) | OutboundMessage::Markdown(s) => {
                write!(f, "{} ({} bytes)", self.kind(), s.len())
            }
            OutboundMessage::Image(p) | OutboundMessage::File(p) => {
                write!(f, "{} {}", self.kind(), p.display())
            }
        }
    }
}

/// Error from delivering a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The channel throttled us; the message was not delivered.
    #[error("rate limited: {message} (errcode {code})")]
    RateLimited { code: i64, message: String },
    #[error("api error: {message} (errcode {code})")]
    Api { code: i64, message: String },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to decode response: {source}; body: {body}")]
    Decode {
        body: String,
        source: serde_json::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("invalid webhook url: {0}")]
    InvalidWebhook(String),
}

impl SendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SendError::RateLimited { .. })
    }
}

/// Delivery target for relay replies (e.g. a WeCom group robot).
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Channel id (e.g. "wecom").
    fn id(&self) -> &str;

    /// Deliver one message, uploading media first when needed.
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}
