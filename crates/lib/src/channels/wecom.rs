//! WeCom (企业微信) group robot: send text, markdown, image and file messages via the webhook.
//!
//! Media messages upload the local file to `upload_media` next to the webhook endpoint and
//! send the returned `media_id`.

use crate::channels::outbound::{OutboundChannel, OutboundMessage, SendError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// errcode for "API call frequency exceeds the limit".
pub const RATE_LIMIT_ERRCODE: i64 = 45009;

#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    media_id: Option<String>,
}

/// Media type for `upload_media`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    File,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::File => "file",
        }
    }
}

/// WeCom group robot client bound to one webhook URL (`.../cgi-bin/webhook/send?key=...`).
pub struct WeComRobot {
    id: String,
    webhook: Url,
    key: String,
    client: reqwest::Client,
}

impl WeComRobot {
    /// The webhook URL must carry a non-empty `key` query parameter.
    pub fn new(webhook_url: &str) -> Result<Self, SendError> {
        let webhook = Url::parse(webhook_url.trim())
            .map_err(|e| SendError::InvalidWebhook(format!("{}: {}", webhook_url, e)))?;
        let key = webhook
            .query_pairs()
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                SendError::InvalidWebhook(format!("{}: missing 'key' parameter", webhook_url))
            })?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            id: "wecom".to_string(),
            webhook,
            key,
            client,
        })
    }

    /// `upload_media` endpoint for the given media type.
    pub fn upload_url(&self, media_type: MediaType) -> Result<Url, SendError> {
        let mut url = self
            .webhook
            .join("upload_media")
            .map_err(|e| SendError::InvalidWebhook(e.to_string()))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("key", &self.key)
            .append_pair("type", media_type.as_str());
        Ok(url)
    }

    pub async fn send_text(&self, content: &str) -> Result<(), SendError> {
        self.post_message("text", json!({ "content": content })).await
    }

    pub async fn send_markdown(&self, content: &str) -> Result<(), SendError> {
        self.post_message("markdown", json!({ "content": content }))
            .await
    }

    pub async fn send_image(&self, path: &Path) -> Result<(), SendError> {
        let media_id = self.upload_media(path, MediaType::Image).await?;
        self.post_message("image", json!({ "media_id": media_id }))
            .await
    }

    pub async fn send_file(&self, path: &Path) -> Result<(), SendError> {
        let media_id = self.upload_media(path, MediaType::File).await?;
        self.post_message("file", json!({ "media_id": media_id }))
            .await
    }

    /// Upload a local file as multipart field `media`; returns the media id.
    pub async fn upload_media(&self, path: &Path, media_type: MediaType) -> Result<String, SendError> {
        let url = self.upload_url(media_type)?;
        log::info!(
            "wecom: uploading {} as {}",
            path.display(),
            media_type.as_str()
        );
        let io_err = |context: &str, source: std::io::Error| SendError::Io {
            context: format!("{} {}", context, path.display()),
            source,
        };
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| io_err("opening", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| io_err("reading metadata of", e))?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, len)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("media", part);

        let res = self.client.post(url).multipart(form).send().await?;
        let result = read_response(res).await?;
        let media_id = result.media_id.unwrap_or_default();
        if media_id.is_empty() {
            return Err(SendError::Api {
                code: result.errcode,
                message: "upload_media returned no media_id".to_string(),
            });
        }
        log::info!("wecom: media uploaded, media_id={}", media_id);
        Ok(media_id)
    }

    async fn post_message(&self, msgtype: &str, payload: Value) -> Result<(), SendError> {
        log::info!("wecom: sending {} message", msgtype);
        let mut body = serde_json::Map::new();
        body.insert("msgtype".to_string(), Value::String(msgtype.to_string()));
        body.insert(msgtype.to_string(), payload);
        let res = self
            .client
            .post(self.webhook.clone())
            .json(&body)
            .send()
            .await?;
        read_response(res).await?;
        log::info!("wecom: {} message delivered", msgtype);
        Ok(())
    }
}

/// Check status and `errcode`, returning the decoded body on success.
async fn read_response(res: reqwest::Response) -> Result<RobotResponse, SendError> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        return Err(SendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let result: RobotResponse =
        serde_json::from_str(&body).map_err(|source| SendError::Decode {
            body: body.clone(),
            source,
        })?;
    match result.errcode {
        0 => Ok(result),
        RATE_LIMIT_ERRCODE => {
            log::warn!("wecom: rate limited: {}", result.errmsg);
            Err(SendError::RateLimited {
                code: result.errcode,
                message: result.errmsg,
            })
        }
        code => Err(SendError::Api {
            code,
            message: result.errmsg,
        }),
    }
}

#[async_trait]
impl OutboundChannel for WeComRobot {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        match message {
            OutboundMessage::Text(content) => self.send_text(content).await,
            OutboundMessage::Markdown(content) => self.send_markdown(content).await,
            OutboundMessage::Image(path) => self.send_image(path).await,
            OutboundMessage::File(path) => self.send_file(path).await,
        }
    }
}
