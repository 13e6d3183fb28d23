//! Dify API client: chat, completion and workflow apps in blocking mode.
//!
//! All calls go through [`DifyClient::call`], which retries transport failures and turns
//! non-2xx statuses into [`DifyError`] values.

use crate::config::{DifyConfig, DEFAULT_ROLE};
use crate::dify::types::{
    ApiErrorBody, ChatRequest, ChatResponse, CompletionRequest, CompletionResponse, Inputs,
    ResponseMode, WorkflowRequest, WorkflowResponse,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

pub(crate) const CHAT_MESSAGES_PATH: &str = "/v1/chat-messages";
pub(crate) const COMPLETION_MESSAGES_PATH: &str = "/v1/completion-messages";
pub(crate) const WORKFLOW_RUN_PATH: &str = "/v1/workflows/run";
pub(crate) const FILE_UPLOAD_PATH: &str = "/v1/files/upload";

/// Connection-level attempts per call.
pub const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_LOG_MAX_LEN: usize = 512;
pub(crate) const UPLOAD_MIME: &str = "application/octet-stream";

/// Which call produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Chat,
    Completion,
    Workflow,
    Upload,
    Download,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Chat => "chat api",
            Stage::Completion => "completion api",
            Stage::Workflow => "workflow api",
            Stage::Upload => "file upload api",
            Stage::Download => "file download",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DifyError {
    #[error("{stage}: dify base url or api key not configured")]
    NotConfigured { stage: Stage },
    #[error("{stage}: failed to encode request: {source}")]
    Encode {
        stage: Stage,
        source: serde_json::Error,
    },
    #[error("{stage}: request failed after {attempts} attempts: {source}")]
    Transport {
        stage: Stage,
        attempts: u32,
        source: reqwest::Error,
    },
    #[error("{stage}: dify error (status {status}, code {code}): {message}")]
    Api {
        stage: Stage,
        status: u16,
        code: String,
        message: String,
    },
    #[error("{stage}: unexpected status {status}: {body}")]
    Status {
        stage: Stage,
        status: u16,
        body: String,
    },
    #[error("{stage}: failed to build multipart body: {source}")]
    Multipart {
        stage: Stage,
        source: reqwest::Error,
    },
    #[error("{stage}: failed to read response body: {source}")]
    Body {
        stage: Stage,
        source: reqwest::Error,
    },
    #[error("{stage}: failed to decode response: {source}")]
    Decode {
        stage: Stage,
        source: serde_json::Error,
    },
    #[error("{stage}: response has no {field}")]
    MissingField { stage: Stage, field: &'static str },
    #[error("{stage}: {context}: {source}")]
    Io {
        stage: Stage,
        context: String,
        source: std::io::Error,
    },
}

impl DifyError {
    pub fn stage(&self) -> Stage {
        match self {
            DifyError::NotConfigured { stage }
            | DifyError::Encode { stage, .. }
            | DifyError::Transport { stage, .. }
            | DifyError::Api { stage, .. }
            | DifyError::Status { stage, .. }
            | DifyError::Multipart { stage, .. }
            | DifyError::Body { stage, .. }
            | DifyError::Decode { stage, .. }
            | DifyError::MissingField { stage, .. }
            | DifyError::Io { stage, .. } => *stage,
        }
    }

    /// True for failures that were retried before surfacing.
    pub fn is_transport(&self) -> bool {
        matches!(self, DifyError::Transport { .. })
    }
}

/// Request body, rebuilt for every attempt.
pub(crate) enum Payload<'a> {
    Json(Vec<u8>),
    /// Multipart with a streamed `file` part and a `user` field.
    Upload { path: &'a Path, user: &'a str },
}

impl Payload<'_> {
    async fn attach(&self, stage: Stage, builder: RequestBuilder) -> Result<RequestBuilder, DifyError> {
        match self {
            Payload::Json(bytes) => Ok(builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes.clone())),
            Payload::Upload { path, user } => {
                let io_err = |context: String| {
                    move |source: std::io::Error| DifyError::Io {
                        stage,
                        context,
                        source,
                    }
                };
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(io_err(format!("opening {}", path.display())))?;
                let len = file
                    .metadata()
                    .await
                    .map_err(io_err(format!("reading metadata of {}", path.display())))?
                    .len();
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string());
                let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                let part = Part::stream_with_length(body, len)
                    .file_name(file_name)
                    .mime_str(UPLOAD_MIME)
                    .map_err(|source| DifyError::Multipart { stage, source })?;
                let form = Form::new().part("file", part).text("user", user.to_string());
                Ok(builder.multipart(form))
            }
        }
    }
}

/// Result of a Dify call, normalized to one text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    /// Answer text (chat/completion) or pretty-printed JSON (workflow).
    pub payload: String,
    /// Conversation id reported by a chat app, if any.
    pub conversation_id: Option<String>,
}

/// One Dify call, typed by bot type.
#[derive(Debug, Clone)]
pub enum BackendRequest {
    Chat(ChatRequest),
    Completion(CompletionRequest),
    Workflow(WorkflowRequest),
}

/// Client for the Dify HTTP API.
#[derive(Clone)]
pub struct DifyClient {
    base_url: String,
    api_key: String,
    default_role: String,
    retry_delay: Duration,
    http: reqwest::Client,
}

impl DifyClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            default_role: DEFAULT_ROLE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            http,
        })
    }

    pub fn from_config(config: &DifyConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(&config.base_url, &config.api_key)?.with_default_role(&config.default_role))
    }

    /// Value injected as inputs `role` when absent.
    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }

    /// Base unit of the retry backoff (attempt n waits n units).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn ensure_configured(&self, stage: Stage) -> Result<(), DifyError> {
        if self.base_url.is_empty() || self.api_key.is_empty() {
            return Err(DifyError::NotConfigured { stage });
        }
        Ok(())
    }

    fn ensure_role(&self, inputs: &mut Inputs) {
        if !inputs.contains_key("role") {
            inputs.insert("role".to_string(), Value::String(self.default_role.clone()));
        }
    }

    /// Perform one Dify call with bounded retries; returns the body of a 2xx response.
    ///
    /// Only transport failures are retried. A non-2xx status is terminal and decoded as a
    /// Dify error body when possible.
    pub(crate) async fn call(
        &self,
        stage: Stage,
        method: Method,
        path: &str,
        payload: Payload<'_>,
    ) -> Result<String, DifyError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        let res = loop {
            attempt += 1;
            let builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.api_key);
            let builder = payload.attach(stage, builder).await?;
            log::info!(
                "dify {}: {} {} (attempt {}/{})",
                stage,
                method,
                url,
                attempt,
                MAX_ATTEMPTS
            );
            match builder.send().await {
                Ok(res) => break res,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    log::warn!("dify {}: request failed, retrying: {}", stage, e);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => {
                    return Err(DifyError::Transport {
                        stage,
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        };

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| DifyError::Body { stage, source })?;
        log::info!("dify {}: {} -> {}", stage, url, status);
        log::debug!("dify {}: response body: {}", stage, shorten(&body, BODY_LOG_MAX_LEN));

        if !status.is_success() {
            return Err(api_error(stage, status, body));
        }
        Ok(body)
    }

    /// [`DifyClient::call`] and decode the body into `T`.
    pub(crate) async fn call_json<T: DeserializeOwned>(
        &self,
        stage: Stage,
        method: Method,
        path: &str,
        payload: Payload<'_>,
    ) -> Result<T, DifyError> {
        let body = self.call(stage, method, path, payload).await?;
        serde_json::from_str(&body).map_err(|source| DifyError::Decode { stage, source })
    }

    /// POST /v1/chat-messages. An empty answer is an error.
    pub async fn chat(&self, mut request: ChatRequest) -> Result<ChatResponse, DifyError> {
        let stage = Stage::Chat;
        self.ensure_configured(stage)?;
        log::info!(
            "dify chat: user={} conversation={:?} query_len={} files={}",
            request.user,
            request.conversation_id,
            request.query.len(),
            request.files.len()
        );
        self.ensure_role(&mut request.inputs);
        request.response_mode = ResponseMode::Blocking;
        let body = encode(stage, &request)?;
        let response: ChatResponse = self
            .call_json(stage, Method::POST, CHAT_MESSAGES_PATH, Payload::Json(body))
            .await?;
        if response.answer.is_empty() {
            return Err(DifyError::MissingField {
                stage,
                field: "answer",
            });
        }
        Ok(response)
    }

    /// POST /v1/completion-messages. An empty text is an error.
    pub async fn completion(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, DifyError> {
        let stage = Stage::Completion;
        self.ensure_configured(stage)?;
        log::info!(
            "dify completion: user={} prompt_len={}",
            request.user,
            request.prompt.len()
        );
        self.ensure_role(&mut request.inputs);
        request.response_mode = ResponseMode::Blocking;
        let body = encode(stage, &request)?;
        let response: CompletionResponse = self
            .call_json(
                stage,
                Method::POST,
                COMPLETION_MESSAGES_PATH,
                Payload::Json(body),
            )
            .await?;
        if response.text.is_empty() {
            return Err(DifyError::MissingField {
                stage,
                field: "text",
            });
        }
        Ok(response)
    }

    /// POST /v1/workflows/run. A missing or null `data` object is an error.
    pub async fn workflow(&self, mut request: WorkflowRequest) -> Result<WorkflowResponse, DifyError> {
        let stage = Stage::Workflow;
        self.ensure_configured(stage)?;
        log::info!(
            "dify workflow: user={} workflow_id={}",
            request.user,
            request.workflow_id
        );
        request.response_mode = ResponseMode::Blocking;
        let body = encode(stage, &request)?;
        let response: WorkflowResponse = self
            .call_json(stage, Method::POST, WORKFLOW_RUN_PATH, Payload::Json(body))
            .await?;
        if response.data.is_none() {
            return Err(DifyError::MissingField {
                stage,
                field: "data",
            });
        }
        Ok(response)
    }

    /// Run the call for the request's bot type and normalize the result to text.
    pub async fn dispatch(&self, request: BackendRequest) -> Result<BackendReply, DifyError> {
        match request {
            BackendRequest::Chat(req) => {
                let res = self.chat(req).await?;
                Ok(BackendReply {
                    payload: res.answer,
                    conversation_id: res.conversation_id.filter(|id| !id.is_empty()),
                })
            }
            BackendRequest::Completion(req) => {
                let res = self.completion(req).await?;
                Ok(BackendReply {
                    payload: res.text,
                    conversation_id: None,
                })
            }
            BackendRequest::Workflow(req) => {
                let res = self.workflow(req).await?;
                let data = Value::Object(res.data.unwrap_or_default());
                Ok(BackendReply {
                    payload: workflow_text(&data),
                    conversation_id: None,
                })
            }
        }
    }
}

fn encode<T: serde::Serialize>(stage: Stage, request: &T) -> Result<Vec<u8>, DifyError> {
    serde_json::to_vec(request).map_err(|source| DifyError::Encode { stage, source })
}

/// Pretty-print workflow output. A serialization failure becomes the text itself, since the
/// workflow did run and the recipient should still hear about it.
pub(crate) fn workflow_text(data: &Value) -> String {
    match serde_json::to_string_pretty(data) {
        Ok(s) => s,
        Err(e) => {
            log::error!("dify workflow: failed to serialize output: {}", e);
            format!("Error: failed to marshal workflow response: {}", e)
        }
    }
}

/// Map a non-2xx response to a Dify error, preferring the structured error body.
pub(crate) fn api_error(stage: Stage, status: StatusCode, body: String) -> DifyError {
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(err) if !err.code.is_empty() || !err.message.is_empty() => DifyError::Api {
            stage,
            status: if err.status != 0 { err.status } else { status.as_u16() },
            code: err.code,
            message: err.message,
        },
        _ => DifyError::Status {
            stage,
            status: status.as_u16(),
            body,
        },
    }
}

pub(crate) fn shorten(s: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_len {
        return std::borrow::Cow::Borrowed(s);
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!("{}... ({} bytes)", &s[..end], s.len()))
}
