//! Dify wire types for the chat, completion and workflow apps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Input variables passed to the Dify app.
pub type Inputs = Map<String, Value>;

/// Dify response mode. Only blocking is used: the full answer arrives in one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Blocking,
}

/// POST /v1/chat-messages body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub inputs: Inputs,
    pub query: String,
    pub user: String,
    pub response_mode: ResponseMode,
    /// Empty string asks Dify to start a new conversation.
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

/// POST /v1/completion-messages body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionRequest {
    pub inputs: Inputs,
    pub prompt: String,
    pub user: String,
    pub response_mode: ResponseMode,
}

/// POST /v1/workflows/run body. The query travels inside `inputs`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowRequest {
    pub inputs: Inputs,
    pub user: String,
    pub response_mode: ResponseMode,
    pub workflow_id: String,
}

impl WorkflowRequest {
    /// Request with `inputs.query` set to the message text.
    pub fn with_query(
        query: impl Into<String>,
        user: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        let mut inputs = Inputs::new();
        inputs.insert("query".to_string(), Value::String(query.into()));
        Self {
            inputs,
            user: user.into(),
            response_mode: ResponseMode::Blocking,
            workflow_id: workflow_id.into(),
        }
    }
}

/// Reference to a file previously uploaded through /v1/files/upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub transfer_method: TransferMethod,
    pub upload_file_id: String,
}

impl FileAttachment {
    /// Attachment for an uploaded local file, typed by its extension.
    pub fn local_file(path: &Path, upload_file_id: impl Into<String>) -> Self {
        Self {
            kind: FileKind::from_path(path),
            transfer_method: TransferMethod::LocalFile,
            upload_file_id: upload_file_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    LocalFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Audio,
    Video,
    Text,
    Other,
}

impl FileKind {
    /// Classify by lowercase extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => FileKind::Image,
            "mp3" | "wav" | "aac" | "flac" => FileKind::Audio,
            "mp4" | "avi" | "mov" | "wmv" | "flv" => FileKind::Video,
            "txt" | "md" | "csv" | "json" | "xml" => FileKind::Text,
            _ => FileKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowResponse {
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// Error body returned by Dify with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: u16,
}
