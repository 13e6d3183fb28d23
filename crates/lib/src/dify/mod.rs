//! Dify API client.
//!
//! Supports the chat, completion and workflow app types in blocking mode, file upload
//! for chat attachments, and downloading artifacts referenced by a reply.

mod client;
mod transfer;
mod types;

pub use client::{BackendReply, BackendRequest, DifyClient, DifyError, Stage, MAX_ATTEMPTS};
pub use transfer::{upload_handle, UploadResponse};
pub use types::{
    ChatRequest, ChatResponse, CompletionRequest, CompletionResponse, FileAttachment, FileKind,
    Inputs, ResponseMode, TransferMethod, WorkflowRequest, WorkflowResponse,
};
