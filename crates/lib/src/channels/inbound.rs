//! Inbound message from the dispatcher: delivered to the pipeline for one relay run.

use std::path::PathBuf;

/// A message to relay through Dify to the outbound channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub text: String,
    /// Never empty by the time it reaches the pipeline; the dispatcher fills one in.
    pub user_id: String,
    pub conversation_id: Option<String>,
    /// Local file to upload as a chat attachment.
    pub attachment: Option<PathBuf>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            conversation_id: None,
            attachment: None,
        }
    }

    /// Build from the dispatcher's flat strings; empty strings mean "absent".
    pub fn from_parts(message: &str, user: &str, conversation_id: &str, attachment_path: &str) -> Self {
        Self {
            text: message.to_string(),
            user_id: user.to_string(),
            conversation_id: Some(conversation_id.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            attachment: Some(attachment_path.trim())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }
}
