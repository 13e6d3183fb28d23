//! Reply classification: decide which outbound message shape a Dify payload becomes.
//!
//! A payload that parses as a JSON object is checked for well-known keys in a fixed order
//! (`image_url`, `file_url`, `markdown`, then `data` for workflow apps). Anything else is
//! plain text, truncated to the channel's byte limit.

use crate::config::BotType;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::path::Path;
use url::Url;

/// Hard limit of a WeCom text message, in bytes.
pub const MAX_TEXT_BYTES: usize = 2048;

/// Appended to text cut at [`MAX_TEXT_BYTES`].
pub const TRUNCATION_NOTICE: &str =
    "\n... (message truncated, see the Dify console for the full content)";

/// Outbound shape chosen for one Dify payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Download the image at `url` and send it as an image message.
    Image { url: String },
    /// Download the file at `url` and send it as a file message.
    File { url: String },
    /// Send as markdown, untruncated.
    Markdown(String),
    /// Raw workflow JSON, sent as text.
    WorkflowJson(String),
    /// Plain text, sent as text after truncation.
    Text(String),
}

impl Reply {
    /// Classify a normalized Dify payload. First matching rule wins.
    pub fn classify(payload: &str, bot_type: BotType) -> Reply {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(payload) else {
            return Reply::Text(payload.to_string());
        };
        if let Some(url) = non_empty_str(&object, "image_url") {
            return Reply::Image {
                url: url.to_string(),
            };
        }
        if let Some(url) = non_empty_str(&object, "file_url") {
            return Reply::File {
                url: url.to_string(),
            };
        }
        if let Some(markdown) = non_empty_str(&object, "markdown") {
            return Reply::Markdown(markdown.to_string());
        }
        if bot_type == BotType::Workflow && object.contains_key("data") {
            return Reply::WorkflowJson(payload.to_string());
        }
        Reply::Text(payload.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Image { .. } => "image",
            Reply::File { .. } => "file",
            Reply::Markdown(_) => "markdown",
            Reply::WorkflowJson(_) => "workflow json",
            Reply::Text(_) => "text",
        }
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Fit `text` into [`MAX_TEXT_BYTES`]: unchanged when it fits, otherwise cut at a char
/// boundary and suffixed with [`TRUNCATION_NOTICE`].
pub fn truncate_for_channel(text: &str) -> Cow<'_, str> {
    if text.len() <= MAX_TEXT_BYTES {
        return Cow::Borrowed(text);
    }
    let mut end = MAX_TEXT_BYTES - TRUNCATION_NOTICE.len();
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    log::info!(
        "reply: text of {} bytes exceeds {} bytes, truncating",
        text.len(),
        MAX_TEXT_BYTES
    );
    Cow::Owned(format!("{}{}", &text[..end], TRUNCATION_NOTICE))
}

/// Downloaded artifact kind: decides scratch-file naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    File,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Image => "dify_image_",
            ArtifactKind::File => "dify_file_",
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            ArtifactKind::Image => ".png",
            ArtifactKind::File => ".bin",
        }
    }

    /// Scratch-file suffix for an artifact at `url`: its extension (with dot), or the default.
    pub fn suffix_for(self, url: &str) -> String {
        url_extension(url)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_else(|| self.default_extension().to_string())
    }
}

/// Extension of the last path segment of `url`, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let ext = Path::new(segment).extension()?.to_str()?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_string())
}
