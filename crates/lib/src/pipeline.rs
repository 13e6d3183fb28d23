//! Relay pipeline: inbound message -> Dify -> classified reply -> outbound channel.
//!
//! One [`Pipeline::handle`] call per inbound message. Runs for different users may proceed
//! concurrently; the only shared state is the conversation store.

use crate::channels::{InboundMessage, OutboundChannel, OutboundMessage, SendError, WeComRobot};
use crate::config::{BotType, Config, ConfigError};
use crate::conversation::{resolve_conversation, ConversationStore, InMemoryConversationStore};
use crate::dify::{
    upload_handle, BackendRequest, ChatRequest, CompletionRequest, DifyClient, DifyError,
    FileAttachment, Inputs, ResponseMode, WorkflowRequest,
};
use crate::reply::{truncate_for_channel, ArtifactKind, Reply};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

/// Reply sent for `/image ` commands.
pub const IMAGE_COMMAND_REPLY: &str = "Image generation is not available yet.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("empty request: no message, default prompt or attachment")]
    EmptyRequest,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("attachment upload failed: {0}")]
    Upload(#[source] DifyError),
    #[error("dify {bot_type} call failed: {source}")]
    Backend {
        bot_type: BotType,
        #[source]
        source: DifyError,
    },
    #[error("reply delivery failed: {0}")]
    Delivery(#[from] SendError),
}

/// Short-circuits a message with a direct reply, skipping the backend.
pub trait PreFilter: Send + Sync {
    /// Reply text when the message is handled here.
    fn check(&self, message: &InboundMessage) -> Option<String>;
}

/// Recognises command prefixes the relay answers itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPreFilter;

impl PreFilter for CommandPreFilter {
    fn check(&self, message: &InboundMessage) -> Option<String> {
        if message.text.starts_with("/image ") {
            log::info!("pipeline: /image command from user {}", message.user_id);
            return Some(IMAGE_COMMAND_REPLY.to_string());
        }
        None
    }
}

pub struct Pipeline {
    config: Config,
    dify: DifyClient,
    conversations: Arc<dyn ConversationStore>,
    channel: Arc<dyn OutboundChannel>,
    prefilter: Option<Arc<dyn PreFilter>>,
    scratch_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        dify: DifyClient,
        conversations: Arc<dyn ConversationStore>,
        channel: Arc<dyn OutboundChannel>,
    ) -> Self {
        Self {
            config,
            dify,
            conversations,
            channel,
            prefilter: None,
            scratch_dir: None,
        }
    }

    /// Pipeline with a Dify client, an in-memory conversation store, the WeCom robot and the
    /// command pre-filter, all built from `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let dify = DifyClient::from_config(&config.dify).context("building dify client")?;
        let robot = WeComRobot::new(&config.wecom.webhook_url).context("building wecom robot")?;
        Ok(Self::new(
            config,
            dify,
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(robot),
        )
        .with_prefilter(Arc::new(CommandPreFilter)))
    }

    pub fn with_prefilter(mut self, prefilter: Arc<dyn PreFilter>) -> Self {
        self.prefilter = Some(prefilter);
        self
    }

    /// Directory for downloaded artifacts (default: the system temp dir).
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Dispatcher entry point with flat strings; empty strings mean "absent".
    pub async fn handle_parts(
        &self,
        message: &str,
        user: &str,
        conversation_id: &str,
        attachment_path: &str,
    ) -> Result<(), PipelineError> {
        self.handle(InboundMessage::from_parts(
            message,
            user,
            conversation_id,
            attachment_path,
        ))
        .await
    }

    /// Relay one message. Exactly one outbound message is sent on success.
    pub async fn handle(&self, message: InboundMessage) -> Result<(), PipelineError> {
        log::info!(
            "pipeline: message from user {} (len {}, conversation {:?}, attachment {:?})",
            message.user_id,
            message.text.len(),
            message.conversation_id,
            message.attachment
        );

        if let Some(reply) = self.prefilter.as_ref().and_then(|p| p.check(&message)) {
            self.channel.send(&OutboundMessage::Text(reply)).await?;
            return Ok(());
        }

        let mut text = message.text;
        if text.trim().is_empty() {
            text = self.config.dify.default_prompt.clone();
        }
        if text.trim().is_empty() && message.attachment.is_none() {
            return Err(PipelineError::EmptyRequest);
        }
        let bot_type = self.config.bot_type()?;

        let user_id = message.user_id.as_str();
        let conversation_id = resolve_conversation(
            self.conversations.as_ref(),
            user_id,
            message.conversation_id.as_deref(),
        )
        .await;

        let mut files = Vec::new();
        if let Some(path) = message.attachment.as_deref() {
            if bot_type == BotType::Chat {
                if let Some(file) = self.upload_attachment(path, user_id).await? {
                    files.push(file);
                }
            } else {
                log::warn!(
                    "pipeline: attachments are only sent to chat apps, ignoring {}",
                    path.display()
                );
            }
        }

        let request = match bot_type {
            BotType::Chat => BackendRequest::Chat(ChatRequest {
                inputs: Inputs::new(),
                query: text,
                user: user_id.to_string(),
                response_mode: ResponseMode::Blocking,
                conversation_id: conversation_id.clone().unwrap_or_default(),
                files,
            }),
            BotType::Completion => BackendRequest::Completion(CompletionRequest {
                inputs: Inputs::new(),
                prompt: text,
                user: user_id.to_string(),
                response_mode: ResponseMode::Blocking,
            }),
            BotType::Workflow => BackendRequest::Workflow(WorkflowRequest::with_query(
                text,
                user_id,
                &self.config.dify.workflow_id,
            )),
        };
        let reply = self
            .dify
            .dispatch(request)
            .await
            .map_err(|source| PipelineError::Backend { bot_type, source })?;

        if let Some(id) = reply.conversation_id.as_deref() {
            if conversation_id.as_deref() != Some(id) {
                log::info!("pipeline: dify opened conversation {} for user {}", id, user_id);
                self.conversations.save(user_id, id).await;
            }
        }

        self.deliver(&reply.payload, bot_type).await
    }

    /// Upload a chat attachment. A response without an id is logged and yields no handle.
    async fn upload_attachment(
        &self,
        path: &Path,
        user_id: &str,
    ) -> Result<Option<FileAttachment>, PipelineError> {
        let response = self
            .dify
            .upload_file(path, user_id)
            .await
            .map_err(PipelineError::Upload)?;
        match upload_handle(&response) {
            Some(id) => Ok(Some(FileAttachment::local_file(path, id))),
            None => {
                log::warn!(
                    "pipeline: upload of {} returned no file id, sending without attachment",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    /// Classify the payload and send exactly one outbound message.
    pub async fn deliver(&self, payload: &str, bot_type: BotType) -> Result<(), PipelineError> {
        let reply = Reply::classify(payload, bot_type);
        log::info!("pipeline: delivering {} reply", reply.kind());
        match reply {
            Reply::Image { url } => self.deliver_artifact(ArtifactKind::Image, &url).await,
            Reply::File { url } => self.deliver_artifact(ArtifactKind::File, &url).await,
            Reply::Markdown(markdown) => {
                self.channel
                    .send(&OutboundMessage::Markdown(markdown))
                    .await?;
                Ok(())
            }
            Reply::WorkflowJson(text) | Reply::Text(text) => self.send_text(&text).await,
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), PipelineError> {
        let text = truncate_for_channel(text).into_owned();
        self.channel.send(&OutboundMessage::Text(text)).await?;
        Ok(())
    }

    /// Download the artifact to a scratch file and forward it. Failures along the way turn
    /// into a text notice to the recipient; only a failed notice is an error.
    async fn deliver_artifact(&self, kind: ArtifactKind, url: &str) -> Result<(), PipelineError> {
        let scratch = match self.scratch_file(kind, url) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("pipeline: cannot create scratch file for {}: {}", url, e);
                return self.send_text(&download_failed_notice(kind, url)).await;
            }
        };

        if let Err(e) = self.dify.download(url, &scratch).await {
            log::warn!("pipeline: {}", e);
            release(scratch);
            return self.send_text(&download_failed_notice(kind, url)).await;
        }

        let message = match kind {
            ArtifactKind::Image => OutboundMessage::Image(scratch.to_path_buf()),
            ArtifactKind::File => OutboundMessage::File(scratch.to_path_buf()),
        };
        let sent = self.channel.send(&message).await;
        release(scratch);
        match sent {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("pipeline: sending {} failed: {}", message, e);
                self.send_text(&send_failed_notice(kind, url)).await
            }
        }
    }

    /// Empty scratch file named `dify_image_*<ext>` or `dify_file_*<ext>`, removed on drop.
    fn scratch_file(&self, kind: ArtifactKind, url: &str) -> std::io::Result<TempPath> {
        let suffix = kind.suffix_for(url);
        let mut builder = tempfile::Builder::new();
        builder.prefix(kind.prefix()).suffix(&suffix);
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }
}

/// Delete a scratch file now; a failure is only logged.
fn release(path: TempPath) {
    let display = path.to_path_buf();
    if let Err(e) = path.close() {
        log::warn!("pipeline: failed to remove {}: {}", display.display(), e);
    }
}

fn artifact_noun(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Image => "an image",
        ArtifactKind::File => "a file",
    }
}

fn download_failed_notice(kind: ArtifactKind, url: &str) -> String {
    format!(
        "Dify returned {}: {}, but the download failed.",
        artifact_noun(kind),
        url
    )
}

fn send_failed_notice(kind: ArtifactKind, url: &str) -> String {
    format!(
        "Dify returned {}: {}, but sending it failed.",
        artifact_noun(kind),
        url
    )
}
