//! Configuration types and loading.
//!
//! Config is loaded from a YAML file (e.g. `~/.dify-relay/config.yaml`) and environment.
//! A missing file is not an error: every field can come from the environment instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Persona injected as inputs `role` for chat and completion calls when the caller sets none.
pub const DEFAULT_ROLE: &str = "员工";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dify backend settings.
    #[serde(default)]
    pub dify: DifyConfig,

    /// WeCom group robot settings.
    #[serde(default)]
    pub wecom: WeComConfig,
}

/// Dify API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifyConfig {
    /// Bearer token for the Dify app. Overridden by DIFY_API_KEY env.
    #[serde(default)]
    pub api_key: String,

    /// API root, e.g. "https://api.dify.ai". Overridden by DIFY_BASE_URL env.
    #[serde(default)]
    pub base_url: String,

    /// "chat", "completion" or "workflow". Kept as text so an unknown value surfaces as a
    /// configuration error at dispatch time rather than a parse failure at load time.
    #[serde(default = "default_bot_type")]
    pub bot_type: String,

    /// Workflow id, only used when bot_type is "workflow".
    #[serde(default)]
    pub workflow_id: String,

    /// Prompt used when an inbound message arrives empty.
    #[serde(default)]
    pub default_prompt: String,

    /// Value for the `role` input variable.
    #[serde(default = "default_role")]
    pub default_role: String,
}

fn default_bot_type() -> String {
    BotType::Chat.as_str().to_string()
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Default for DifyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            bot_type: default_bot_type(),
            workflow_id: String::new(),
            default_prompt: String::new(),
            default_role: default_role(),
        }
    }
}

/// WeCom group robot settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeComConfig {
    /// Robot webhook, e.g. "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=...".
    /// Overridden by WECHAT_WEBHOOK_URL env.
    #[serde(default)]
    pub webhook_url: String,
}

/// Request/response protocol of the Dify app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotType {
    Chat,
    Completion,
    Workflow,
}

impl BotType {
    pub fn as_str(self) -> &'static str {
        match self {
            BotType::Chat => "chat",
            BotType::Completion => "completion",
            BotType::Workflow => "workflow",
        }
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(BotType::Chat),
            "completion" => Ok(BotType::Completion),
            "workflow" => Ok(BotType::Workflow),
            _ => Err(ConfigError::UnsupportedBotType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported dify bot type: {0:?}")]
    UnsupportedBotType(String),
    #[error("{0} is not configured")]
    Missing(&'static str),
}

impl Config {
    /// Bot type parsed from `dify.bot_type`.
    pub fn bot_type(&self) -> Result<BotType, ConfigError> {
        self.dify.bot_type.parse()
    }

    /// Check that everything needed to relay a message is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dify.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("dify.api_key"));
        }
        if self.dify.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("dify.base_url"));
        }
        if self.wecom.webhook_url.trim().is_empty() {
            return Err(ConfigError::Missing("wecom.webhook_url"));
        }
        let bot_type = self.bot_type()?;
        if bot_type == BotType::Workflow && self.dify.workflow_id.trim().is_empty() {
            log::warn!("dify.bot_type is workflow but dify.workflow_id is empty");
        }
        Ok(())
    }

    /// Apply environment overrides. Empty or whitespace-only values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Same as [`Config::apply_env`] with a custom variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = get("DIFY_API_KEY") {
            self.dify.api_key = v;
        }
        if let Some(v) = get("DIFY_BASE_URL") {
            self.dify.base_url = v;
        }
        if let Some(v) = get("DIFY_BOT_TYPE") {
            self.dify.bot_type = v;
        }
        if let Some(v) = get("DIFY_WORKFLOW_ID") {
            self.dify.workflow_id = v;
        }
        if let Some(v) = get("DIFY_DEFAULT_PROMPT") {
            self.dify.default_prompt = v;
        }
        if let Some(v) = get("WECHAT_WEBHOOK_URL") {
            self.wecom.webhook_url = v;
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".dify-relay").join("config.yaml"))
                .unwrap_or_else(|| PathBuf::from("config.yaml"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Environment overrides are applied on top. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        parse_config(&s).with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_env();
    Ok((config, path))
}

/// Parse YAML config text. An empty document yields the default config.
pub fn parse_config(s: &str) -> Result<Config> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(s)?)
}
