use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::ChatMode;

pub const DEFAULT_ASSISTANT_ID: &str = "asst_q9HBwNTS9qcHq4eHUTmJH0jH";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an artificial intelligence assistant and you need to engage in a helpful, detailed, polite conversation with a user.";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mode used when none is given on the command line
    pub default_mode: ChatMode,

    /// What to do with text that arrived before a stream failed
    pub partial_reply: PartialReplyPolicy,

    /// Timeout for connecting and for non-streaming calls, in seconds
    pub request_timeout_secs: u64,

    pub openai: AssistantSettings,

    pub perplexity: CompletionSettings,
}

/// OpenAI Assistants API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub assistant_id: String,
}

/// Chat-completions API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub system_prompt: String,
}

/// Fate of a partial reply when the stream breaks off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialReplyPolicy {
    /// Keep the partial text as the assistant turn
    #[default]
    Commit,
    /// Drop it; the transcript only gets the user turn
    Discard,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_mode: ChatMode::Assistant,
            partial_reply: PartialReplyPolicy::Commit,
            request_timeout_secs: 60,
            openai: AssistantSettings::default(),
            perplexity: CompletionSettings::default(),
        }
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            assistant_id: DEFAULT_ASSISTANT_ID.to_string(),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.perplexity.ai".to_string(),
            api_key: None,
            api_key_env: "PERPLEXITY_API_KEY".to_string(),
            model: "llama-3.1-sonar-small-128k-online".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Default location: `~/.qgen/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".qgen").join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save configuration to `path`, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Environment variable consulted for the key of `mode`
    pub fn api_key_env(&self, mode: ChatMode) -> &str {
        match mode {
            ChatMode::Assistant => &self.openai.api_key_env,
            ChatMode::Completion => &self.perplexity.api_key_env,
        }
    }

    /// Get API key from config or environment
    pub fn api_key(&self, mode: ChatMode) -> Option<String> {
        let configured = match mode {
            ChatMode::Assistant => self.openai.api_key.as_deref(),
            ChatMode::Completion => self.perplexity.api_key.as_deref(),
        };

        configured
            .map(str::to_string)
            .or_else(|| std::env::var(self.api_key_env(mode)).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    /// Update API key
    pub fn set_api_key(&mut self, mode: ChatMode, key: String) {
        match mode {
            ChatMode::Assistant => self.openai.api_key = Some(key),
            ChatMode::Completion => self.perplexity.api_key = Some(key),
        }
    }

    /// Copy with keys masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.openai.api_key = config.openai.api_key.as_deref().map(mask_key);
        config.perplexity.api_key = config.perplexity.api_key.as_deref().map(mask_key);
        config
    }
}

/// Keep the first four characters, hide the rest
pub fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}…", visible)
}
