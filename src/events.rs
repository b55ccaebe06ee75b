use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Which remote service a chat session talks to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChatMode {
    /// OpenAI Assistants API: context lives in a server-side thread
    #[default]
    Assistant,
    /// Perplexity-style chat completions: the whole transcript is resent
    Completion,
}

impl ChatMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            ChatMode::Assistant => "Assistant",
            ChatMode::Completion => "Completion",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ChatMode::Assistant => "OpenAI Assistants API with a persistent thread",
            ChatMode::Completion => "Perplexity chat completions with the full transcript",
        }
    }

    /// Name of the remote service, used in error messages and logs.
    pub fn service(&self) -> &'static str {
        match self {
            ChatMode::Assistant => "OpenAI",
            ChatMode::Completion => "Perplexity",
        }
    }

    pub fn other(&self) -> ChatMode {
        match self {
            ChatMode::Assistant => ChatMode::Completion,
            ChatMode::Completion => ChatMode::Assistant,
        }
    }
}

/// Role in conversation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One role-tagged message. Serializes to the chat-completions message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
