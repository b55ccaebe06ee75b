use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::mask_key;
use crate::conversation::Conversation;
use crate::events::{ChatMode, Turn};

/// Server-side thread identifier issued by the Assistants API
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State owned by one interactive chat session.
///
/// Created when the session starts and dropped when it ends; nothing here
/// outlives the process.
pub struct ChatSession {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    mode: ChatMode,
    conversation: Conversation,
    thread: Option<ThreadId>,
    api_key: Option<String>,
}

impl ChatSession {
    pub fn new(mode: ChatMode) -> Self {
        let session = Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            conversation: Conversation::new(),
            thread: None,
            api_key: None,
        };
        info!("Started {} session {}", mode, session.session_id);
        session
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        if let Some(key) = key {
            self.set_api_key(key);
        }
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    /// Store a new key; blank input removes the key.
    pub fn set_api_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        let key = key.trim();
        self.api_key = if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        };
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn history(&self) -> &[Turn] {
        self.conversation.history()
    }

    pub fn append(&mut self, turn: Turn) {
        self.conversation.append(turn);
    }

    pub fn thread(&self) -> Option<&ThreadId> {
        self.thread.as_ref()
    }

    pub fn set_thread(&mut self, thread: ThreadId) {
        debug!("Session {} bound to thread {}", self.session_id, thread);
        self.thread = Some(thread);
    }

    /// Forget the transcript and the server-side thread
    pub fn clear(&mut self) {
        self.conversation.clear();
        if let Some(thread) = self.thread.take() {
            debug!("Dropped thread {} for session {}", thread, self.session_id);
        }
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("session_id", &self.session_id)
            .field("started_at", &self.started_at)
            .field("mode", &self.mode)
            .field("conversation", &self.conversation)
            .field("thread", &self.thread)
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .finish()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        info!(
            "Ended session {} after {} turns",
            self.session_id,
            self.conversation.len()
        );
    }
}
