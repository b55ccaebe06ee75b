//! Terminal chat client for the OpenAI Assistants API and
//! Perplexity-compatible chat completions, with incremental rendering of
//! streamed replies.

pub mod agent;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod llm;
pub mod protocol;
pub mod session;
pub mod streaming;
pub mod ui;

pub use agent::{Backend, ChatAgent};
pub use conversation::Conversation;
pub use error::{ChatError, Result};
pub use events::{ChatMode, Role, Turn};
pub use session::{ChatSession, ThreadId};
pub use streaming::{DisplaySink, RenderStyle, StreamController};
