//! Interactive chat: slash commands and the per-line event handler

pub mod commands;
pub mod manager;

pub use commands::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};
pub use manager::{ConversationAction, ConversationManager};
