//! Wire types for the two streaming protocols.
//!
//! Assistants runs stream named SSE events, of which only
//! `thread.message.delta` carries text. Chat completions stream anonymous
//! `data:` chunks whose first choice may carry a content delta. Anything we
//! do not recognise maps to an explicit "no delta" value instead of an error.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};

pub const EVENT_MESSAGE_DELTA: &str = "thread.message.delta";
pub const EVENT_RUN_FAILED: &str = "thread.run.failed";
pub const EVENT_RUN_CANCELLED: &str = "thread.run.cancelled";
pub const EVENT_RUN_EXPIRED: &str = "thread.run.expired";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DONE: &str = "done";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One unit of a streamed reply
pub trait Fragment {
    /// Text carried by this fragment, if any
    fn delta(&self) -> Option<&str>;
}

/// Event from an Assistants run stream
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    MessageDelta(MessageDelta),
    /// Any other event type, kept by name for logging
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub id: Option<String>,
    pub delta: MessageDeltaBody,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub content: Vec<DeltaBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaBlock {
    Text {
        #[serde(default)]
        text: Option<TextDelta>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub value: Option<String>,
}

impl AssistantEvent {
    /// Build an event from an SSE `event:` name and `data:` payload.
    ///
    /// Returns `Ok(None)` at the protocol's end marker and `Err` for in-band
    /// failures (error events and runs that ended without completing).
    pub fn from_sse(event: &str, data: &str) -> Result<Option<Self>> {
        if event == EVENT_DONE || data.trim() == DONE_SENTINEL {
            return Ok(None);
        }

        match event {
            EVENT_MESSAGE_DELTA => match serde_json::from_str::<MessageDelta>(data) {
                Ok(delta) => Ok(Some(AssistantEvent::MessageDelta(delta))),
                Err(e) => {
                    warn!("Skipping malformed {} event: {}", event, e);
                    Ok(Some(AssistantEvent::Other(event.to_string())))
                }
            },
            EVENT_ERROR => Err(ChatError::Stream(
                error_message(data).unwrap_or_else(|| "An error occurred during streaming".into()),
            )),
            EVENT_RUN_FAILED => {
                let reason = serde_json::from_str::<RunObject>(data)
                    .ok()
                    .and_then(|run| run.last_error)
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no reason given".to_string());
                Err(ChatError::Stream(format!("Run failed: {}", reason)))
            }
            EVENT_RUN_CANCELLED | EVENT_RUN_EXPIRED => {
                Err(ChatError::Stream(format!("Run ended early ({})", event)))
            }
            other => {
                debug!("Ignoring assistant stream event {}", other);
                Ok(Some(AssistantEvent::Other(other.to_string())))
            }
        }
    }
}

impl Fragment for AssistantEvent {
    fn delta(&self) -> Option<&str> {
        match self {
            AssistantEvent::MessageDelta(message) => match message.delta.content.first() {
                Some(DeltaBlock::Text { text: Some(text) }) => text.value.as_deref(),
                Some(DeltaBlock::Text { text: None }) | Some(DeltaBlock::Unsupported) | None => {
                    None
                }
            },
            AssistantEvent::Other(_) => None,
        }
    }
}

/// Chunk from a chat-completions stream
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionChunk {
    /// Build a chunk from an SSE `data:` payload; `Ok(None)` at `[DONE]`.
    pub fn from_sse(data: &str) -> Result<Option<Self>> {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(None);
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping malformed completion chunk: {}", e);
                return Ok(Some(CompletionChunk::default()));
            }
        };

        if value.get("error").is_some() {
            return Err(ChatError::Stream(
                error_message(data).unwrap_or_else(|| "An error occurred during streaming".into()),
            ));
        }

        match serde_json::from_value(value) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(e) => {
                warn!("Skipping completion chunk with unexpected shape: {}", e);
                Ok(Some(CompletionChunk::default()))
            }
        }
    }
}

impl Fragment for CompletionChunk {
    fn delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

/// `GET /assistants/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /threads`
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RunObject {
    #[serde(default)]
    last_error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorObject {
    #[serde(default)]
    message: String,
}

/// Pull a human-readable message out of an error payload. Accepts both
/// `{"error": {"message": ..}}` and a bare `{"message": ..}`.
pub fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    error.as_str().map(|s| s.to_string())
}
