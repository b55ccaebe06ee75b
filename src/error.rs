//! Error types for chat requests and streams

use thiserror::Error;

/// Errors that can occur while running a chat cycle
#[derive(Error, Debug)]
pub enum ChatError {
    /// No usable API key; the request was never sent
    #[error("No API key configured for {service}. Use /key <value> or set {env_var}.")]
    MissingApiKey {
        service: &'static str,
        env_var: String,
    },

    /// The remote service answered with a non-success status
    #[error("{service} API error ({status}): {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// Transport failure before or while reading a response
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service reported an error inside the stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// A non-streaming response body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The stream failed after some text had already arrived
    #[error("Reply interrupted after {} characters: {source}", .partial.chars().count())]
    Interrupted {
        partial: String,
        committed: bool,
        #[source]
        source: Box<ChatError>,
    },
}

impl ChatError {
    /// Whether the remote service rejected the credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Api { status: 401 | 403, .. })
    }

    /// Whether the connection itself failed, as opposed to the service
    /// reporting an error
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatError::Http(_))
    }
}

/// Result type for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
