use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::events::ChatMode;
use crate::protocol::Fragment;

/// Marker painted after the partial reply while a cursor-style stream runs
pub const CURSOR_MARKER: &str = "▌";

/// Surface that shows the reply as it grows
pub trait DisplaySink {
    fn clear(&mut self);

    /// Replace whatever is shown with `text`
    fn show(&mut self, text: &str);

    /// Final paint once the stream has ended
    fn settle(&mut self, text: &str) {
        self.show(text);
    }
}

impl<T: DisplaySink + ?Sized> DisplaySink for &mut T {
    fn clear(&mut self) {
        (**self).clear();
    }

    fn show(&mut self, text: &str) {
        (**self).show(text);
    }

    fn settle(&mut self, text: &str) {
        (**self).settle(text);
    }
}

/// How the sink is updated while fragments arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    /// Clear and repaint on every fragment that carries text
    Replace,
    /// Repaint with a trailing cursor on every fragment, then settle once
    Cursor,
}

impl RenderStyle {
    pub fn for_mode(mode: ChatMode) -> Self {
        match mode {
            ChatMode::Assistant => RenderStyle::Replace,
            ChatMode::Completion => RenderStyle::Cursor,
        }
    }
}

/// Running concatenation of deltas for one reply
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    text_buffer: String,
    fragments: usize,
    deltas: usize,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment. Returns true when it carried text.
    pub fn push_fragment<F: Fragment + ?Sized>(&mut self, fragment: &F) -> bool {
        self.fragments += 1;
        match fragment.delta() {
            Some(delta) if !delta.is_empty() => {
                self.text_buffer.push_str(delta);
                self.deltas += 1;
                true
            }
            _ => false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn deltas(&self) -> usize {
        self.deltas
    }

    pub fn into_text(self) -> String {
        self.text_buffer
    }
}

/// A stream ended with an error; `partial` holds what arrived before it
#[derive(Debug, Error)]
#[error("stream failed after {} characters: {source}", .partial.chars().count())]
pub struct StreamFailure {
    pub partial: String,
    #[source]
    pub source: ChatError,
}

/// Drains a fragment stream into a display sink and returns the full reply
pub struct StreamController<D: DisplaySink> {
    sink: D,
    style: RenderStyle,
    state: StreamState,
}

impl<D: DisplaySink> StreamController<D> {
    pub fn new(sink: D, style: RenderStyle) -> Self {
        Self {
            sink,
            style,
            state: StreamState::new(),
        }
    }

    /// Apply one fragment to the buffer and the sink
    pub fn process_fragment<F: Fragment + ?Sized>(&mut self, fragment: &F) {
        let has_text = self.state.push_fragment(fragment);
        match self.style {
            RenderStyle::Replace => {
                if has_text {
                    self.sink.clear();
                    self.sink.show(self.state.text());
                }
            }
            RenderStyle::Cursor => {
                let painted = format!("{}{}", self.state.text(), CURSOR_MARKER);
                self.sink.show(&painted);
            }
        }
    }

    /// Called once the stream has run out of fragments
    fn finish(&mut self) {
        if self.style == RenderStyle::Cursor {
            self.sink.settle(self.state.text());
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Consume `stream` until it ends or fails
    pub async fn consume<S, F>(mut self, stream: S) -> Result<String, StreamFailure>
    where
        S: Stream<Item = Result<F, ChatError>>,
        F: Fragment,
    {
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => self.process_fragment(&fragment),
                Err(source) => {
                    warn!(
                        "Stream failed after {} fragments: {}",
                        self.state.fragments(),
                        source
                    );
                    self.finish();
                    return Err(StreamFailure {
                        partial: self.state.into_text(),
                        source,
                    });
                }
            }
        }

        self.finish();
        debug!(
            "Stream complete: {} fragments, {} with text, {} characters",
            self.state.fragments(),
            self.state.deltas(),
            self.state.text().len()
        );
        Ok(self.state.into_text())
    }
}
