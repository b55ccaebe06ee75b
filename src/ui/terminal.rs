//! Terminal display sink

use crossterm::{
    cursor::MoveLeft,
    queue,
    style::{Print, PrintStyledContent, Stylize},
    terminal::{Clear, ClearType},
};
use std::io::{self, Stdout, Write};
use tracing::warn;
use unicode_width::UnicodeWidthStr;

use crate::events::{Role, Turn};
use crate::streaming::DisplaySink;

/// Writes turns and the growing reply to a terminal.
///
/// Repaints are incremental: only the part of the text that changed since
/// the last paint is rewritten, so a reply that grows by appends never
/// flickers.
pub struct TerminalSink<W: Write> {
    out: W,
    shown: String,
}

impl TerminalSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    /// Text of the reply currently on screen
    pub fn shown(&self) -> &str {
        &self.shown
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print a complete role-tagged turn
    pub fn render_turn(&mut self, turn: &Turn) -> io::Result<()> {
        self.print_label(turn.role())?;
        queue!(self.out, Print(turn.content()), Print("\n"))?;
        self.out.flush()
    }

    /// Print the assistant label and start a fresh reply
    pub fn begin_reply(&mut self) -> io::Result<()> {
        self.shown.clear();
        self.print_label(Role::Assistant)?;
        self.out.flush()
    }

    /// Leave the reply on screen and move to the next line
    pub fn end_reply(&mut self) -> io::Result<()> {
        self.shown.clear();
        queue!(self.out, Print("\n"))?;
        self.out.flush()
    }

    pub fn notice(&mut self, message: &str) -> io::Result<()> {
        queue!(self.out, PrintStyledContent(message.dark_grey()), Print("\n"))?;
        self.out.flush()
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        queue!(
            self.out,
            PrintStyledContent("❌ Error: ".red()),
            Print(message),
            Print("\n")
        )?;
        self.out.flush()
    }

    /// Print raw text, e.g. banners and help
    pub fn text(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, Print(text), Print("\n"))?;
        self.out.flush()
    }

    fn print_label(&mut self, role: Role) -> io::Result<()> {
        let label = match role {
            Role::User => "👤 You: ".blue(),
            Role::Assistant => "🤖 Assistant: ".green(),
            Role::System => "⚙️ System: ".yellow(),
        };
        queue!(self.out, PrintStyledContent(label))
    }

    fn repaint(&mut self, text: &str) -> io::Result<()> {
        let common = common_prefix_len(&self.shown, text);
        let stale = &self.shown[common..];

        if stale.contains('\n') {
            // the cursor cannot walk back over a line break; paint below
            queue!(self.out, Print("\n"), Print(text))?;
        } else {
            let back = u16::try_from(stale.width()).unwrap_or(u16::MAX);
            if back > 0 {
                queue!(self.out, MoveLeft(back), Clear(ClearType::UntilNewLine))?;
            }
            queue!(self.out, Print(&text[common..]))?;
        }

        self.out.flush()?;
        self.shown = text.to_string();
        Ok(())
    }
}

impl<W: Write> DisplaySink for TerminalSink<W> {
    fn clear(&mut self) {
        // show() always follows and repaints by diff; erasing here would flicker
    }

    fn show(&mut self, text: &str) {
        if let Err(e) = self.repaint(text) {
            warn!("Failed to write to terminal: {}", e);
        }
    }
}

/// Length in bytes of the longest common prefix, on a char boundary
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}
