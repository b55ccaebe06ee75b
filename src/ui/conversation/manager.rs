use anyhow::Result;
use std::io::{Stdout, Write};
use tracing::{info, warn};

use crate::agent::ChatAgent;
use crate::config::{mask_key, Config};
use crate::error::ChatError;
use crate::events::{ChatMode, Turn};
use crate::session::ChatSession;
use crate::ui::conversation::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};
use crate::ui::terminal::TerminalSink;

/// What the input loop should do after a line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAction {
    Continue,
    Exit,
}

/// Owns the session, the agent and the terminal for one interactive chat
pub struct ConversationManager<W: Write> {
    config: Config,
    agent: ChatAgent,
    session: ChatSession,
    sink: TerminalSink<W>,
}

impl ConversationManager<Stdout> {
    pub fn new(config: Config, mode: ChatMode) -> Result<Self> {
        Self::with_writer(config, mode, std::io::stdout())
    }
}

impl<W: Write> ConversationManager<W> {
    pub fn with_writer(config: Config, mode: ChatMode, out: W) -> Result<Self> {
        let agent = ChatAgent::from_config(&config, mode)?;
        Ok(Self::with_agent(config, agent, TerminalSink::new(out)))
    }

    pub fn with_agent(config: Config, agent: ChatAgent, sink: TerminalSink<W>) -> Self {
        let mode = agent.mode();
        let session = ChatSession::new(mode).with_api_key(config.api_key(mode));
        Self {
            config,
            agent,
            session,
            sink,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn into_sink(self) -> TerminalSink<W> {
        self.sink
    }

    /// Print the banner and, in assistant mode, who we are talking to
    pub async fn start(&mut self) -> Result<()> {
        let mode = self.session.mode();
        self.sink.text(&format!("💬 Qgenerator ({} mode)", mode.display_name()))?;
        self.sink.notice(mode.description())?;
        self.sink.notice("Type /help for commands.")?;

        if !self.session.has_api_key() {
            self.prompt_for_key()?;
            return Ok(());
        }

        match self.agent.describe_assistant(&self.session).await {
            Ok(Some(info)) => {
                let name = info.name.as_deref().unwrap_or(&info.id);
                let model = info.model.as_deref().unwrap_or("unknown model");
                self.sink.notice(&format!("Talking to {} ({})", name, model))?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Could not retrieve assistant: {}", e);
                self.sink.notice(&format!("Could not retrieve assistant: {}", e))?;
            }
        }
        Ok(())
    }

    fn prompt_for_key(&mut self) -> Result<()> {
        let mode = self.session.mode();
        self.sink.notice(&format!(
            "🗝️ Please add your {} API key to continue: /key <value> (or set {}).",
            mode.service(),
            self.config.api_key_env(mode)
        ))?;
        Ok(())
    }

    /// Handle one submitted line
    pub async fn handle_line(&mut self, line: &str) -> Result<ConversationAction> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ConversationAction::Continue);
        }

        if let Some(command) = parse_slash_command(line) {
            return self.handle_slash_command(command);
        }

        self.handle_input(line).await?;
        Ok(ConversationAction::Continue)
    }

    /// Send a user turn and stream the reply
    async fn handle_input(&mut self, input: &str) -> Result<()> {
        if !self.session.has_api_key() {
            return self.prompt_for_key();
        }

        self.sink.render_turn(&Turn::user(input))?;
        self.sink.begin_reply()?;

        let outcome = self
            .agent
            .submit(&mut self.session, input, &mut self.sink)
            .await;
        self.sink.end_reply()?;

        match outcome {
            Ok(_) => {}
            Err(ChatError::MissingApiKey { .. }) => self.prompt_for_key()?,
            Err(ChatError::Interrupted {
                committed, source, ..
            }) => {
                let fate = if committed {
                    "partial reply kept"
                } else {
                    "partial reply discarded"
                };
                self.sink
                    .error(&format!("Reply interrupted: {} ({})", source, fate))?;
            }
            Err(e) if e.is_auth() => {
                self.sink.error(&e.to_string())?;
                self.prompt_for_key()?;
            }
            Err(e) => self.sink.error(&e.to_string())?,
        }
        Ok(())
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, command: ParsedCommand) -> Result<ConversationAction> {
        match command.command {
            SlashCommand::Clear => {
                self.session.clear();
                self.sink.notice("Started a new conversation.")?;
            }
            SlashCommand::History => {
                if self.session.history().is_empty() {
                    self.sink.notice("No messages yet.")?;
                }
                for turn in self.session.history() {
                    self.sink.render_turn(turn)?;
                }
            }
            SlashCommand::Key => match command.argument() {
                Some(key) => {
                    let mode = self.session.mode();
                    self.session.set_api_key(key);
                    self.config.set_api_key(mode, key.trim().to_string());
                    info!("API key updated for {} mode", mode);
                    self.sink
                        .notice(&format!("Using {} API key {}", mode.service(), mask_key(key.trim())))?;
                }
                None => self.prompt_for_key()?,
            },
            SlashCommand::Mode => {
                let target = command
                    .mode_target()
                    .unwrap_or_else(|| self.session.mode().other());
                self.switch_mode(target)?;
            }
            SlashCommand::Help => {
                self.sink.text(&get_help_text())?;
            }
            SlashCommand::Bye => {
                self.sink.notice("👋 Bye!")?;
                return Ok(ConversationAction::Exit);
            }
        }
        Ok(ConversationAction::Continue)
    }

    /// Start a fresh session talking to the other service
    fn switch_mode(&mut self, mode: ChatMode) -> Result<()> {
        if mode == self.session.mode() {
            self.sink
                .notice(&format!("Already in {} mode.", mode.display_name()))?;
            return Ok(());
        }

        self.agent = ChatAgent::from_config(&self.config, mode)?;
        self.session = ChatSession::new(mode).with_api_key(self.config.api_key(mode));
        self.sink.notice(&format!(
            "Switched to {} mode: {}",
            mode.display_name(),
            mode.description()
        ))?;
        if !self.session.has_api_key() {
            self.prompt_for_key()?;
        }
        Ok(())
    }
}
