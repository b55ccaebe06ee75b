use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::ChatAgent;
use crate::config::Config;
use crate::events::ChatMode;
use crate::session::ChatSession;
use crate::ui::conversation::{ConversationAction, ConversationManager};
use crate::ui::TerminalSink;

/// Interactive chat until /bye or end of input
pub async fn run_chat(config: Config, mode: ChatMode) -> Result<()> {
    let mut manager = ConversationManager::new(config, mode)?;
    manager.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read user input")?
        else {
            break;
        };

        if manager.handle_line(&line).await? == ConversationAction::Exit {
            break;
        }
    }

    Ok(())
}

/// Send a single prompt and print the streamed reply
pub async fn ask(config: Config, mode: ChatMode, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt cannot be empty");
    }

    let agent = ChatAgent::from_config(&config, mode)?;
    let mut session = ChatSession::new(mode).with_api_key(config.api_key(mode));
    let mut sink = TerminalSink::stdout();

    let result = agent.submit(&mut session, prompt, &mut sink).await;
    sink.end_reply()?;
    result.context("Chat request failed")?;
    Ok(())
}

/// Print the effective configuration with keys masked
pub fn show_config(config: &Config, path: &Path) -> Result<()> {
    let content =
        toml::to_string_pretty(&config.redacted()).context("Failed to serialize config")?;
    println!("# {}", path.display());
    println!("{}", content);
    Ok(())
}
