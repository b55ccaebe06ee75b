use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qgen::commands;
use qgen::config::Config;
use qgen::events::ChatMode;

#[derive(Parser)]
#[command(name = "qgen")]
#[command(version)]
#[command(about = "Chat with an OpenAI assistant or a Perplexity model from the terminal", long_about = None)]
struct Cli {
    /// Which service to talk to (defaults to the configured mode)
    #[arg(long, value_enum, global = true)]
    mode: Option<ChatMode>,

    /// Path to the config file (defaults to ~/.qgen/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Ask a single question and print the reply
    Ask { prompt: Vec<String> },
    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration with keys masked
    Show,
    /// Print the config file location
    Path,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_from(&path)?;
    let mode = cli.mode.unwrap_or(config.default_mode);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => commands::run_chat(config, mode).await,
        Commands::Ask { prompt } => commands::ask(config, mode, &prompt.join(" ")).await,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::show_config(&config, &path),
            ConfigAction::Path => {
                println!("{}", path.display());
                Ok(())
            }
        },
    }
}
