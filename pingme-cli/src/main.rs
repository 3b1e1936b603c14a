mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::handlers;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pingme")]
#[command(version)]
#[command(about = "Relay application notifications into a Telegram chat")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    ///
    /// Reads API_TOKEN (required), CHAT_ID and PORT from the environment on
    /// top of the optional config file. Without CHAT_ID the ingestion
    /// endpoint is disabled; message the bot with /start to learn the id.
    ///
    /// Examples:
    ///   API_TOKEN=123:abc CHAT_ID=-1001234 pingme serve
    ///   pingme serve --config ./pingme.toml
    Serve {
        /// Path to configuration file (default: ~/.config/pingme/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Send notifications through a running relay
    ///
    /// Messages use Telegram's HTML subset. All messages go out as one batch
    /// and the command retries until the relay accepts them.
    ///
    /// Examples:
    ///   pingme send "<b>build passed</b>"
    ///   pingme send "deploy started" "deploy finished" --server http://relay:8080
    Send {
        /// Message texts, delivered in order
        #[arg(required = true)]
        messages: Vec<String>,

        /// Relay URL
        #[arg(long, env = "PINGME_SERVER", default_value = handlers::DEFAULT_SERVER)]
        server: String,

        /// Ingestion path on the relay
        #[arg(long, default_value = "pingme")]
        path: String,
    },

    /// Run a command and report its start, completion or crash
    ///
    /// Exits with the command's exit code. When RANK is set to a non-zero
    /// value only crashes are reported.
    ///
    /// Examples:
    ///   pingme run -- python train.py --epochs 10
    Run {
        /// Relay URL
        #[arg(long, env = "PINGME_SERVER", default_value = handlers::DEFAULT_SERVER)]
        server: String,

        /// Ingestion path on the relay
        #[arg(long, default_value = "pingme")]
        path: String,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show the effective configuration
    Config {
        /// Path to configuration file (default: ~/.config/pingme/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            handlers::handle_serve(config).await?;
        }
        Commands::Send {
            messages,
            server,
            path,
        } => {
            handlers::handle_send(messages, server, path).await?;
        }
        Commands::Run {
            server,
            path,
            command,
        } => {
            let code = handlers::handle_run(command, server, path).await?;
            std::process::exit(code);
        }
        Commands::Config { config } => {
            handlers::handle_config(config)?;
        }
    }

    Ok(())
}
