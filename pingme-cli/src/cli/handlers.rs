//! CLI command handlers

use anyhow::{Context, Result};
use chrono::Local;
use pingme_core::client::{Reporter, RunReport};
use pingme_core::models::{Configuration, DestinationId, LogLevel};
use pingme_core::server::providers::TelegramClient;
use pingme_core::server::RelayServer;
use pingme_core::services::init_logging;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;

/// Relay URL used when neither --server nor PINGME_SERVER is given.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

/// Stderr lines kept for crash reports.
const STDERR_TAIL_LINES: usize = 20;

/// Handle the 'serve' command
pub async fn handle_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config =
        Configuration::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Err(e) = init_logging(config.log_level) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    // Missing API token aborts here, before anything is bound
    let relay_config = config.into_relay_config()?;

    let telegram = Arc::new(
        TelegramClient::new(relay_config.api_token.clone())
            .with_poll_timeout(relay_config.poll_timeout),
    );

    match telegram.get_me().await {
        Ok(me) => tracing::info!(
            id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            first_name = %me.first_name,
            "Bot info"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not fetch bot info"),
    }

    RelayServer::new(relay_config, telegram.clone())
        .with_discovery(telegram)
        .start()
        .await
}

/// Handle the 'send' command
pub async fn handle_send(messages: Vec<String>, server: String, path: String) -> Result<()> {
    let _ = init_logging(LogLevel::Warn);

    let mut reporter = Reporter::new(&server, &path).context("Invalid relay address")?;
    let count = messages.len();

    reporter
        .send_all(messages)
        .await
        .context("Failed to deliver notifications to relay")?;

    println!("📤 {} notification(s) accepted by {}", count, reporter.endpoint());
    Ok(())
}

/// Handle the 'run' command. Returns the exit code to terminate with.
pub async fn handle_run(command: Vec<String>, server: String, path: String) -> Result<i32> {
    let _ = init_logging(LogLevel::Warn);

    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("No command given"))?;

    let mut reporter = Reporter::new(&server, &path).context("Invalid relay address")?;
    let report = RunReport::start_now(&command);

    if report.is_primary() {
        reporter.send(report.started()).await?;
    }

    let mut child = match tokio::process::Command::new(program)
        .args(args)
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let error = format!("Failed to start {}: {}", program, e);
            reporter
                .send(report.crashed(Local::now(), &error, ""))
                .await?;
            return Err(anyhow::anyhow!(error));
        }
    };

    let tail = tokio::spawn(collect_stderr_tail(child.stderr.take()));
    let status = child
        .wait()
        .await
        .context("Failed to wait for command")?;
    let stderr_tail = tail.await.unwrap_or_default();
    let ended_at = Local::now();

    if status.success() {
        if report.is_primary() {
            reporter
                .send(report.completed(ended_at, &status.to_string()))
                .await?;
        }
    } else {
        reporter
            .send(report.crashed(ended_at, &status.to_string(), &stderr_tail))
            .await?;
    }

    Ok(status.code().unwrap_or(1))
}

/// Mirror the child's stderr and keep its last lines.
async fn collect_stderr_tail(stderr: Option<ChildStderr>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("{}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// Handle the 'config' command
pub fn handle_config(config_path: Option<PathBuf>) -> Result<()> {
    let config =
        Configuration::load(config_path.as_deref()).context("Failed to load configuration")?;

    let path = match config_path {
        Some(path) => path,
        None => Configuration::default_config_path()?,
    };
    println!("📄 Config file: {}", path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    print!("{}", config.to_redacted_toml()?);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut problems = Vec::new();
    if config.api_token.is_none() {
        problems.push("API_TOKEN is not set; the relay will not start".to_string());
    }
    if config.chat_id.as_ref().map_or(true, DestinationId::is_unset) {
        problems.push("CHAT_ID is not set; the ingestion endpoint is disabled".to_string());
    }
    if let Err(errors) = config.validate() {
        problems.extend(errors);
    }

    if problems.is_empty() {
        println!("✅ Configuration is valid");
    } else {
        for problem in problems {
            println!("⚠️  {}", problem);
        }
    }

    Ok(())
}
