//! Logging service

use crate::models::LogLevel;
use tracing_subscriber::EnvFilter;

/// Crates whose events the configured level applies to.
const LOG_TARGETS: &[&str] = &["pingme", "pingme_core", "warp"];

/// Filter directives for `level`, e.g. `pingme=info,pingme_core=info,warp=info`.
pub fn filter_directives(level: LogLevel) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging with the specified level. `RUST_LOG` takes precedence when set.
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}
