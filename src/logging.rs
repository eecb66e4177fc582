use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport mode for the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// stdio transport (default) - for local MCP clients
    Stdio,
    /// Streamable HTTP transport - for remote/web access
    Stream,
}

/// Initialize logging for the given transport.
///
/// # stdio mode
/// - stderr stays silent (MCP clients treat handshake noise as a broken connection)
/// - file logging only when `log_file` is given
///
/// # Stream mode
/// - console (stderr) logging always on
/// - file logging in addition when `log_file` is given
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(mode: TransportMode, log_file: Option<&Path>) -> Result<()> {
    let console = match mode {
        TransportMode::Stream => Some(fmt::layer().with_writer(std::io::stderr)),
        TransportMode::Stdio => None,
    };

    let file = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
            Some(fmt::layer().with_writer(file).with_ansi(false))
        }
        None => None,
    };

    if console.is_none() && file.is_none() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
