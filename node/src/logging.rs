//! # Logging
//!
//! One `tracing` subscriber for the whole node, installed by `deploy` and
//! `run`. Operators pick the line format; `RUST_LOG` picks the verbosity.
//!
//! Logs go to stderr. Stdout is reserved for what the commands print: the
//! deployment summary, `status`, `keygen`.

use anyhow::Result;
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How each log line is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Colored, multi-field lines with source locations. For a terminal.
    #[default]
    Pretty,
    /// One JSON object per line. For a log shipper.
    Json,
}

/// Builds the level filter: `RUST_LOG` if set and valid, else `fallback`.
fn level_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the node's subscriber. Errors if one is already installed.
///
/// `fallback` uses `EnvFilter` directive syntax, for example
/// `heirloom_node=debug,heirloom_contracts=debug,tower_http=info`.
pub fn init_logging(fallback: &str, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(level_filter(fallback));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()?,
    }

    tracing::debug!(?format, "logging ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(LogFormat::from_str("json", true), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("JSON", true), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("pretty", true), Ok(LogFormat::Pretty));
        assert!(LogFormat::from_str("xml", true).is_err());
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn second_install_is_an_error() {
        let _ = init_logging("warn", LogFormat::Json);
        assert!(init_logging("warn", LogFormat::Pretty).is_err());
    }
}
