//! Tracing setup for the binary.
//!
//! Console output goes to stderr through a non-blocking writer, either compact
//! text or JSON lines. With a log directory a daily-rolling JSON file is added.
//! `RUST_LOG` always wins over the built-in default filter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "questforge=info,tower_http=info";
const VERBOSE_FILTER: &str = "questforge=debug,tower_http=debug";
const LOG_FILE_PREFIX: &str = "questforge.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub json: bool,
    pub dir: Option<PathBuf>,
}

impl LogOptions {
    fn default_directive(&self) -> &'static str {
        if self.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }
    }
}

/// Keeps the background writers alive; drop it only when the process exits.
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

pub fn init(options: &LogOptions) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let mut guards = Vec::new();

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    let console = if options.json {
        fmt::layer().json().with_writer(stderr).boxed()
    } else {
        fmt::layer().compact().with_writer(stderr).boxed()
    };

    let file = match &options.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_crate_level() {
        let quiet = LogOptions::default();
        let loud = LogOptions {
            verbose: true,
            ..LogOptions::default()
        };
        assert_eq!(quiet.default_directive(), DEFAULT_FILTER);
        assert!(loud.default_directive().contains("questforge=debug"));
    }

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
        assert!(VERBOSE_FILTER.parse::<EnvFilter>().is_ok());
    }
}
