//! Logging utilities
//!
//! Informational output goes to stdout and problems to stderr, so a cluster
//! task's `.out` and `.err` files each hold what they should.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    /// `-v` once only adds detail to the printed results
    pub fn from_verbosity(verbose: u8) -> Self {
        if verbose > 1 {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
        }
    }

    fn directive(self) -> String {
        format!("runtests={}", self.to_tracing_level())
    }
}

/// Initialize the logger. `RUST_LOG` overrides the level for the console.
/// With `debug_file`, everything at DEBUG and above is also written there.
pub fn init_logger(level: LogLevel, debug_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout))
        .with_filter(filter);

    let file_layer = match debug_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create debug log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}
