// odom_node/src/logging.rs

use clap::ValueEnum;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tracing_fmt, reload, Registry};

use crate::error::{NodeError, Result};

/// Verbosity levels accepted by the `set_log_level` service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level \"{}\" (expected debug, info, warning or error)",
                other
            )),
        }
    }
}

/// Runtime handle on the installed log filter.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Swaps the process-wide verbosity.
    pub fn set_level(&self, level: LogLevel) -> bool {
        match self.handle.reload(LevelFilter::from(level)) {
            Ok(()) => {
                info!("odometry: Set log level to {}", level);
                true
            }
            Err(e) => {
                error!("odometry: cannot change log level: {}", e);
                false
            }
        }
    }

    pub fn current(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }
}

/// Installs the global subscriber. Without an explicit level, `RUST_LOG`
/// (a bare level such as `debug`) is used, then `info`.
pub fn init(level: Option<LogLevel>) -> Result<LogHandle> {
    let initial = level.map(LevelFilter::from).unwrap_or_else(|| {
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|v| v.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::INFO)
    });
    let (filter, handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| NodeError::Logging(e.to_string()))?;
    Ok(LogHandle { handle })
}
