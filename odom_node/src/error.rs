// odom_node/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the node binary. Configuration problems inside the
/// odometry pipeline are logged and defaulted instead; see `odom_core::error`.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to load node configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("failed to read session file \"{path}\": {source}")]
    SessionRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse session file \"{path}\": {source}")]
    SessionParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid session entry at stamp {stamp}: {message}")]
    SessionEntry { stamp: f64, message: String },

    #[error("failed to install the log subscriber: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("the processing thread is no longer running")]
    Disconnected,
}

impl From<figment::Error> for NodeError {
    fn from(e: figment::Error) -> Self {
        NodeError::Config(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
