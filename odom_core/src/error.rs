// odom_core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing the odometry pipeline.
///
/// None of these are fatal for a running node: callers log them and fall back
/// to defaults. Transform lookups have their own error type,
/// [`crate::frames::TransformError`].
#[derive(Error, Debug)]
pub enum OdomError {
    #[error("config file \"{0}\" not found")]
    ConfigNotFound(PathBuf),

    #[error("failed to read config file \"{path}\": {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file \"{path}\": {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("wrong initial_pose format: \"{0}\" (should be \"x y z roll pitch yaw\" with angles in radians)")]
    InitialPoseFormat(String),

    #[error("parameter \"{key}\" has an invalid value \"{value}\"")]
    InvalidParameter { key: String, value: String },

    #[error("unknown odometry strategy {0}")]
    UnknownStrategy(i64),
}

pub type Result<T> = std::result::Result<T, OdomError>;
