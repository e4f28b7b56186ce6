// odom_node/src/lib.rs

//! The runnable side of the odometry tracker: configuration, logging, the
//! processing thread, the output topics and session replay. All estimation
//! logic lives in `odom_core`.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod publisher;
pub mod session;
pub mod topics;

pub use error::{NodeError, Result};
