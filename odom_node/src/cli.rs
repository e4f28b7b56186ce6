// odom_node/src/cli.rs

use clap::Parser;
use odom_core::params::{parse_assignment, OdometryModality};
use std::path::PathBuf;

use crate::logging::LogLevel;

/// Odometry tracking node: replays a recorded session through the tracking loop.
///
/// This struct defines the command-line arguments accepted by the node binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The node configuration TOML file. Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The session TOML file to replay.
    #[arg(short, long)]
    pub session: PathBuf,

    /// Engine parameter override as `Group/Name=Value`. May be repeated.
    #[arg(short = 'p', long = "param", value_parser = parse_assignment)]
    pub params: Vec<(String, String)>,

    /// Initial verbosity. Falls back to `RUST_LOG`, then `info`.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Sensing modality (rgbd, stereo, icp, rgbd_icp). Overrides the config file.
    #[arg(long)]
    pub modality: Option<OdometryModality>,
}
