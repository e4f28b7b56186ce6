// odom_node/src/main.rs

//! Replays a recorded session through the odometry tracking node.
//!
//! `cargo run -p odom_node -- --config odom_node/assets/node.toml --session odom_node/assets/sessions/straight_line.toml`

use clap::Parser;
use odom_core::frames::TfBuffer;
use odom_node::cli::Cli;
use odom_node::config::NodeConfig;
use odom_node::node::OdometryNode;
use odom_node::session::{replay, Session};
use odom_node::topics::TopicBus;
use odom_node::{logging, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init(cli.log_level)?;

    let mut config = NodeConfig::load(cli.config.as_deref())?;
    if let Some(modality) = cli.modality {
        config.modality = modality;
    }

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let cwd = std::env::current_dir()?;

    let tf = Arc::new(TfBuffer::default());
    let bus = Arc::new(Mutex::new(TopicBus::default()));
    let node = OdometryNode::from_config(
        &config,
        &cli.params,
        Arc::clone(&tf),
        Arc::clone(&bus),
        Some(log),
        home.as_deref(),
        &cwd,
    );

    let session = Session::load(&cli.session)?;
    let handle = node.spawn();
    let summary = replay(&session, &tf, &handle);
    let stats = handle.shutdown()?;
    let summary = summary?;

    info!(
        "Session done: {} frames, {} tracked, {} lost, {} recoveries, {} aborted, {} paused",
        summary.frames,
        summary.tracked,
        summary.lost,
        summary.recoveries,
        summary.aborted,
        summary.paused
    );
    info!(
        "Services: {} ok, {} failed; {} frames flushed by resets",
        summary.services_ok, summary.services_failed, stats.flushed
    );
    Ok(())
}
