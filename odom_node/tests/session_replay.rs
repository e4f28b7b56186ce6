// odom_node/tests/session_replay.rs

use approx::assert_relative_eq;
use odom_core::prelude::*;
use odom_node::config::NodeConfig;
use odom_node::node::OdometryNode;
use odom_node::publisher::{TOPIC_ODOM, TOPIC_ODOM_INFO};
use odom_node::session::{replay, ReplaySummary, Session};
use odom_node::topics::TopicBus;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn asset(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("assets").join(name)
}

#[test]
fn test_bundled_session() {
    let config = NodeConfig::load(Some(&asset("node.toml"))).unwrap();
    let session = Session::load(&asset("sessions/straight_line.toml")).unwrap();

    let tf = Arc::new(TfBuffer::default());
    let bus = Arc::new(Mutex::new(TopicBus::default()));
    let node = OdometryNode::from_config(
        &config,
        &[],
        Arc::clone(&tf),
        Arc::clone(&bus),
        None,
        None,
        Path::new(env!("CARGO_MANIFEST_DIR")),
    );
    assert_eq!(node.supervisor().reset_countdown(), 2);

    let mut odom = bus.lock().subscribe::<OdometryMsg>(TOPIC_ODOM).unwrap();
    let mut info = bus.lock().subscribe::<OdomInfoMsg>(TOPIC_ODOM_INFO).unwrap();

    let handle = node.spawn();
    let summary = replay(&session, &tf, &handle).unwrap();
    let stats = handle.shutdown().unwrap();

    assert_eq!(
        summary,
        ReplaySummary {
            frames: 8,
            tracked: 7,
            lost: 1,
            recoveries: 0,
            aborted: 0,
            paused: 0,
            services_ok: 2,
            services_failed: 0,
        }
    );
    assert_eq!(stats.tracked, 7);
    assert_eq!(stats.flushed, 0);

    let bus = bus.lock();
    let odom = odom.drain(&bus);
    assert_eq!(odom.len(), 8);
    assert!(odom[4].is_lost());
    // Guesses follow the wheel odometry, 0.1 m per frame.
    assert_relative_eq!(odom[3].pose.translation.vector.x, 0.3, epsilon = 1e-9);
    // Reset to 0.6 between frames 6 and 7, then one more step.
    assert_relative_eq!(odom[6].pose.translation.vector.x, 0.6, epsilon = 1e-9);
    assert_relative_eq!(odom[7].pose.translation.vector.x, 0.7, epsilon = 1e-9);
    assert_eq!(info.drain(&bus).len(), 8);

    // The node broadcast its own estimate.
    let broadcast = tf.lookup("odom", "base_link", 0.8, None).unwrap();
    assert_relative_eq!(broadcast.translation.vector.x, 0.7, epsilon = 1e-9);
}

#[test]
fn test_missing_guess_transform_aborts() {
    let config = NodeConfig::from_toml_str(
        r#"
        guess_from_tf = true
        guess_frame_id = "wheel_base"
        wait_for_transform = false
        "#,
    )
    .unwrap();
    let session: Session = toml::from_str(
        r#"
        [[frames]]
        stamp = 1.0
        points = [[1.0, 0.0, 0.0]]
        "#,
    )
    .unwrap();

    let tf = Arc::new(TfBuffer::default());
    let bus = Arc::new(Mutex::new(TopicBus::default()));
    let node = OdometryNode::from_config(
        &config,
        &[],
        Arc::clone(&tf),
        Arc::clone(&bus),
        None,
        None,
        Path::new("/"),
    );
    let mut odom = bus.lock().subscribe::<OdometryMsg>(TOPIC_ODOM).unwrap();

    let handle = node.spawn();
    let summary = replay(&session, &tf, &handle).unwrap();
    handle.shutdown().unwrap();

    assert_eq!(summary.frames, 1);
    assert_eq!(summary.aborted, 1);
    // Nothing is published for an aborted cycle.
    assert!(odom.drain(&bus.lock()).is_empty());
}
