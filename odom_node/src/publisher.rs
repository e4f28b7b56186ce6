// odom_node/src/publisher.rs

use odom_core::estimation::OdometryEngine;
use odom_core::frames::TfBuffer;
use odom_core::messages::{OdomInfoMsg, OdometryMsg, PointCloudMsg, TransformStamped};
use odom_core::output::{
    cycle_summary, last_frame_cloud, local_map_cloud, lost_odometry_msg, odom_info_msg,
    odom_transform, odometry_msg, scan_map_cloud, OutputFrames,
};
use odom_core::params::OdometryModality;
use odom_core::tracking::{CycleReport, TrackingFrames};
use tracing::{info, warn};

use crate::topics::TopicBus;

// --- Topic names ---
pub const TOPIC_ODOM: &str = "odom";
pub const TOPIC_ODOM_INFO: &str = "odom_info";
pub const TOPIC_LOCAL_MAP: &str = "odom_local_map";
pub const TOPIC_LOCAL_SCAN_MAP: &str = "odom_local_scan_map";
pub const TOPIC_LAST_FRAME: &str = "odom_last_frame";
/// Every `odom -> frame_id` transform broadcast, mirrored for observers.
pub const TOPIC_TF: &str = "tf";

/// Emits the outputs of a processed cycle on the bus and the transform tree.
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    odom_frame_id: String,
    frame_id: String,
    publish_tf: bool,
    publish_null_when_lost: bool,
    modality: OdometryModality,
}

impl ResultPublisher {
    pub fn new(
        frames: &TrackingFrames,
        publish_tf: bool,
        publish_null_when_lost: bool,
        modality: OdometryModality,
    ) -> Self {
        Self {
            odom_frame_id: frames.odom_frame_id.clone(),
            frame_id: frames.frame_id.clone(),
            publish_tf,
            publish_null_when_lost,
            modality,
        }
    }

    /// Creates the output topics on `bus`.
    pub fn advertise(bus: &mut TopicBus, queue_size: usize) {
        bus.create_topic::<OdometryMsg>(TOPIC_ODOM, queue_size);
        bus.create_topic::<OdomInfoMsg>(TOPIC_ODOM_INFO, queue_size);
        bus.create_topic::<PointCloudMsg>(TOPIC_LOCAL_MAP, queue_size);
        bus.create_topic::<PointCloudMsg>(TOPIC_LOCAL_SCAN_MAP, queue_size);
        bus.create_topic::<PointCloudMsg>(TOPIC_LAST_FRAME, queue_size);
        bus.create_topic::<TransformStamped>(TOPIC_TF, queue_size);
    }

    fn frames(&self) -> OutputFrames<'_> {
        OutputFrames {
            odom_frame_id: &self.odom_frame_id,
            frame_id: &self.frame_id,
        }
    }

    /// Publishes one processed cycle. Geometry topics are only filled when
    /// someone listens and the engine exposes the matching snapshot.
    pub fn publish(
        &self,
        bus: &mut TopicBus,
        tf: &TfBuffer,
        report: &CycleReport,
        engine: &dyn OdometryEngine,
    ) {
        let frames = self.frames();
        let stamp = report.stamp;
        let info = &report.info;

        match &report.pose {
            Some(pose) => {
                if self.publish_tf {
                    let transform = odom_transform(frames, stamp, pose);
                    if let Err(e) = tf.set_transform(
                        &transform.header.frame_id,
                        &transform.child_frame_id,
                        stamp,
                        transform.transform,
                        false,
                    ) {
                        warn!("odometry: cannot broadcast transform: {}", e);
                    }
                    bus.publish(TOPIC_TF, transform);
                }

                let velocity = engine.previous_velocity();
                bus.publish(
                    TOPIC_ODOM,
                    odometry_msg(frames, stamp, pose, info.variance, velocity.as_ref()),
                );

                if bus.subscriber_count(TOPIC_LOCAL_MAP) > 0 && engine.supports_local_map() {
                    if let Some(map) = engine.local_map() {
                        bus.publish(TOPIC_LOCAL_MAP, local_map_cloud(frames, stamp, map));
                    }
                }

                if bus.subscriber_count(TOPIC_LAST_FRAME) > 0 && engine.supports_reference_frame() {
                    if let Some(cloud) = engine
                        .reference_frame()
                        .and_then(|frame| last_frame_cloud(frames, stamp, pose, frame))
                    {
                        bus.publish(TOPIC_LAST_FRAME, cloud);
                    }
                }

                if bus.subscriber_count(TOPIC_LOCAL_SCAN_MAP) > 0 {
                    if let Some(cloud) = info
                        .local_scan_map
                        .as_ref()
                        .and_then(|scan| scan_map_cloud(frames, stamp, scan))
                    {
                        bus.publish(TOPIC_LOCAL_SCAN_MAP, cloud);
                    }
                }
            }
            None if self.publish_null_when_lost => {
                bus.publish(TOPIC_ODOM, lost_odometry_msg(frames, stamp));
            }
            None => {}
        }

        bus.publish(
            TOPIC_ODOM_INFO,
            odom_info_msg(frames, stamp, info, report.time_cycle),
        );

        info!(
            "{}",
            cycle_summary(self.modality, info, report.is_lost(), report.time_cycle)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use odom_core::estimation::{create_engine, OdometryInfo};
    use odom_core::frames::TransformOracle;
    use odom_core::messages::{LaserScan, Point, SensorData, BAD_COVARIANCE};
    use odom_core::params::{default_odometry_parameters, K_ODOM_STRATEGY};
    use odom_core::types::{pose_from_xyzrpy, Pose};

    fn publisher(publish_null_when_lost: bool) -> ResultPublisher {
        ResultPublisher::new(
            &TrackingFrames::default(),
            true,
            publish_null_when_lost,
            OdometryModality::Rgbd,
        )
    }

    fn bus() -> TopicBus {
        let mut bus = TopicBus::default();
        ResultPublisher::advertise(&mut bus, 10);
        bus
    }

    /// Runs the reference engine once so it has snapshots to expose.
    fn tracked_engine(strategy: &str) -> (Box<dyn OdometryEngine>, CycleReport) {
        let mut params = default_odometry_parameters(OdometryModality::Rgbd);
        params.insert(K_ODOM_STRATEGY.to_string(), strategy.to_string());
        let mut engine = create_engine(&params).unwrap();
        let mut data = SensorData {
            id: 1,
            stamp: 1.0,
            points: (0..25).map(|i| Point::new(i as f64, 0.0, 0.0)).collect(),
            scan: Some(LaserScan {
                points: vec![Point::new(1.0, 1.0, 0.0)],
            }),
        };
        let guess = pose_from_xyzrpy(2.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let mut info = OdometryInfo::default();
        let pose = engine.process(&mut data, Some(&guess), &mut info);
        let report = CycleReport {
            stamp: 1.0,
            pose,
            guess: Some(guess),
            info,
            recovery: None,
            time_cycle: 0.001,
        };
        (engine, report)
    }

    #[test]
    fn test_success_publishes_odom_info_and_tf() {
        let mut bus = bus();
        let tf = TfBuffer::default();
        let mut odom = bus.subscribe::<OdometryMsg>(TOPIC_ODOM).unwrap();
        let mut info = bus.subscribe::<OdomInfoMsg>(TOPIC_ODOM_INFO).unwrap();
        let (engine, report) = tracked_engine("0");

        publisher(true).publish(&mut bus, &tf, &report, engine.as_ref());

        let odom = odom.drain(&bus);
        assert_eq!(odom.len(), 1);
        assert!(!odom[0].is_lost());
        // First frame: no velocity yet.
        assert_eq!(odom[0].twist_covariance[(0, 0)], BAD_COVARIANCE);
        assert_eq!(info.drain(&bus).len(), 1);

        let broadcast = tf.lookup("odom", "base_link", 1.0, None).unwrap();
        assert_relative_eq!(broadcast, report.pose.unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_geometry_needs_subscribers() {
        let mut bus = bus();
        let tf = TfBuffer::default();
        let (engine, report) = tracked_engine("0");

        publisher(true).publish(&mut bus, &tf, &report, engine.as_ref());
        assert!(bus.get_topic::<PointCloudMsg>(TOPIC_LOCAL_MAP).unwrap().latest().is_none());

        let mut map = bus.subscribe::<PointCloudMsg>(TOPIC_LOCAL_MAP).unwrap();
        let mut last = bus.subscribe::<PointCloudMsg>(TOPIC_LAST_FRAME).unwrap();
        let mut scan = bus.subscribe::<PointCloudMsg>(TOPIC_LOCAL_SCAN_MAP).unwrap();
        publisher(true).publish(&mut bus, &tf, &report, engine.as_ref());

        assert_eq!(map.drain(&bus)[0].points.len(), 25);
        let last = last.drain(&bus);
        // Moved into the odom frame by the pose.
        assert_eq!(last[0].points[0].position.x, 2.0);
        assert_eq!(last[0].header.frame_id, "odom");
        assert_eq!(scan.drain(&bus).len(), 1);
    }

    #[test]
    fn test_frame_to_frame_has_no_local_map() {
        let mut bus = bus();
        let tf = TfBuffer::default();
        let mut map = bus.subscribe::<PointCloudMsg>(TOPIC_LOCAL_MAP).unwrap();
        let mut last = bus.subscribe::<PointCloudMsg>(TOPIC_LAST_FRAME).unwrap();
        let (engine, report) = tracked_engine("1");

        publisher(true).publish(&mut bus, &tf, &report, engine.as_ref());

        assert!(map.drain(&bus).is_empty());
        assert_eq!(last.drain(&bus).len(), 1);
    }

    #[test]
    fn test_lost_cycle() {
        let tf = TfBuffer::default();
        let (engine, mut report) = tracked_engine("0");
        report.pose = None;
        report.info.lost = true;

        let mut bus = bus();
        let mut odom = bus.subscribe::<OdometryMsg>(TOPIC_ODOM).unwrap();
        let mut info = bus.subscribe::<OdomInfoMsg>(TOPIC_ODOM_INFO).unwrap();
        publisher(true).publish(&mut bus, &tf, &report, engine.as_ref());
        let odom_msgs = odom.drain(&bus);
        assert_eq!(odom_msgs.len(), 1);
        assert!(odom_msgs[0].is_lost());
        assert_eq!(odom_msgs[0].pose, Pose::identity());
        assert!(info.drain(&bus)[0].lost);
        // Nothing broadcast on a lost cycle.
        assert!(tf.frames().is_empty());

        publisher(false).publish(&mut bus, &tf, &report, engine.as_ref());
        assert!(odom.drain(&bus).is_empty());
        assert_eq!(info.drain(&bus).len(), 1);
    }
}
