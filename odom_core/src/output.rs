// odom_core/src/output.rs

//! Conversion of cycle results into the messages published by the node.

use nalgebra::{Matrix6, Vector6};

use crate::estimation::OdometryInfo;
use crate::messages::{
    Header, LaserScan, OdomInfoMsg, OdometryMsg, Point, PointCloudMsg, TransformStamped,
    BAD_COVARIANCE,
};
use crate::params::OdometryModality;
use crate::types::{pose_to_xyzrpy, Pose, Stamp};

/// Frame names stamped on outgoing messages.
#[derive(Debug, Clone, Copy)]
pub struct OutputFrames<'a> {
    pub odom_frame_id: &'a str,
    pub frame_id: &'a str,
}

impl OutputFrames<'_> {
    fn header(&self, stamp: Stamp) -> Header {
        Header {
            stamp,
            frame_id: self.odom_frame_id.to_string(),
        }
    }
}

fn diagonal(value: f64) -> Matrix6<f64> {
    Matrix6::from_diagonal_element(value)
}

/// Twist from a per-second velocity transform: linear rates then roll/pitch/yaw rates.
pub fn twist_from_velocity(velocity: &Pose) -> Vector6<f64> {
    Vector6::from(pose_to_xyzrpy(velocity))
}

/// The `odom` message of a successful cycle.
///
/// Pose covariance is `2 × variance` on the diagonal. The twist covariance is
/// `variance`, or [`BAD_COVARIANCE`] when the engine has no velocity yet.
pub fn odometry_msg(
    frames: OutputFrames,
    stamp: Stamp,
    pose: &Pose,
    variance: f64,
    velocity: Option<&Pose>,
) -> OdometryMsg {
    let (twist, twist_variance) = match velocity {
        Some(v) => (twist_from_velocity(v), variance),
        None => (Vector6::zeros(), BAD_COVARIANCE),
    };
    OdometryMsg {
        header: frames.header(stamp),
        child_frame_id: frames.frame_id.to_string(),
        pose: *pose,
        pose_covariance: diagonal(variance * 2.0),
        twist,
        twist_covariance: diagonal(twist_variance),
    }
}

/// The "lost" message: zero pose and twist, every diagonal slot at [`BAD_COVARIANCE`].
pub fn lost_odometry_msg(frames: OutputFrames, stamp: Stamp) -> OdometryMsg {
    OdometryMsg {
        header: frames.header(stamp),
        child_frame_id: frames.frame_id.to_string(),
        pose: Pose::identity(),
        pose_covariance: diagonal(BAD_COVARIANCE),
        twist: Vector6::zeros(),
        twist_covariance: diagonal(BAD_COVARIANCE),
    }
}

/// The `odom -> frame_id` transform broadcast after a successful cycle.
pub fn odom_transform(frames: OutputFrames, stamp: Stamp, pose: &Pose) -> TransformStamped {
    TransformStamped {
        header: frames.header(stamp),
        child_frame_id: frames.frame_id.to_string(),
        transform: *pose,
    }
}

pub fn odom_info_msg(
    frames: OutputFrames,
    stamp: Stamp,
    info: &OdometryInfo,
    time_cycle: f64,
) -> OdomInfoMsg {
    OdomInfoMsg {
        header: frames.header(stamp),
        lost: info.lost,
        inliers: info.inliers,
        matches: info.matches,
        icp_inliers_ratio: info.icp_inliers_ratio,
        variance: info.variance,
        time_estimation: info.time_estimation,
        time_cycle,
        local_map_size: info.local_map_size,
    }
}

/// Local map points, already in the odom frame. Normals are dropped.
pub fn local_map_cloud(frames: OutputFrames, stamp: Stamp, map: &[Point]) -> PointCloudMsg {
    PointCloudMsg {
        header: frames.header(stamp),
        points: map
            .iter()
            .map(|p| Point {
                position: p.position,
                normal: None,
            })
            .collect(),
    }
}

/// The engine's last frame moved into the odom frame by `pose`.
/// `None` when the frame has no points.
pub fn last_frame_cloud(
    frames: OutputFrames,
    stamp: Stamp,
    pose: &Pose,
    frame: &[Point],
) -> Option<PointCloudMsg> {
    if frame.is_empty() {
        return None;
    }
    Some(PointCloudMsg {
        header: frames.header(stamp),
        points: frame
            .iter()
            .map(|p| Point {
                position: pose * p.position,
                normal: None,
            })
            .collect(),
    })
}

/// The scan registration map, keeping normals only for 6-channel scans.
/// `None` when the scan is empty.
pub fn scan_map_cloud(
    frames: OutputFrames,
    stamp: Stamp,
    scan: &LaserScan,
) -> Option<PointCloudMsg> {
    if scan.is_empty() {
        return None;
    }
    let with_normals = scan.channels() == 6;
    Some(PointCloudMsg {
        header: frames.header(stamp),
        points: scan
            .points
            .iter()
            .map(|p| Point {
                position: p.position,
                normal: if with_normals { p.normal } else { None },
            })
            .collect(),
    })
}

/// The one-line summary logged after every processed cycle.
/// The standard deviation is reported as 0 when tracking was lost.
pub fn cycle_summary(
    modality: OdometryModality,
    info: &OdometryInfo,
    lost: bool,
    update_time: f64,
) -> String {
    let std_dev = if lost { 0.0 } else { info.variance.sqrt() };
    match (modality.visual(), modality.icp()) {
        (true, true) => format!(
            "Odom: quality={}, ratio={:.6}, std dev={:.6}m, update time={:.6}s",
            info.inliers, info.icp_inliers_ratio, std_dev, update_time
        ),
        (true, false) => format!(
            "Odom: quality={}, std dev={:.6}m, update time={:.6}s",
            info.inliers, std_dev, update_time
        ),
        _ => format!(
            "Odom: ratio={:.6}, std dev={:.6}m, update time={:.6}s",
            info.icp_inliers_ratio, std_dev, update_time
        ),
    }
}
