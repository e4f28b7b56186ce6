// odom_core/src/messages.rs

use nalgebra::{Matrix6, Point3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::types::{Pose, Stamp};

/// Large variance marking an estimate that must not be trusted.
pub const BAD_COVARIANCE: f64 = 9999.0;

// =========================================================================
// == Sensor Data ==
// =========================================================================

/// Represents a single point from a depth sensor or a laser scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// The 3D position of the point in the sensor's local frame.
    pub position: Point3<f64>,
    /// Optional surface normal, present for scans with 6 channels.
    #[serde(default)]
    pub normal: Option<Vector3<f64>>,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            normal: None,
        }
    }
}

/// A laser scan reduced to its points, with normals when the sensor provides them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub points: Vec<Point>,
}

impl LaserScan {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn channels(&self) -> usize {
        if !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some()) {
            6
        } else {
            3
        }
    }
}

/// One sensor snapshot handed to the estimation engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    /// Sequence number of the snapshot.
    #[serde(default)]
    pub id: u64,
    pub stamp: Stamp,
    /// Points (or visual features with depth) in the robot base frame.
    #[serde(default)]
    pub points: Vec<Point>,
    /// Optional laser scan captured with the snapshot.
    #[serde(default)]
    pub scan: Option<LaserScan>,
}

// =========================================================================
// == Public API Messages (Topic Data) ==
// =========================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Header {
    pub stamp: Stamp,
    pub frame_id: String,
}

/// The pose of `child_frame_id` in `header.frame_id`, as broadcast on the transform tree.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Pose,
}

/// The primary output of the node: pose and velocity with uncertainty.
///
/// Covariances are 6x6 in the order x, y, z, roll, pitch, yaw.
#[derive(Clone, Debug, PartialEq)]
pub struct OdometryMsg {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: Pose,
    pub pose_covariance: Matrix6<f64>,
    /// Linear velocity followed by angular rates.
    pub twist: Vector6<f64>,
    pub twist_covariance: Matrix6<f64>,
}

impl OdometryMsg {
    /// A "lost" message keeps an identity pose; downstream checks the covariance.
    pub fn is_lost(&self) -> bool {
        (0..6).all(|i| self.pose_covariance[(i, i)] >= BAD_COVARIANCE)
    }
}

/// Diagnostic snapshot published after every processed cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct OdomInfoMsg {
    pub header: Header,
    pub lost: bool,
    pub inliers: usize,
    pub matches: usize,
    pub icp_inliers_ratio: f64,
    pub variance: f64,
    /// Time spent inside the engine, seconds.
    pub time_estimation: f64,
    /// Wall-clock time of the whole cycle, seconds.
    pub time_cycle: f64,
    pub local_map_size: usize,
}

/// A flat point cloud in `header.frame_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct PointCloudMsg {
    pub header: Header,
    pub points: Vec<Point>,
}

impl PointCloudMsg {
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }
}
