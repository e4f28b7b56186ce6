// odom_core/src/estimation/mod.rs

use std::fmt;

use crate::error::{OdomError, Result};
use crate::messages::{LaserScan, Point, SensorData};
use crate::params::{get_i64, ParametersMap, K_ODOM_STRATEGY};
use crate::types::{Pose, Stamp};

pub mod motion_model;

pub use motion_model::MotionModelOdometry;

/// Quality metrics filled by the engine on every call to `process`,
/// whether or not a pose was produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OdometryInfo {
    pub lost: bool,
    pub inliers: usize,
    pub matches: usize,
    /// Share of scan points that found a correspondence, in `[0, 1]`.
    pub icp_inliers_ratio: f64,
    pub variance: f64,
    pub local_map_size: usize,
    /// Scan registration map in the odom frame, when the engine keeps one.
    pub local_scan_map: Option<LaserScan>,
    /// Seconds spent inside `process`.
    pub time_estimation: f64,
}

/// Which flavour of engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    FrameToMap,
    FrameToFrame,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::FrameToMap => write!(f, "frame-to-map"),
            EngineKind::FrameToFrame => write!(f, "frame-to-frame"),
        }
    }
}

/// The contract for any stateful pose estimator driven by the tracking loop.
///
/// The engine owns its pose, map and reference frame. Callers only read the
/// geometry snapshots; they never mutate them. The engine is not reentrant.
pub trait OdometryEngine: Send {
    /// Estimates the pose for one sensor snapshot.
    ///
    /// `guess` is the a-priori motion since the previous processed snapshot,
    /// `None` meaning "no guess". Returns `None` when tracking failed; `info`
    /// is filled in both cases.
    fn process(
        &mut self,
        data: &mut SensorData,
        guess: Option<&Pose>,
        info: &mut OdometryInfo,
    ) -> Option<Pose>;

    /// Re-anchors the engine at `pose`, dropping its map and velocity.
    fn reset(&mut self, pose: &Pose);

    /// The current pose of the tracked frame in the odom frame.
    fn pose(&self) -> &Pose;

    /// Stamp of the last successfully processed snapshot, `0.0` if none.
    fn previous_stamp(&self) -> Stamp;

    /// Velocity over the last processed interval, as a per-second transform.
    fn previous_velocity(&self) -> Option<Pose>;

    fn kind(&self) -> EngineKind;

    // --- Capabilities ---

    fn supports_local_map(&self) -> bool {
        false
    }

    fn supports_reference_frame(&self) -> bool {
        false
    }

    /// Points of the local map, in the odom frame.
    fn local_map(&self) -> Option<&[Point]> {
        None
    }

    /// Points of the last registered frame, in the tracked frame.
    fn reference_frame(&self) -> Option<&[Point]> {
        None
    }
}

/// Builds the engine selected by `Odom/Strategy`.
pub fn create_engine(params: &ParametersMap) -> Result<Box<dyn OdometryEngine>> {
    let kind = match get_i64(params, K_ODOM_STRATEGY, 0) {
        0 => EngineKind::FrameToMap,
        1 => EngineKind::FrameToFrame,
        other => return Err(OdomError::UnknownStrategy(other)),
    };
    Ok(Box::new(MotionModelOdometry::new(kind, params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{default_odometry_parameters, OdometryModality};

    #[test]
    fn test_create_engine_by_strategy() {
        let mut params = default_odometry_parameters(OdometryModality::Rgbd);
        let engine = create_engine(&params).unwrap();
        assert_eq!(engine.kind(), EngineKind::FrameToMap);
        assert!(engine.supports_local_map());

        params.insert(K_ODOM_STRATEGY.to_string(), "1".to_string());
        let engine = create_engine(&params).unwrap();
        assert_eq!(engine.kind(), EngineKind::FrameToFrame);
        assert!(!engine.supports_local_map());
        assert!(engine.supports_reference_frame());

        params.insert(K_ODOM_STRATEGY.to_string(), "7".to_string());
        assert!(matches!(
            create_engine(&params),
            Err(OdomError::UnknownStrategy(7))
        ));
    }
}
