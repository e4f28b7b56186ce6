// odom_core/src/estimation/motion_model.rs

use nalgebra::Isometry3;
use std::time::Instant;
use tracing::debug;

use super::{EngineKind, OdometryEngine, OdometryInfo};
use crate::messages::{LaserScan, Point, SensorData};
use crate::params::{
    get_bool, get_f64, get_i64, ParametersMap, K_ODOM_F2M_MAX_SIZE, K_ODOM_FIXED_VARIANCE,
    K_ODOM_GUESS_MOTION, K_REG_VARIANCE_FROM_INLIERS, K_VIS_MIN_INLIERS,
};
use crate::types::{Pose, Stamp};

/// A dead-reckoning engine: it integrates the supplied motion guess, or a
/// constant-velocity prediction, without any registration.
///
/// It accepts a snapshot when it carries at least `Vis/MinInliers` points and
/// keeps the same geometry snapshots a registration engine would expose:
/// frame-to-map keeps a bounded local map, frame-to-frame its reference frame.
#[derive(Debug, Clone)]
pub struct MotionModelOdometry {
    kind: EngineKind,
    pose: Pose,
    previous_stamp: Stamp,
    velocity: Option<Pose>,

    // --- Parameters ---
    min_inliers: usize,
    guess_motion: bool,
    variance_from_inliers: bool,
    fixed_variance: f64,
    max_map_size: usize,

    // --- Geometry snapshots ---
    local_map: Vec<Point>,
    local_scan_map: Vec<Point>,
    last_frame: Vec<Point>,
}

impl MotionModelOdometry {
    pub fn new(kind: EngineKind, params: &ParametersMap) -> Self {
        Self {
            kind,
            pose: Pose::identity(),
            previous_stamp: 0.0,
            velocity: None,
            min_inliers: get_i64(params, K_VIS_MIN_INLIERS, 0).max(0) as usize,
            guess_motion: get_bool(params, K_ODOM_GUESS_MOTION, true),
            variance_from_inliers: get_bool(params, K_REG_VARIANCE_FROM_INLIERS, false),
            fixed_variance: get_f64(params, K_ODOM_FIXED_VARIANCE, 0.0001),
            max_map_size: get_i64(params, K_ODOM_F2M_MAX_SIZE, 0).max(0) as usize,
            local_map: Vec::new(),
            local_scan_map: Vec::new(),
            last_frame: Vec::new(),
        }
    }

    fn predict_motion(&self, guess: Option<&Pose>, dt: f64) -> Pose {
        if let Some(guess) = guess {
            return *guess;
        }
        match (&self.velocity, self.guess_motion && dt > 0.0) {
            (Some(velocity), true) => scale_motion(velocity, dt),
            _ => Pose::identity(),
        }
    }

    fn append_bounded(map: &mut Vec<Point>, points: impl Iterator<Item = Point>, max: usize) {
        map.extend(points);
        if max > 0 && map.len() > max {
            let excess = map.len() - max;
            map.drain(..excess);
        }
    }
}

/// Scales a rigid motion by `factor` along its screw axis (translation and
/// rotation vector scaled independently).
fn scale_motion(motion: &Pose, factor: f64) -> Pose {
    Isometry3::new(
        motion.translation.vector * factor,
        motion.rotation.scaled_axis() * factor,
    )
}

fn transform_point(pose: &Pose, p: &Point) -> Point {
    Point {
        position: pose * p.position,
        normal: p.normal.map(|n| pose.rotation * n),
    }
}

impl OdometryEngine for MotionModelOdometry {
    fn process(
        &mut self,
        data: &mut SensorData,
        guess: Option<&Pose>,
        info: &mut OdometryInfo,
    ) -> Option<Pose> {
        let start = Instant::now();

        let scan_points = data.scan.as_ref().map_or(0, |s| s.points.len());
        let inliers = data.points.len().max(scan_points);
        info.inliers = inliers;
        info.matches = inliers;
        info.icp_inliers_ratio = if scan_points > 0 { 1.0 } else { 0.0 };

        if inliers == 0 || inliers < self.min_inliers {
            debug!(
                "Not enough inliers {}/{} for frame {}",
                inliers, self.min_inliers, data.id
            );
            self.velocity = None;
            info.lost = true;
            info.variance = 0.0;
            info.local_map_size = self.local_map.len();
            info.time_estimation = start.elapsed().as_secs_f64();
            return None;
        }

        let dt = if self.previous_stamp > 0.0 {
            data.stamp - self.previous_stamp
        } else {
            0.0
        };
        let motion = self.predict_motion(guess, dt);
        self.pose *= motion;
        if dt > 0.0 {
            self.velocity = Some(scale_motion(&motion, 1.0 / dt));
        }
        self.previous_stamp = data.stamp;

        self.last_frame = data.points.clone();
        if self.kind == EngineKind::FrameToMap {
            let pose = self.pose;
            Self::append_bounded(
                &mut self.local_map,
                data.points.iter().map(|p| transform_point(&pose, p)),
                self.max_map_size,
            );
            if let Some(scan) = data.scan.as_ref().filter(|s| !s.is_empty()) {
                Self::append_bounded(
                    &mut self.local_scan_map,
                    scan.points.iter().map(|p| transform_point(&pose, p)),
                    self.max_map_size,
                );
                info.local_scan_map = Some(LaserScan {
                    points: self.local_scan_map.clone(),
                });
            }
        }

        info.lost = false;
        info.variance = if self.variance_from_inliers {
            1.0 / inliers as f64
        } else {
            self.fixed_variance
        };
        info.local_map_size = self.local_map.len();
        info.time_estimation = start.elapsed().as_secs_f64();
        Some(self.pose)
    }

    fn reset(&mut self, pose: &Pose) {
        self.pose = *pose;
        self.previous_stamp = 0.0;
        self.velocity = None;
        self.local_map.clear();
        self.local_scan_map.clear();
        self.last_frame.clear();
    }

    fn pose(&self) -> &Pose {
        &self.pose
    }

    fn previous_stamp(&self) -> Stamp {
        self.previous_stamp
    }

    fn previous_velocity(&self) -> Option<Pose> {
        self.velocity
    }

    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn supports_local_map(&self) -> bool {
        self.kind == EngineKind::FrameToMap
    }

    fn supports_reference_frame(&self) -> bool {
        true
    }

    fn local_map(&self) -> Option<&[Point]> {
        match self.kind {
            EngineKind::FrameToMap => Some(&self.local_map),
            EngineKind::FrameToFrame => None,
        }
    }

    fn reference_frame(&self) -> Option<&[Point]> {
        Some(&self.last_frame)
    }
}
