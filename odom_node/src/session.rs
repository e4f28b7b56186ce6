// odom_node/src/session.rs

//! Replay of a recorded session file.
//!
//! ```toml
//! [[tf]]
//! stamp = 1.0
//! parent = "odom"
//! child = "base_footprint"
//! xyz = [0.0, 0.0, 0.0]
//! rpy = [0.0, 0.0, 0.0]
//!
//! [[frames]]
//! stamp = 1.0
//! points = [[1.0, 0.0, 0.5], [2.0, 0.1, 0.5]]
//! scan = [[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]]   # x y z [nx ny nz]
//!
//! [[commands]]
//! stamp = 2.0
//! service = "reset_to_pose"
//! pose = [1.0, 2.0, 0.0, 0.0, 0.0, 0.0]
//! ```
//!
//! Entries are replayed in stamp order; at equal stamps transforms come
//! first, then service calls, then sensor frames.

use nalgebra::{Point3, Vector3};
use odom_core::frames::TfBuffer;
use odom_core::messages::{LaserScan, Point, SensorData};
use odom_core::types::{pose_from_xyzrpy, Pose, Stamp};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{NodeError, Result};
use crate::logging::LogLevel;
use crate::node::{CycleStatus, NodeHandle, NodeReply, NodeRequest};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Session {
    pub tf: Vec<TfEntry>,
    pub frames: Vec<FrameEntry>,
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfEntry {
    pub stamp: Stamp,
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub xyz: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl TfEntry {
    pub fn pose(&self) -> Pose {
        let [x, y, z] = self.xyz;
        let [roll, pitch, yaw] = self.rpy;
        pose_from_xyzrpy(x, y, z, roll, pitch, yaw)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameEntry {
    pub stamp: Stamp,
    /// Defaults to the position of the frame in the file, starting at 1.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub points: Vec<Vec<f64>>,
    #[serde(default)]
    pub scan: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEntry {
    pub stamp: Stamp,
    /// `reset`, `reset_to_pose`, `pause`, `resume` or `set_log_level`.
    pub service: String,
    #[serde(default)]
    pub pose: Option<[f64; 6]>,
    #[serde(default)]
    pub level: Option<String>,
}

fn to_point(stamp: Stamp, values: &[f64]) -> Result<Point> {
    match values {
        [x, y, z] => Ok(Point::new(*x, *y, *z)),
        [x, y, z, nx, ny, nz] => Ok(Point {
            position: Point3::new(*x, *y, *z),
            normal: Some(Vector3::new(*nx, *ny, *nz)),
        }),
        other => Err(NodeError::SessionEntry {
            stamp,
            message: format!("a point needs 3 or 6 values, got {}", other.len()),
        }),
    }
}

impl FrameEntry {
    pub fn to_sensor_data(&self, default_id: u64) -> Result<SensorData> {
        let points = self
            .points
            .iter()
            .map(|p| to_point(self.stamp, p))
            .collect::<Result<Vec<_>>>()?;
        let scan = match &self.scan {
            Some(scan) => Some(LaserScan {
                points: scan
                    .iter()
                    .map(|p| to_point(self.stamp, p))
                    .collect::<Result<Vec<_>>>()?,
            }),
            None => None,
        };
        Ok(SensorData {
            id: self.id.unwrap_or(default_id),
            stamp: self.stamp,
            points,
            scan,
        })
    }
}

impl CommandEntry {
    pub fn to_request(&self) -> Result<NodeRequest> {
        let invalid = |message: String| NodeError::SessionEntry {
            stamp: self.stamp,
            message,
        };
        match self.service.as_str() {
            "reset" => Ok(NodeRequest::Reset),
            "reset_to_pose" => {
                let [x, y, z, roll, pitch, yaw] = self
                    .pose
                    .ok_or_else(|| invalid("\"reset_to_pose\" needs a pose".to_string()))?;
                Ok(NodeRequest::ResetToPose {
                    x,
                    y,
                    z,
                    roll,
                    pitch,
                    yaw,
                })
            }
            "pause" => Ok(NodeRequest::Pause),
            "resume" => Ok(NodeRequest::Resume),
            "set_log_level" => {
                let level = self
                    .level
                    .as_deref()
                    .ok_or_else(|| invalid("\"set_log_level\" needs a level".to_string()))?;
                level
                    .parse::<LogLevel>()
                    .map(NodeRequest::SetLogLevel)
                    .map_err(invalid)
            }
            other => Err(invalid(format!("unknown service \"{}\"", other))),
        }
    }
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| NodeError::SessionRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| NodeError::SessionParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Flattens the session into one stamp-ordered timeline. Malformed
    /// entries are reported before anything is replayed.
    pub fn timeline(&self) -> Result<Vec<Step>> {
        let mut steps = Vec::with_capacity(self.tf.len() + self.frames.len() + self.commands.len());
        for entry in &self.tf {
            steps.push(Step::Transform(entry.clone()));
        }
        for entry in &self.commands {
            steps.push(Step::Request(entry.stamp, entry.to_request()?));
        }
        for (i, entry) in self.frames.iter().enumerate() {
            let data = entry.to_sensor_data(i as u64 + 1)?;
            steps.push(Step::Request(entry.stamp, NodeRequest::SensorData(data)));
        }
        // Stable: equal stamps keep the tf, commands, frames order.
        steps.sort_by(|a, b| a.stamp().total_cmp(&b.stamp()));
        Ok(steps)
    }
}

/// One replay step.
#[derive(Debug, Clone)]
pub enum Step {
    Transform(TfEntry),
    Request(Stamp, NodeRequest),
}

impl Step {
    pub fn stamp(&self) -> Stamp {
        match self {
            Step::Transform(entry) => entry.stamp,
            Step::Request(stamp, _) => *stamp,
        }
    }
}

/// What happened during a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub tracked: usize,
    pub lost: usize,
    pub recoveries: usize,
    pub aborted: usize,
    pub paused: usize,
    pub services_ok: usize,
    pub services_failed: usize,
}

/// Feeds the session into the transform buffer and the node, one step at a
/// time, waiting for each request to be served before the next step.
pub fn replay(session: &Session, tf: &TfBuffer, node: &NodeHandle) -> Result<ReplaySummary> {
    let timeline = session.timeline()?;
    info!("Replaying session with {} steps", timeline.len());

    let mut summary = ReplaySummary::default();
    for step in timeline {
        match step {
            Step::Transform(entry) => {
                if let Err(e) =
                    tf.set_transform(&entry.parent, &entry.child, entry.stamp, entry.pose(), entry.is_static)
                {
                    warn!("Session transform at {:.6} rejected: {}", entry.stamp, e);
                }
            }
            Step::Request(_, request) => {
                let is_frame = matches!(request, NodeRequest::SensorData(_));
                if is_frame {
                    summary.frames += 1;
                }
                match node.call(request)? {
                    NodeReply::Cycle(CycleStatus::Tracked) => summary.tracked += 1,
                    NodeReply::Cycle(CycleStatus::Lost { recovered }) => {
                        summary.lost += 1;
                        if recovered {
                            summary.recoveries += 1;
                        }
                    }
                    NodeReply::Cycle(CycleStatus::Aborted) => summary.aborted += 1,
                    NodeReply::Cycle(CycleStatus::Paused) => summary.paused += 1,
                    NodeReply::Cycle(CycleStatus::Flushed) => {}
                    NodeReply::Service(true) => summary.services_ok += 1,
                    NodeReply::Service(false) => summary.services_failed += 1,
                }
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"
        [[tf]]
        stamp = 2.0
        parent = "odom"
        child = "base_footprint"
        xyz = [1.0, 0.0, 0.0]

        [[tf]]
        stamp = 0.0
        parent = "base_footprint"
        child = "camera"
        static = true

        [[frames]]
        stamp = 2.0
        points = [[1.0, 0.0, 0.5], [2.0, 0.1, 0.5, 0.0, 0.0, 1.0]]

        [[frames]]
        stamp = 1.0
        id = 42
        points = []

        [[commands]]
        stamp = 2.0
        service = "set_log_level"
        level = "debug"
    "#;

    #[test]
    fn test_timeline_order() {
        let session: Session = toml::from_str(SESSION).unwrap();
        let timeline = session.timeline().unwrap();
        let stamps: Vec<f64> = timeline.iter().map(Step::stamp).collect();
        assert_eq!(stamps, vec![0.0, 1.0, 2.0, 2.0, 2.0]);

        assert!(matches!(&timeline[0], Step::Transform(e) if e.is_static));
        assert!(matches!(
            &timeline[1],
            Step::Request(_, NodeRequest::SensorData(d)) if d.id == 42
        ));
        assert!(matches!(&timeline[2], Step::Transform(_)));
        assert!(matches!(
            &timeline[3],
            Step::Request(_, NodeRequest::SetLogLevel(LogLevel::Debug))
        ));
        match &timeline[4] {
            Step::Request(_, NodeRequest::SensorData(d)) => {
                assert_eq!(d.id, 1);
                assert_eq!(d.points.len(), 2);
                assert!(d.points[0].normal.is_none());
                assert!(d.points[1].normal.is_some());
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_malformed_entries() {
        let bad_point: Session = toml::from_str(
            r#"
            [[frames]]
            stamp = 1.0
            points = [[1.0, 2.0]]
            "#,
        )
        .unwrap();
        assert!(matches!(
            bad_point.timeline(),
            Err(NodeError::SessionEntry { .. })
        ));

        let missing_pose: Session = toml::from_str(
            r#"
            [[commands]]
            stamp = 1.0
            service = "reset_to_pose"
            "#,
        )
        .unwrap();
        assert!(missing_pose.timeline().is_err());

        let unknown: Session = toml::from_str(
            r#"
            [[commands]]
            stamp = 1.0
            service = "explode"
            "#,
        )
        .unwrap();
        assert!(unknown.timeline().is_err());
    }
}
