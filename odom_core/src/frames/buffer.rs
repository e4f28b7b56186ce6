// odom_core/src/frames/buffer.rs

use nalgebra::Isometry3;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::frames::{normalize, TransformError, TransformOracle};
use crate::types::{Pose, Stamp};

/// Default number of samples kept per dynamic edge.
pub const DEFAULT_HISTORY: usize = 100;

/// Two stamps closer than this are considered equal.
const STAMP_EPSILON: f64 = 1e-9;

/// A single transform sample: the pose of the child expressed in its parent.
#[derive(Clone, Debug)]
struct Sample {
    stamp: Stamp,
    transform: Pose,
}

/// The edge from a child frame to its unique parent.
#[derive(Clone, Debug)]
struct Edge {
    parent: String,
    is_static: bool,
    samples: VecDeque<Sample>,
}

impl Edge {
    fn latest(&self) -> Option<Stamp> {
        self.samples.back().map(|s| s.stamp)
    }

    /// Evaluates the edge at `stamp`, interpolating between bracketing samples.
    fn at(&self, child: &str, stamp: Stamp) -> Result<Pose, TransformError> {
        let first = self
            .samples
            .front()
            .ok_or_else(|| TransformError::UnknownFrame(child.to_string()))?;
        if self.is_static || stamp == 0.0 {
            // Static edges hold one sample valid at all times.
            return Ok(self.samples.back().unwrap_or(first).transform);
        }

        let last = self.samples.back().unwrap_or(first);
        if stamp > last.stamp + STAMP_EPSILON {
            return Err(TransformError::ExtrapolationIntoFuture {
                frame: child.to_string(),
                requested: stamp,
                latest: last.stamp,
            });
        }
        if stamp < first.stamp - STAMP_EPSILON {
            return Err(TransformError::ExtrapolationIntoPast {
                frame: child.to_string(),
                requested: stamp,
                earliest: first.stamp,
            });
        }

        // First sample at or after the requested stamp.
        let upper = self
            .samples
            .iter()
            .position(|s| s.stamp >= stamp - STAMP_EPSILON)
            .unwrap_or(self.samples.len() - 1);
        let after = &self.samples[upper];
        if upper == 0 || (after.stamp - stamp).abs() <= STAMP_EPSILON {
            return Ok(after.transform);
        }
        let before = &self.samples[upper - 1];
        let ratio = (stamp - before.stamp) / (after.stamp - before.stamp);
        Ok(interpolate(&before.transform, &after.transform, ratio))
    }
}

/// Linear interpolation of the translation and slerp of the rotation.
fn interpolate(a: &Pose, b: &Pose, ratio: f64) -> Pose {
    a.try_lerp_slerp(b, ratio, 1e-9)
        .unwrap_or(if ratio < 0.5 { *a } else { *b })
}

/// A thread-safe, time-indexed transform tree.
///
/// Every child frame has exactly one parent. Writers call [`TfBuffer::set_transform`]
/// from any thread; readers resolve `from -> to` by walking both frames up to
/// their closest common ancestor and composing `T_anc_from⁻¹ · T_anc_to`.
/// A lookup with a timeout blocks until new data arrives or the timeout expires.
#[derive(Debug)]
pub struct TfBuffer {
    edges: Mutex<HashMap<String, Edge>>,
    updated: Condvar,
    history: usize,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl TfBuffer {
    pub fn new(history: usize) -> Self {
        Self {
            edges: Mutex::new(HashMap::new()),
            updated: Condvar::new(),
            history: history.max(1),
        }
    }

    /// Inserts the pose of `child` in `parent` at `stamp`.
    ///
    /// Static transforms replace any existing sample; dynamic ones are kept in
    /// a bounded, stamp-ordered history.
    pub fn set_transform(
        &self,
        parent: &str,
        child: &str,
        stamp: Stamp,
        transform: Pose,
        is_static: bool,
    ) -> Result<(), TransformError> {
        let parent = normalize(parent).to_string();
        let child = normalize(child).to_string();
        {
            let mut edges = self.edges.lock();
            if parent == child || Self::chain(&edges, &parent).iter().any(|f| *f == child) {
                return Err(TransformError::Loop { parent, child });
            }

            let history = self.history;
            let edge = edges.entry(child.clone()).or_insert_with(|| Edge {
                parent: parent.clone(),
                is_static,
                samples: VecDeque::new(),
            });
            if edge.parent != parent || edge.is_static != is_static {
                tracing::debug!(
                    "TF: frame \"{}\" re-parented from \"{}\" to \"{}\"",
                    child,
                    edge.parent,
                    parent
                );
                edge.parent = parent;
                edge.is_static = is_static;
                edge.samples.clear();
            }

            let sample = Sample { stamp, transform };
            if is_static {
                edge.samples.clear();
                edge.samples.push_back(sample);
            } else {
                let position = edge
                    .samples
                    .iter()
                    .position(|s| s.stamp >= stamp - STAMP_EPSILON);
                match position {
                    Some(i) if (edge.samples[i].stamp - stamp).abs() <= STAMP_EPSILON => {
                        edge.samples[i] = sample;
                    }
                    Some(i) => edge.samples.insert(i, sample),
                    None => edge.samples.push_back(sample),
                }
                while edge.samples.len() > history {
                    edge.samples.pop_front();
                }
            }
        }
        self.updated.notify_all();
        Ok(())
    }

    /// Lists every frame known to the buffer, parents included.
    pub fn frames(&self) -> Vec<String> {
        let edges = self.edges.lock();
        let mut frames: HashSet<String> = HashSet::new();
        for (child, edge) in edges.iter() {
            frames.insert(child.clone());
            frames.insert(edge.parent.clone());
        }
        let mut frames: Vec<String> = frames.into_iter().collect();
        frames.sort();
        frames
    }

    /// Non-blocking availability check.
    pub fn can_transform(&self, from_frame: &str, to_frame: &str, stamp: Stamp) -> bool {
        let edges = self.edges.lock();
        Self::resolve(&edges, normalize(from_frame), normalize(to_frame), stamp).is_ok()
    }

    pub fn clear(&self) {
        self.edges.lock().clear();
    }

    /// Frames from `frame` (inclusive) up to its root.
    fn chain(edges: &HashMap<String, Edge>, frame: &str) -> Vec<String> {
        let mut chain = vec![frame.to_string()];
        let mut current = frame;
        while let Some(edge) = edges.get(current) {
            // `set_transform` rejects loops, the bound only guards corrupted input.
            if chain.len() > edges.len() + 1 {
                break;
            }
            chain.push(edge.parent.clone());
            current = &edge.parent;
        }
        chain
    }

    fn is_known(edges: &HashMap<String, Edge>, frame: &str) -> bool {
        edges.contains_key(frame) || edges.values().any(|e| e.parent == frame)
    }

    fn resolve(
        edges: &HashMap<String, Edge>,
        from: &str,
        to: &str,
        stamp: Stamp,
    ) -> Result<Pose, TransformError> {
        for frame in [from, to] {
            if !Self::is_known(edges, frame) {
                return Err(TransformError::UnknownFrame(frame.to_string()));
            }
        }
        if from == to {
            return Ok(Isometry3::identity());
        }

        let from_chain = Self::chain(edges, from);
        let to_chain = Self::chain(edges, to);
        let to_set: HashSet<&String> = to_chain.iter().collect();
        let ancestor = from_chain
            .iter()
            .find(|f| to_set.contains(f))
            .cloned()
            .ok_or_else(|| TransformError::NotConnected {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        let from_path = Self::path_to(&from_chain, &ancestor);
        let to_path = Self::path_to(&to_chain, &ancestor);

        // "Latest" means the newest stamp every dynamic edge on the path can serve.
        let stamp = if stamp == 0.0 {
            from_path
                .iter()
                .chain(to_path.iter())
                .filter_map(|f| edges.get(*f))
                .filter(|e| !e.is_static)
                .filter_map(Edge::latest)
                .fold(f64::INFINITY, f64::min)
        } else {
            stamp
        };
        let stamp = if stamp.is_finite() { stamp } else { 0.0 };

        let pose_from = Self::compose(edges, &from_path, stamp)?;
        let pose_to = Self::compose(edges, &to_path, stamp)?;

        // The math: T_from_to = (T_anc_from)^-1 * T_anc_to
        Ok(pose_from.inverse() * pose_to)
    }

    /// Frames strictly below `ancestor` on a chain, child first.
    fn path_to<'a>(chain: &'a [String], ancestor: &str) -> Vec<&'a String> {
        chain.iter().take_while(|f| f.as_str() != ancestor).collect()
    }

    /// Pose of the first frame of `path` expressed in the ancestor.
    fn compose(
        edges: &HashMap<String, Edge>,
        path: &[&String],
        stamp: Stamp,
    ) -> Result<Pose, TransformError> {
        let mut pose = Isometry3::identity();
        for frame in path {
            let edge = edges
                .get(frame.as_str())
                .ok_or_else(|| TransformError::UnknownFrame(frame.to_string()))?;
            // Walking up: T_anc_child = T_anc_parent * T_parent_child
            pose = edge.at(frame, stamp)? * pose;
        }
        Ok(pose)
    }
}

impl TransformOracle for TfBuffer {
    fn lookup(
        &self,
        from_frame: &str,
        to_frame: &str,
        stamp: Stamp,
        timeout: Option<Duration>,
    ) -> Result<Pose, TransformError> {
        let from = normalize(from_frame);
        let to = normalize(to_frame);
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);

        let mut edges = self.edges.lock();
        loop {
            match Self::resolve(&edges, from, to, stamp) {
                Ok(pose) => return Ok(pose),
                Err(e) if e.is_transient() => match deadline {
                    Some(deadline) if Instant::now() < deadline => {
                        let _ = self.updated.wait_until(&mut edges, deadline);
                    }
                    Some(_) => {
                        return Err(TransformError::Timeout {
                            from: from.to_string(),
                            to: to.to_string(),
                            stamp,
                            waited: start.elapsed().as_secs_f64(),
                            reason: e.to_string(),
                        })
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}
