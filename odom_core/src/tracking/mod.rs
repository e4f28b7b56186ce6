// odom_core/src/tracking/mod.rs

//! The pose-tracking loop.
//!
//! [`TrackingSupervisor`] runs one estimation cycle per sensor snapshot:
//! optional ground-truth seeding, motion guess, engine call, then the
//! consecutive-failure policy. It owns the engine, the failure counter and the
//! pause flag; services are plain method calls, serialized by the caller.

use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::estimation::{OdometryEngine, OdometryInfo};
use crate::frames::{lookup_logged, TransformOracle, WaitPolicy};
use crate::messages::{SensorData, BAD_COVARIANCE};
use crate::types::{is_identity, pose_from_xyzrpy, pretty_print, Pose, Stamp};

pub mod guess;

pub use guess::{GuessProvider, GuessSource, GuessUnavailable};

/// Frame names the supervisor works with, prefixes already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingFrames {
    /// The tracked (robot base) frame.
    pub frame_id: String,
    pub odom_frame_id: String,
    /// Empty disables ground-truth seeding.
    pub ground_truth_frame_id: String,
}

impl Default for TrackingFrames {
    fn default() -> Self {
        Self {
            frame_id: "base_link".to_string(),
            odom_frame_id: "odom".to_string(),
            ground_truth_frame_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    pub frames: TrackingFrames,
    pub guess_source: GuessSource,
    pub wait_policy: WaitPolicy,
    /// Consecutive failures tolerated before an automatic reset. 0 disables it.
    pub reset_countdown: u32,
}

/// Logical state of the tracking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Running,
    /// The last cycle failed; `k` failures remain before recovery.
    LostPending(u32),
}

/// Why a cycle was dropped before the engine was called.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbortReason {
    #[error("initial pose cannot be seeded from \"{from}\" -> \"{to}\"")]
    GroundTruthUnavailable { from: String, to: String },

    #[error(transparent)]
    GuessUnavailable(#[from] GuessUnavailable),
}

/// How the engine was re-anchored after the failure budget ran out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recovery {
    /// Reset to `odom -> frame_id` as found on the transform tree.
    FromTransform(Pose),
    /// No transform available; reset in place to the engine's last pose.
    InPlace(Pose),
}

impl Recovery {
    pub fn pose(&self) -> &Pose {
        match self {
            Recovery::FromTransform(pose) | Recovery::InPlace(pose) => pose,
        }
    }
}

/// Everything a processed cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub stamp: Stamp,
    /// `None` when the engine lost track.
    pub pose: Option<Pose>,
    pub guess: Option<Pose>,
    pub info: OdometryInfo,
    pub recovery: Option<Recovery>,
    /// Wall-clock seconds from the start of the cycle to the end of recovery.
    pub time_cycle: f64,
}

impl CycleReport {
    pub fn is_lost(&self) -> bool {
        self.pose.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The supervisor is paused; the snapshot was ignored.
    Paused,
    /// A precondition failed; nothing must be published for this snapshot.
    Aborted(AbortReason),
    Processed(CycleReport),
}

pub struct TrackingSupervisor {
    engine: Box<dyn OdometryEngine>,
    frames: TrackingFrames,
    guess: GuessProvider,
    wait_policy: WaitPolicy,
    reset_countdown: u32,
    remaining: u32,
    lost: bool,
    paused: bool,
}

impl TrackingSupervisor {
    pub fn new(engine: Box<dyn OdometryEngine>, config: SupervisorConfig) -> Self {
        Self {
            engine,
            frames: config.frames,
            guess: GuessProvider::new(config.guess_source, config.wait_policy),
            wait_policy: config.wait_policy,
            reset_countdown: config.reset_countdown,
            remaining: config.reset_countdown,
            lost: false,
            paused: false,
        }
    }

    // --- Accessors ---

    pub fn engine(&self) -> &dyn OdometryEngine {
        self.engine.as_ref()
    }

    pub fn frames(&self) -> &TrackingFrames {
        &self.frames
    }

    pub fn guess_source(&self) -> &GuessSource {
        self.guess.source()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn reset_countdown(&self) -> u32 {
        self.reset_countdown
    }

    /// Failures left before automatic recovery.
    pub fn remaining_failures(&self) -> u32 {
        self.remaining
    }

    pub fn state(&self) -> TrackingState {
        if self.lost {
            TrackingState::LostPending(self.remaining)
        } else {
            TrackingState::Running
        }
    }

    // --- Processing ---

    /// Runs one estimation cycle for `data`, stamped `data.stamp`.
    pub fn process_data(
        &mut self,
        mut data: SensorData,
        oracle: &dyn TransformOracle,
    ) -> CycleOutcome {
        if self.paused {
            return CycleOutcome::Paused;
        }
        let start = Instant::now();
        let stamp = data.stamp;

        if let Err(reason) = self.seed_from_ground_truth(oracle, stamp) {
            return CycleOutcome::Aborted(reason);
        }

        let guess = match self
            .guess
            .compute(oracle, self.engine.previous_stamp(), stamp)
        {
            Ok(guess) => guess,
            Err(e) => {
                error!("{}. Aborting odometry update...", e);
                return CycleOutcome::Aborted(e.into());
            }
        };

        let mut info = OdometryInfo::default();
        let pose = self.engine.process(&mut data, guess.as_ref(), &mut info);

        let recovery = match pose {
            Some(_) => {
                self.remaining = self.reset_countdown;
                self.lost = false;
                None
            }
            None => {
                info.variance = BAD_COVARIANCE;
                self.on_failure(oracle, stamp)
            }
        };

        CycleOutcome::Processed(CycleReport {
            stamp,
            pose,
            guess,
            info,
            recovery,
            time_cycle: start.elapsed().as_secs_f64(),
        })
    }

    /// Seeds the engine from the ground-truth frame while it is still at identity.
    fn seed_from_ground_truth(
        &mut self,
        oracle: &dyn TransformOracle,
        stamp: Stamp,
    ) -> Result<(), AbortReason> {
        if self.frames.ground_truth_frame_id.is_empty() || !is_identity(self.engine.pose()) {
            return Ok(());
        }
        let from = &self.frames.ground_truth_frame_id;
        let to = &self.frames.frame_id;
        match lookup_logged(oracle, &self.wait_policy, from, to, stamp) {
            Some(initial) => {
                info!(
                    "Initializing odometry pose to {} (from \"{}\" -> \"{}\")",
                    pretty_print(&initial),
                    from,
                    to
                );
                self.engine.reset(&initial);
                Ok(())
            }
            None => Err(AbortReason::GroundTruthUnavailable {
                from: from.clone(),
                to: to.clone(),
            }),
        }
    }

    /// Counts a failed cycle. When the budget runs out the engine is
    /// re-anchored and the counter re-armed to the full budget at once.
    fn on_failure(&mut self, oracle: &dyn TransformOracle, stamp: Stamp) -> Option<Recovery> {
        self.lost = true;
        if self.remaining == 0 {
            return None;
        }
        warn!(
            "Odometry lost! Odometry will be reset after next {} consecutive unsuccessful odometry updates...",
            self.remaining
        );
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }

        // A fused pose on the transform tree (e.g. from an external filter) wins.
        let odom = &self.frames.odom_frame_id;
        let base = &self.frames.frame_id;
        let recovery = match lookup_logged(oracle, &self.wait_policy, odom, base, stamp) {
            Some(tf_pose) => {
                warn!(
                    "Odometry automatically reset to latest odometry pose available from TF ({}->{})!",
                    odom, base
                );
                Recovery::FromTransform(tf_pose)
            }
            None => {
                warn!("Odometry automatically reset to latest computed pose!");
                Recovery::InPlace(*self.engine.pose())
            }
        };
        self.engine.reset(recovery.pose());
        self.remaining = self.reset_countdown;
        self.lost = false;
        Some(recovery)
    }

    // --- Services ---

    /// Forces the engine back to identity.
    pub fn reset(&mut self) -> bool {
        info!("odometry: reset odom!");
        self.reset_engine(&Pose::identity());
        true
    }

    /// Forces the engine to an explicit pose (angles in radians).
    pub fn reset_to_pose(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> bool {
        let pose = pose_from_xyzrpy(x, y, z, roll, pitch, yaw);
        info!("odometry: reset odom to pose {}!", pretty_print(&pose));
        self.reset_engine(&pose);
        true
    }

    /// Seeds the engine with a configured initial pose. Not logged as a reset.
    pub fn set_initial_pose(&mut self, pose: &Pose) {
        self.reset_engine(pose);
    }

    fn reset_engine(&mut self, pose: &Pose) {
        self.engine.reset(pose);
        self.remaining = self.reset_countdown;
        self.lost = false;
    }

    pub fn pause(&mut self) -> bool {
        if self.paused {
            warn!("odometry: Already paused!");
        } else {
            self.paused = true;
            info!("odometry: paused!");
        }
        true
    }

    pub fn resume(&mut self) -> bool {
        if !self.paused {
            warn!("odometry: Already running!");
        } else {
            self.paused = false;
            info!("odometry: resumed!");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::EngineKind;
    use crate::frames::TransformError;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    // =========================================================================
    // == Scripted collaborators ==
    // =========================================================================

    /// What the scripted engine recorded, shared with the test body.
    #[derive(Default)]
    struct EngineLog {
        calls: usize,
        guesses: Vec<Option<Pose>>,
        resets: Vec<Pose>,
    }

    /// Succeeds or fails according to a script; on success it applies the guess.
    struct ScriptedEngine {
        script: VecDeque<bool>,
        pose: Pose,
        previous_stamp: Stamp,
        log: Arc<Mutex<EngineLog>>,
    }

    impl OdometryEngine for ScriptedEngine {
        fn process(
            &mut self,
            data: &mut SensorData,
            guess: Option<&Pose>,
            info: &mut OdometryInfo,
        ) -> Option<Pose> {
            let mut log = self.log.lock();
            log.calls += 1;
            log.guesses.push(guess.copied());
            if self.script.pop_front().unwrap_or(true) {
                if let Some(guess) = guess {
                    self.pose *= *guess;
                }
                self.previous_stamp = data.stamp;
                info.inliers = 100;
                info.variance = 0.01;
                Some(self.pose)
            } else {
                info.lost = true;
                None
            }
        }

        fn reset(&mut self, pose: &Pose) {
            self.pose = *pose;
            self.previous_stamp = 0.0;
            self.log.lock().resets.push(*pose);
        }

        fn pose(&self) -> &Pose {
            &self.pose
        }

        fn previous_stamp(&self) -> Stamp {
            self.previous_stamp
        }

        fn previous_velocity(&self) -> Option<Pose> {
            None
        }

        fn kind(&self) -> EngineKind {
            EngineKind::FrameToFrame
        }
    }

    /// Answers fixed transforms for `(from, to)` pairs, at any stamp.
    #[derive(Default)]
    struct ScriptedOracle {
        entries: Vec<(String, String, Stamp, Pose)>,
    }

    impl ScriptedOracle {
        fn with(mut self, from: &str, to: &str, stamp: Stamp, pose: Pose) -> Self {
            self.entries
                .push((from.to_string(), to.to_string(), stamp, pose));
            self
        }
    }

    impl TransformOracle for ScriptedOracle {
        fn lookup(
            &self,
            from_frame: &str,
            to_frame: &str,
            stamp: Stamp,
            _timeout: Option<Duration>,
        ) -> Result<Pose, TransformError> {
            self.entries
                .iter()
                .find(|(f, t, s, _)| f == from_frame && t == to_frame && *s == stamp)
                .map(|(_, _, _, pose)| *pose)
                .ok_or_else(|| TransformError::UnknownFrame(to_frame.to_string()))
        }
    }

    fn supervisor_with(
        script: &[bool],
        config: SupervisorConfig,
    ) -> (TrackingSupervisor, Arc<Mutex<EngineLog>>) {
        let log = Arc::new(Mutex::new(EngineLog::default()));
        let engine = ScriptedEngine {
            script: script.iter().copied().collect(),
            pose: Pose::identity(),
            previous_stamp: 0.0,
            log: Arc::clone(&log),
        };
        (TrackingSupervisor::new(Box::new(engine), config), log)
    }

    fn budget(reset_countdown: u32) -> SupervisorConfig {
        SupervisorConfig {
            reset_countdown,
            ..Default::default()
        }
    }

    fn snapshot(stamp: Stamp) -> SensorData {
        SensorData {
            stamp,
            ..Default::default()
        }
    }

    fn run(sup: &mut TrackingSupervisor, oracle: &dyn TransformOracle, n: usize) -> Vec<CycleOutcome> {
        (0..n)
            .map(|i| sup.process_data(snapshot(1.0 + i as f64), oracle))
            .collect()
    }

    fn recoveries(outcomes: &[CycleOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|o| matches!(o, CycleOutcome::Processed(r) if r.recovery.is_some()))
            .count()
    }

    // =========================================================================
    // == Failure budget ==
    // =========================================================================

    #[test]
    fn test_fewer_failures_than_budget_do_not_reset() {
        let (mut sup, log) = supervisor_with(&[false, false], budget(3));
        sup.set_initial_pose(&pose_from_xyzrpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        let before = *sup.engine().pose();
        let resets_before = log.lock().resets.len();

        let outcomes = run(&mut sup, &ScriptedOracle::default(), 2);

        assert_eq!(recoveries(&outcomes), 0);
        assert_eq!(log.lock().resets.len(), resets_before);
        assert_eq!(*sup.engine().pose(), before);
        assert_eq!(sup.state(), TrackingState::LostPending(1));
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, CycleOutcome::Processed(r) if r.is_lost())));
    }

    #[test]
    fn test_exactly_budget_failures_reset_once_and_rearm() {
        let (mut sup, log) = supervisor_with(&[false, false, false], budget(3));

        let outcomes = run(&mut sup, &ScriptedOracle::default(), 3);

        assert_eq!(recoveries(&outcomes), 1);
        assert!(matches!(
            &outcomes[2],
            CycleOutcome::Processed(r) if r.recovery.is_some()
        ));
        assert_eq!(log.lock().resets.len(), 1);
        assert_eq!(sup.remaining_failures(), 3);
        assert_eq!(sup.state(), TrackingState::Running);
    }

    #[test]
    fn test_success_rearms_counter() {
        // fail, fail, succeed, fail, fail: no reset with a budget of 3.
        let (mut sup, log) = supervisor_with(&[false, false, true, false, false], budget(3));

        let outcomes = run(&mut sup, &ScriptedOracle::default(), 5);

        assert_eq!(recoveries(&outcomes), 0);
        assert!(log.lock().resets.is_empty());
        assert_eq!(sup.remaining_failures(), 1);

        // A third consecutive failure does trigger it.
        let (mut sup, _) =
            supervisor_with(&[false, false, true, false, false, false], budget(3));
        let outcomes = run(&mut sup, &ScriptedOracle::default(), 6);
        assert_eq!(recoveries(&outcomes), 1);
    }

    #[test]
    fn test_zero_budget_never_recovers() {
        let (mut sup, log) = supervisor_with(&[false; 50], budget(0));

        let outcomes = run(&mut sup, &ScriptedOracle::default(), 50);

        assert_eq!(recoveries(&outcomes), 0);
        assert!(log.lock().resets.is_empty());
        assert_eq!(sup.state(), TrackingState::LostPending(0));
    }

    // =========================================================================
    // == Recovery target ==
    // =========================================================================

    #[test]
    fn test_failed_cycle_reports_sentinel_variance() {
        let (mut sup, _) = supervisor_with(&[true, false], budget(3));
        let outcomes = run(&mut sup, &ScriptedOracle::default(), 2);

        let CycleOutcome::Processed(tracked) = &outcomes[0] else {
            panic!("first cycle not processed");
        };
        assert_eq!(tracked.info.variance, 0.01);

        let CycleOutcome::Processed(lost) = &outcomes[1] else {
            panic!("second cycle not processed");
        };
        assert!(lost.is_lost());
        assert_eq!(lost.info.variance, BAD_COVARIANCE);
    }

    #[test]
    fn test_recovery_prefers_transform_tree() {
        let fused = pose_from_xyzrpy(4.0, 5.0, 0.0, 0.0, 0.0, 0.2);
        let (mut sup, log) = supervisor_with(&[false, false], budget(2));
        assert!(sup.reset_to_pose(1.0, 2.0, 3.0, 0.0, 0.0, 0.0));
        // Only the last failure's stamp has a fused pose.
        let oracle = ScriptedOracle::default().with("odom", "base_link", 2.0, fused);

        let outcomes = run(&mut sup, &oracle, 2);

        match &outcomes[1] {
            CycleOutcome::Processed(r) => {
                assert_eq!(r.recovery, Some(Recovery::FromTransform(fused)))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(*sup.engine().pose(), fused);
        assert_eq!(log.lock().resets.last(), Some(&fused));
    }

    #[test]
    fn test_recovery_falls_back_to_own_pose() {
        let (mut sup, _) = supervisor_with(&[false, false], budget(2));
        assert!(sup.reset_to_pose(1.0, 2.0, 3.0, 0.0, 0.0, 0.0));
        let target = pose_from_xyzrpy(1.0, 2.0, 3.0, 0.0, 0.0, 0.0);

        let outcomes = run(&mut sup, &ScriptedOracle::default(), 2);

        match &outcomes[1] {
            CycleOutcome::Processed(r) => assert_eq!(r.recovery, Some(Recovery::InPlace(target))),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(*sup.engine().pose(), target);
    }

    // =========================================================================
    // == Guess ==
    // =========================================================================

    fn tf_guess_config() -> SupervisorConfig {
        SupervisorConfig {
            guess_source: GuessSource::Tf {
                odom_frame: "odom".to_string(),
                guess_frame: "base_footprint".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_guess_passed_to_engine() {
        let t1 = pose_from_xyzrpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.1);
        let t2 = pose_from_xyzrpy(1.3, 0.2, 0.0, 0.0, 0.0, 0.25);
        // The engine has not processed anything yet, so its previous stamp is 0.
        let oracle = ScriptedOracle::default()
            .with("odom", "base_footprint", 0.0, t1)
            .with("odom", "base_footprint", 1.0, t2);
        let (mut sup, log) = supervisor_with(&[true], tf_guess_config());

        let outcome = sup.process_data(snapshot(1.0), &oracle);

        assert!(matches!(outcome, CycleOutcome::Processed(ref r) if !r.is_lost()));
        let log = log.lock();
        assert_eq!(log.calls, 1);
        let guess = log.guesses[0].unwrap();
        assert_relative_eq!(guess, t1.inverse() * t2, epsilon = 1e-12);
    }

    #[test]
    fn test_guess_failure_skips_engine() {
        let t1 = pose_from_xyzrpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.1);
        // Only the previous stamp resolves.
        let oracle = ScriptedOracle::default().with("odom", "base_footprint", 0.0, t1);
        let (mut sup, log) = supervisor_with(&[true], tf_guess_config());

        let outcome = sup.process_data(snapshot(1.0), &oracle);

        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(AbortReason::GuessUnavailable(_))
        ));
        assert_eq!(log.lock().calls, 0);
    }

    #[test]
    fn test_no_guess_source_passes_none() {
        let (mut sup, log) = supervisor_with(&[true], SupervisorConfig::default());
        sup.process_data(snapshot(1.0), &ScriptedOracle::default());
        assert_eq!(log.lock().guesses, vec![None]);
    }

    // =========================================================================
    // == Pause gate ==
    // =========================================================================

    #[test]
    fn test_pause_gate_blocks_engine() {
        let (mut sup, log) = supervisor_with(&[false, false, false, false], budget(2));
        run(&mut sup, &ScriptedOracle::default(), 1);
        let state = sup.state();
        let pose = *sup.engine().pose();

        assert!(sup.pause());
        assert!(sup.pause());
        let outcomes = run(&mut sup, &ScriptedOracle::default(), 5);

        assert!(outcomes.iter().all(|o| matches!(o, CycleOutcome::Paused)));
        assert_eq!(log.lock().calls, 1);
        assert_eq!(sup.state(), state);
        assert_eq!(*sup.engine().pose(), pose);

        assert!(sup.resume());
        assert!(sup.resume());
        assert!(!sup.is_paused());
        run(&mut sup, &ScriptedOracle::default(), 1);
        assert_eq!(log.lock().calls, 2);
    }

    // =========================================================================
    // == Ground truth seeding ==
    // =========================================================================

    fn ground_truth_config() -> SupervisorConfig {
        SupervisorConfig {
            frames: TrackingFrames {
                ground_truth_frame_id: "world".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_ground_truth_seeds_once() {
        let truth = pose_from_xyzrpy(2.0, 1.0, 0.0, 0.0, 0.0, 0.5);
        let oracle = ScriptedOracle::default().with("world", "base_link", 1.0, truth);
        let (mut sup, log) = supervisor_with(&[true, true], ground_truth_config());

        let first = sup.process_data(snapshot(1.0), &oracle);
        assert!(matches!(first, CycleOutcome::Processed(_)));
        assert_eq!(log.lock().resets, vec![truth]);
        assert_eq!(*sup.engine().pose(), truth);

        // No ground truth at stamp 2.0, but the pose is no longer identity.
        let second = sup.process_data(snapshot(2.0), &oracle);
        assert!(matches!(second, CycleOutcome::Processed(_)));
        assert_eq!(log.lock().resets.len(), 1);
    }

    #[test]
    fn test_ground_truth_missing_aborts() {
        let (mut sup, log) = supervisor_with(&[true], ground_truth_config());

        let outcome = sup.process_data(snapshot(1.0), &ScriptedOracle::default());

        assert!(matches!(
            outcome,
            CycleOutcome::Aborted(AbortReason::GroundTruthUnavailable { .. })
        ));
        assert_eq!(log.lock().calls, 0);
    }

    // =========================================================================
    // == Services ==
    // =========================================================================

    #[test]
    fn test_explicit_reset_rearms() {
        let (mut sup, log) = supervisor_with(&[false, false], budget(3));
        run(&mut sup, &ScriptedOracle::default(), 2);
        assert_eq!(sup.state(), TrackingState::LostPending(1));

        assert!(sup.reset());
        assert_eq!(sup.state(), TrackingState::Running);
        assert_eq!(sup.remaining_failures(), 3);
        assert_eq!(log.lock().resets, vec![Pose::identity()]);
    }
}
