// odom_core/src/frames.rs

use std::time::Duration;
use thiserror::Error;

use crate::types::{Pose, Stamp};

pub mod buffer;

pub use buffer::TfBuffer;

/// Why a transform could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("frame \"{0}\" does not exist in the transform tree")]
    UnknownFrame(String),

    #[error("frames \"{from}\" and \"{to}\" are not part of the same tree")]
    NotConnected { from: String, to: String },

    #[error("lookup of \"{frame}\" at {requested:.6} would require extrapolation into the future (latest data at {latest:.6})")]
    ExtrapolationIntoFuture {
        frame: String,
        requested: Stamp,
        latest: Stamp,
    },

    #[error("lookup of \"{frame}\" at {requested:.6} would require extrapolation into the past (earliest data at {earliest:.6})")]
    ExtrapolationIntoPast {
        frame: String,
        requested: Stamp,
        earliest: Stamp,
    },

    #[error("setting \"{parent}\" as parent of \"{child}\" would create a loop")]
    Loop { parent: String, child: String },

    #[error("could not get transform from {from} to {to} (stamp={stamp:.6}) after {waited:.3} seconds: {reason}")]
    Timeout {
        from: String,
        to: String,
        stamp: Stamp,
        waited: f64,
        reason: String,
    },
}

impl TransformError {
    /// Errors that may go away once more transforms arrive.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransformError::UnknownFrame(_)
                | TransformError::NotConnected { .. }
                | TransformError::ExtrapolationIntoFuture { .. }
        )
    }
}

/// This is the contract for any object that can answer transform queries.
/// The `TfBuffer` implements it, as do the scripted mocks used in tests.
pub trait TransformOracle {
    /// Gets the pose of `to_frame` expressed in `from_frame` at `stamp`.
    ///
    /// A `stamp` of `0.0` asks for the latest available transform. With a
    /// `timeout` the call may block until the transform becomes available.
    fn lookup(
        &self,
        from_frame: &str,
        to_frame: &str,
        stamp: Stamp,
        timeout: Option<Duration>,
    ) -> Result<Pose, TransformError>;
}

/// How long lookups are allowed to wait for the transform tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub wait_for_transform: bool,
    /// Seconds.
    pub duration: f64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            wait_for_transform: true,
            duration: 0.1,
        }
    }
}

impl WaitPolicy {
    /// Waiting only makes sense for a concrete stamp and a positive duration.
    /// A duration that does not fit a `Duration` (infinite, NaN, huge) means no wait.
    pub fn timeout_for(&self, stamp: Stamp) -> Option<Duration> {
        if self.wait_for_transform && stamp != 0.0 && self.duration > 0.0 {
            Duration::try_from_secs_f64(self.duration).ok()
        } else {
            None
        }
    }
}

/// Looks up a transform with the wait policy applied, logging failures.
/// Failures are ordinary values for the caller; nothing propagates further.
pub fn lookup_logged(
    oracle: &dyn TransformOracle,
    policy: &WaitPolicy,
    from_frame: &str,
    to_frame: &str,
    stamp: Stamp,
) -> Option<Pose> {
    match oracle.lookup(from_frame, to_frame, stamp, policy.timeout_for(stamp)) {
        Ok(pose) => Some(pose),
        Err(e) => {
            tracing::warn!("odometry: {}", e);
            None
        }
    }
}

/// Applies a `tf_prefix` to a frame name (`prefix/frame`). Empty names stay empty.
pub fn prefixed(prefix: &str, frame: &str) -> String {
    if prefix.is_empty() || frame.is_empty() {
        frame.to_string()
    } else {
        format!("{}/{}", prefix, frame)
    }
}

/// Frame names are compared without a leading slash.
pub fn normalize(frame: &str) -> &str {
    frame.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_only_for_concrete_stamps() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.timeout_for(0.0), None);
        assert_eq!(policy.timeout_for(12.5), Some(Duration::from_millis(100)));

        let no_wait = WaitPolicy {
            wait_for_transform: false,
            duration: 0.1,
        };
        assert_eq!(no_wait.timeout_for(12.5), None);

        let zero = WaitPolicy {
            wait_for_transform: true,
            duration: 0.0,
        };
        assert_eq!(zero.timeout_for(12.5), None);
    }

    #[test]
    fn test_out_of_range_duration_does_not_wait() {
        for duration in [f64::INFINITY, f64::NAN, 1e30] {
            let policy = WaitPolicy {
                wait_for_transform: true,
                duration,
            };
            assert_eq!(policy.timeout_for(1.0), None);
        }
    }

    #[test]
    fn test_prefixed() {
        assert_eq!(prefixed("robot1", "base_link"), "robot1/base_link");
        assert_eq!(prefixed("", "base_link"), "base_link");
        assert_eq!(prefixed("robot1", ""), "");
    }
}
