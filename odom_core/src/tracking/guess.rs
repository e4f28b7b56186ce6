// odom_core/src/tracking/guess.rs

use thiserror::Error;

use crate::frames::{lookup_logged, TransformOracle, WaitPolicy};
use crate::types::{Pose, Stamp};

/// Where the a-priori motion of a cycle comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GuessSource {
    /// The engine runs without a guess (it may still predict on its own).
    #[default]
    None,
    /// Motion of `guess_frame` in `odom_frame`, as seen on the transform tree.
    Tf {
        odom_frame: String,
        guess_frame: String,
    },
}

/// Raised when a TF guess is configured but one of its lookups failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("\"guess_from_tf\" is true, but guess cannot be computed between frames \"{odom_frame}\" -> \"{guess_frame}\"")]
pub struct GuessUnavailable {
    pub odom_frame: String,
    pub guess_frame: String,
}

/// Derives the motion guess handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct GuessProvider {
    source: GuessSource,
    policy: WaitPolicy,
}

impl GuessProvider {
    pub fn new(source: GuessSource, policy: WaitPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> &GuessSource {
        &self.source
    }

    /// Computes the guess for the interval `previous_stamp -> stamp`.
    ///
    /// `Ok(None)` means "no guess requested". With a TF source the guess is
    /// `T(previous_stamp)⁻¹ · T(stamp)`, both transforms looked up
    /// `odom_frame -> guess_frame`; if either is missing the whole cycle
    /// must be skipped.
    pub fn compute(
        &self,
        oracle: &dyn TransformOracle,
        previous_stamp: Stamp,
        stamp: Stamp,
    ) -> Result<Option<Pose>, GuessUnavailable> {
        let GuessSource::Tf {
            odom_frame,
            guess_frame,
        } = &self.source
        else {
            return Ok(None);
        };

        let previous = lookup_logged(oracle, &self.policy, odom_frame, guess_frame, previous_stamp);
        let current = lookup_logged(oracle, &self.policy, odom_frame, guess_frame, stamp);
        match (previous, current) {
            (Some(previous), Some(current)) => Ok(Some(previous.inverse() * current)),
            _ => Err(GuessUnavailable {
                odom_frame: odom_frame.clone(),
                guess_frame: guess_frame.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::TfBuffer;
    use crate::types::pose_from_xyzrpy;
    use approx::assert_relative_eq;

    fn tf_source() -> GuessSource {
        GuessSource::Tf {
            odom_frame: "odom".to_string(),
            guess_frame: "base_footprint".to_string(),
        }
    }

    fn no_wait() -> WaitPolicy {
        WaitPolicy {
            wait_for_transform: false,
            duration: 0.0,
        }
    }

    #[test]
    fn test_no_source_means_no_guess() {
        let provider = GuessProvider::default();
        let tf = TfBuffer::default();
        assert_eq!(provider.compute(&tf, 1.0, 2.0), Ok(None));
    }

    #[test]
    fn test_guess_is_relative_motion() {
        let tf = TfBuffer::default();
        let t1 = pose_from_xyzrpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.3);
        let t2 = pose_from_xyzrpy(1.5, 0.4, 0.0, 0.0, 0.0, 0.5);
        tf.set_transform("odom", "base_footprint", 1.0, t1, false).unwrap();
        tf.set_transform("odom", "base_footprint", 2.0, t2, false).unwrap();

        let provider = GuessProvider::new(tf_source(), no_wait());
        let guess = provider.compute(&tf, 1.0, 2.0).unwrap().unwrap();

        let expected = t1.inverse() * t2;
        assert_relative_eq!(guess.to_homogeneous(), expected.to_homogeneous(), epsilon = 1e-9);
        assert_relative_eq!(t1 * guess, t2, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_transform_is_unavailable() {
        let tf = TfBuffer::default();
        tf.set_transform("odom", "base_footprint", 1.0, Pose::identity(), false)
            .unwrap();

        let provider = GuessProvider::new(tf_source(), no_wait());
        // 5.0 is past the newest sample.
        let err = provider.compute(&tf, 1.0, 5.0).unwrap_err();
        assert_eq!(err.odom_frame, "odom");
        assert_eq!(err.guess_frame, "base_footprint");
    }
}
