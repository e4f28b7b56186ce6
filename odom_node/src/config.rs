// odom_node/src/config.rs

//! Node configuration: loading, logging of the effective values and
//! conversion into the settings of the tracking loop.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use odom_core::frames::{prefixed, WaitPolicy};
use odom_core::params::{resolve_config_path, OdometryModality, ParamValue};
use odom_core::tracking::{GuessSource, SupervisorConfig, TrackingFrames};
use odom_core::types::{is_identity, parse_pose_str, pretty_print, Pose};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{NodeError, Result};

/// Environment variables with this prefix override file values (`ODOM_FRAME_ID`, ...).
pub const ENV_PREFIX: &str = "ODOM_";

/// Everything the node reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub frame_id: String,
    pub odom_frame_id: String,
    pub ground_truth_frame_id: String,
    /// Empty means `frame_id`.
    pub guess_frame_id: String,
    pub tf_prefix: String,
    pub publish_tf: bool,
    pub wait_for_transform: bool,
    /// Seconds.
    pub wait_for_transform_duration: f64,
    pub publish_null_when_lost: bool,
    pub guess_from_tf: bool,
    /// `"x y z roll pitch yaw"`, angles in radians.
    pub initial_pose: String,
    /// Engine parameter file.
    pub config_path: String,
    pub modality: OdometryModality,
    /// Capacity of every output topic.
    pub queue_size: usize,
    /// Typed engine parameter overrides, keyed `"Group/Name"`.
    pub parameters: BTreeMap<String, ParamValue>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            frame_id: "base_link".to_string(),
            odom_frame_id: "odom".to_string(),
            ground_truth_frame_id: String::new(),
            guess_frame_id: String::new(),
            tf_prefix: String::new(),
            publish_tf: true,
            wait_for_transform: true,
            wait_for_transform_duration: 0.1,
            publish_null_when_lost: true,
            guess_from_tf: false,
            initial_pose: String::new(),
            config_path: String::new(),
            modality: OdometryModality::default(),
            queue_size: 10,
            parameters: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    /// Defaults, then the TOML file (if any), then `ODOM_*` environment variables.
    /// A file that was asked for but does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(NodeConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(NodeError::ConfigNotFound(path.to_path_buf()));
            }
            info!("Loading node configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        let config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(NodeConfig::default()))
            .merge(Toml::string(text))
            .extract()?;
        Ok(config)
    }

    /// Applies the startup rules and logs the effective values.
    ///
    /// Nothing here fails: a malformed initial pose is logged and ignored, and
    /// a TF guess that would read back the node's own broadcast is disabled.
    pub fn settings(&self, home: Option<&Path>, cwd: &Path) -> NodeSettings {
        let guess_frame_id = if self.guess_frame_id.is_empty() {
            self.frame_id.clone()
        } else {
            self.guess_frame_id.clone()
        };

        let mut guess_from_tf = self.guess_from_tf;
        if self.publish_tf && guess_from_tf && guess_frame_id == self.frame_id {
            warn!(
                "\"publish_tf\" and \"guess_from_tf\" cannot be used at the same time if \
                 \"guess_frame_id\" and \"frame_id\" are the same frame (value=\"{}\"). \
                 \"guess_from_tf\" is disabled.",
                self.frame_id
            );
            guess_from_tf = false;
        }

        let frames = TrackingFrames {
            frame_id: prefixed(&self.tf_prefix, &self.frame_id),
            odom_frame_id: prefixed(&self.tf_prefix, &self.odom_frame_id),
            ground_truth_frame_id: prefixed(&self.tf_prefix, &self.ground_truth_frame_id),
        };

        let initial_pose = match self.initial_pose.trim() {
            "" => None,
            raw => match parse_pose_str(raw) {
                Some(pose) => Some(pose),
                None => {
                    error!(
                        "Wrong initial_pose format: {}. It should be \"x y z roll pitch yaw\" \
                         with angle in radians. Identity will be used...",
                        raw
                    );
                    None
                }
            },
        };

        let config_path = match self.config_path.trim() {
            "" => None,
            raw => Some(resolve_config_path(raw, home, cwd)),
        };

        let mut wait_duration = self.wait_for_transform_duration;
        if !wait_duration.is_finite() || Duration::try_from_secs_f64(wait_duration.max(0.0)).is_err() {
            let fallback = WaitPolicy::default().duration;
            error!(
                "Wrong wait_for_transform_duration: {}. {:.6} seconds will be used...",
                wait_duration, fallback
            );
            wait_duration = fallback;
        }
        let wait_policy = WaitPolicy {
            wait_for_transform: self.wait_for_transform,
            duration: wait_duration,
        };

        let guess_source = if guess_from_tf {
            GuessSource::Tf {
                odom_frame: frames.odom_frame_id.clone(),
                guess_frame: guess_frame_id.clone(),
            }
        } else {
            GuessSource::None
        };

        info!("Odometry: frame_id               = {}", frames.frame_id);
        info!("Odometry: odom_frame_id          = {}", frames.odom_frame_id);
        info!("Odometry: publish_tf             = {}", self.publish_tf);
        info!("Odometry: wait_for_transform     = {}", self.wait_for_transform);
        info!("Odometry: wait_for_transform_duration  = {:.6}", wait_duration);
        info!("Odometry: initial_pose           = {}", initial_pose.as_ref().map(pretty_print).unwrap_or_default());
        info!("Odometry: ground_truth_frame_id  = {}", frames.ground_truth_frame_id);
        info!("Odometry: guess_frame_id         = {}", guess_frame_id);
        info!("Odometry: guess_from_tf          = {}", guess_from_tf);
        info!("Odometry: publish_null_when_lost = {}", self.publish_null_when_lost);
        info!("Odometry: modality               = {:?}", self.modality);

        NodeSettings {
            frames,
            guess_source,
            wait_policy,
            publish_tf: self.publish_tf,
            publish_null_when_lost: self.publish_null_when_lost,
            initial_pose: initial_pose.filter(|p| !is_identity(p)),
            config_path,
            modality: self.modality,
            queue_size: self.queue_size.max(1),
        }
    }
}

/// The effective startup settings, prefixes applied and conflicts resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    pub frames: TrackingFrames,
    pub guess_source: GuessSource,
    pub wait_policy: WaitPolicy,
    pub publish_tf: bool,
    pub publish_null_when_lost: bool,
    /// `None` when unset, malformed or identity.
    pub initial_pose: Option<Pose>,
    pub config_path: Option<PathBuf>,
    pub modality: OdometryModality,
    pub queue_size: usize,
}

impl NodeSettings {
    pub fn supervisor_config(&self, reset_countdown: u32) -> SupervisorConfig {
        SupervisorConfig {
            frames: self.frames.clone(),
            guess_source: self.guess_source.clone(),
            wait_policy: self.wait_policy,
            reset_countdown,
        }
    }
}
