// odom_core/src/params/mod.rs

//! Engine parameters: defaults, file loading, typed overrides and the
//! deprecated-name migration step.
//!
//! Parameters are resolved once at startup into a flat [`ParametersMap`]
//! (`"Group/Name" -> "value"`). The order of precedence is defaults, then the
//! parameter file, then typed node overrides, then command-line arguments,
//! then migrated deprecated names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::error::{OdomError, Result};

mod migration;

pub use migration::{migrate_deprecated, removed_parameters, MigrationReport, Removal};

/// Flat engine parameter map, keyed by `"Group/Name"`.
pub type ParametersMap = BTreeMap<String, String>;

// --- Parameter names used outside the engine ---
pub const K_ODOM_STRATEGY: &str = "Odom/Strategy";
pub const K_ODOM_RESET_COUNTDOWN: &str = "Odom/ResetCountdown";
pub const K_ODOM_GUESS_MOTION: &str = "Odom/GuessMotion";
pub const K_ODOM_FIXED_VARIANCE: &str = "Odom/FixedVariance";
pub const K_ODOM_F2M_MAX_SIZE: &str = "OdomF2M/MaxSize";
pub const K_REG_VARIANCE_FROM_INLIERS: &str = "Reg/VarianceFromInliersCount";
pub const K_VIS_MIN_INLIERS: &str = "Vis/MinInliers";
pub const K_ICP_CORRESPONDENCE_RATIO: &str = "Icp/CorrespondenceRatio";

/// Lowest accepted value of `Vis/MinInliers`.
pub const MIN_INLIERS_FLOOR: i64 = 8;

/// Which sensing modality the node runs with. Selects the parameter groups
/// exposed to the engine and the per-cycle log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdometryModality {
    #[default]
    Rgbd,
    Stereo,
    Icp,
    RgbdIcp,
}

impl OdometryModality {
    pub fn stereo(&self) -> bool {
        matches!(self, OdometryModality::Stereo)
    }

    pub fn visual(&self) -> bool {
        !matches!(self, OdometryModality::Icp)
    }

    pub fn icp(&self) -> bool {
        matches!(self, OdometryModality::Icp | OdometryModality::RgbdIcp)
    }
}

impl FromStr for OdometryModality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgbd" => Ok(Self::Rgbd),
            "stereo" => Ok(Self::Stereo),
            "icp" => Ok(Self::Icp),
            "rgbd_icp" | "rgbdicp" => Ok(Self::RgbdIcp),
            other => Err(format!(
                "unknown modality \"{}\" (expected rgbd, stereo, icp or rgbd_icp)",
                other
            )),
        }
    }
}

/// A typed parameter value as written in a configuration file.
/// Converted to the engine's string form once, at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(x) => {
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{}", *x as i64)
                } else {
                    write!(f, "{}", x)
                }
            }
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

/// The odometry parameter set with its default values, restricted to the
/// groups relevant for `modality`.
pub fn default_odometry_parameters(modality: OdometryModality) -> ParametersMap {
    let mut params = ParametersMap::new();
    let mut set = |k: &str, v: &str| {
        params.insert(k.to_string(), v.to_string());
    };

    // --- Odometry (always) ---
    set(K_ODOM_STRATEGY, "0");
    set(K_ODOM_RESET_COUNTDOWN, "0");
    set(K_ODOM_GUESS_MOTION, "true");
    set(K_ODOM_FIXED_VARIANCE, "0.0001");
    set("Odom/Holonomic", "true");
    set("Odom/FillInfoData", "true");
    set("Odom/KeyFrameThr", "0.3");
    set(K_ODOM_F2M_MAX_SIZE, "2000");
    set(K_REG_VARIANCE_FROM_INLIERS, "false");
    set("Reg/Force3DoF", "false");

    // --- Visual ---
    if modality.visual() {
        set(K_VIS_MIN_INLIERS, "20");
        set("Vis/InlierDistance", "0.1");
        set("Vis/Iterations", "300");
        set("Vis/MaxDepth", "0");
        set("Vis/FeatureType", "6");
        set("Vis/CorFlowWinSize", "16");
        set("Vis/PnPReprojError", "2");
        set("Vis/PnPFlags", "0");
        set("Vis/RoiRatios", "0.0 0.0 0.0 0.0");
    }

    // --- Stereo ---
    if modality.stereo() {
        set("Stereo/WinWidth", "15");
        set("Stereo/MaxDisparity", "128");
        set("Stereo/OpticalFlow", "true");
    }

    // --- ICP ---
    if modality.icp() {
        set("Icp/MaxCorrespondenceDistance", "0.05");
        set("Icp/Iterations", "30");
        set(K_ICP_CORRESPONDENCE_RATIO, "0.2");
        set("Icp/VoxelSize", "0.0");
        set("Icp/PointToPlane", "false");
    }

    params
}

/// Expands a leading `~` to `home` and makes relative paths absolute against `cwd`.
pub fn resolve_config_path(raw: &str, home: Option<&Path>, cwd: &Path) -> PathBuf {
    let expanded = match (raw.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

/// Reads a TOML parameter file. Nested tables are flattened with `/`, so
/// `[Odom] ResetCountdown = 3` and `"Odom/ResetCountdown" = 3` are equivalent.
pub fn read_parameter_file(path: &Path) -> Result<ParametersMap> {
    if !path.exists() {
        return Err(OdomError::ConfigNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| OdomError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_parameter_text(&text).map_err(|message| OdomError::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parses the contents of a parameter file. See [`read_parameter_file`].
pub fn parse_parameter_text(text: &str) -> std::result::Result<ParametersMap, String> {
    let table: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;
    let mut params = ParametersMap::new();
    flatten_table("", &table, &mut params);
    Ok(params)
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut ParametersMap) {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}/{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_table(&name, inner, out),
            other => {
                out.insert(name, toml_scalar_to_string(other));
            }
        }
    }
}

fn toml_scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => ParamValue::Integer(*i).to_string(),
        toml::Value::Float(x) => ParamValue::Float(*x).to_string(),
        toml::Value::Boolean(b) => ParamValue::Bool(*b).to_string(),
        toml::Value::Datetime(d) => d.to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(toml_scalar_to_string)
            .collect::<Vec<_>>()
            .join(" "),
        toml::Value::Table(_) => String::new(),
    }
}

/// Splits a `Key=Value` command-line assignment.
pub fn parse_assignment(arg: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got \"{}\"", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in \"{}\"", arg));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Where the values of the parameter map came from, in order of precedence.
#[derive(Debug, Default)]
pub struct ParameterSources<'a> {
    pub modality: OdometryModality,
    /// Already resolved path of the parameter file, if any.
    pub config_path: Option<&'a Path>,
    /// Typed overrides from the node configuration. May contain deprecated names.
    pub overrides: Option<&'a BTreeMap<String, ParamValue>>,
    /// `Key=Value` pairs from the command line.
    pub arguments: &'a [(String, String)],
}

/// The outcome of parameter resolution.
#[derive(Debug, Clone)]
pub struct ResolvedParameters {
    /// Parameters handed to the engine (`Odom/ResetCountdown` forced to `"0"`).
    pub engine: ParametersMap,
    /// Consecutive failures tolerated before an automatic reset. 0 disables it.
    pub reset_countdown: u32,
    pub migration: MigrationReport,
}

/// Runs the whole resolution pipeline. Never fails: problems are logged and
/// the affected values keep their defaults.
pub fn resolve_parameters(sources: &ParameterSources) -> ResolvedParameters {
    let mut params = default_odometry_parameters(sources.modality);

    if let Some(path) = sources.config_path {
        match read_parameter_file(path) {
            Ok(file_values) => {
                info!("Odometry: Loading parameters from {}", path.display());
                // Only update odometry parameters.
                for (key, value) in params.iter_mut() {
                    if let Some(v) = file_values.get(key) {
                        *value = v.clone();
                    }
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    if let Some(overrides) = sources.overrides {
        for (key, value) in params.iter_mut() {
            if let Some(v) = overrides.get(key) {
                let v = v.to_string();
                info!("Setting odometry parameter \"{}\"=\"{}\"", key, v);
                *value = v;
            }
        }
    }

    for (key, value) in sources.arguments {
        if let Some(current) = params.get_mut(key) {
            info!(
                "Update odometry parameter \"{}\"=\"{}\" from arguments",
                key, value
            );
            *current = value.clone();
        }
    }

    let migration = match sources.overrides {
        Some(overrides) => migrate_deprecated(&mut params, overrides),
        None => MigrationReport::default(),
    };
    migration.log();

    enforce_min_inliers(&mut params);
    let reset_countdown = take_reset_countdown(&mut params);

    ResolvedParameters {
        engine: params,
        reset_countdown,
        migration,
    }
}

/// `Vis/MinInliers` below the floor is raised to it.
pub fn enforce_min_inliers(params: &mut ParametersMap) {
    if let Some(value) = params.get_mut(K_VIS_MIN_INLIERS) {
        let parsed = value.trim().parse::<i64>().unwrap_or(0);
        if parsed < MIN_INLIERS_FLOOR {
            warn!(
                "Parameter min_inliers must be >= {}, setting to {}...",
                MIN_INLIERS_FLOOR, MIN_INLIERS_FLOOR
            );
            *value = MIN_INLIERS_FLOOR.to_string();
        }
    }
}

/// Moves `Odom/ResetCountdown` out of the engine parameters: the supervisor
/// owns the reset policy, the engine gets `"0"` so it never resets by itself.
pub fn take_reset_countdown(params: &mut ParametersMap) -> u32 {
    let countdown = get_i64(params, K_ODOM_RESET_COUNTDOWN, 0).max(0) as u32;
    params.insert(K_ODOM_RESET_COUNTDOWN.to_string(), "0".to_string());
    countdown
}

// --- Typed accessors ---

pub fn get_bool(params: &ParametersMap, key: &str, default: bool) -> bool {
    match params.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" || v == "1" => true,
        Some(v) if v == "false" || v == "0" => false,
        _ => default,
    }
}

pub fn get_i64(params: &ParametersMap, key: &str, default: i64) -> i64 {
    params
        .get(key)
        .and_then(|v| {
            let v = v.trim();
            v.parse::<i64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|x| x as i64))
        })
        .unwrap_or(default)
}

pub fn get_f64(params: &ParametersMap, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}
