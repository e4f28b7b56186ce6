// odom_core/src/params/migration.rs

use std::collections::BTreeMap;
use tracing::{error, warn};

use super::{ParamValue, ParametersMap};

/// What happened to a parameter name that is no longer accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Renamed; the value carries over to the new name.
    Renamed(&'static str),
    /// Gone; optionally there is a similar parameter worth looking at.
    Removed { similar: Option<&'static str> },
}

/// Old parameter names and their fate.
pub fn removed_parameters() -> &'static [(&'static str, Removal)] {
    use Removal::*;
    &[
        ("Odom/Type", Renamed("Vis/FeatureType")),
        ("Odom/MinInliers", Renamed("Vis/MinInliers")),
        ("Odom/InlierDistance", Renamed("Vis/InlierDistance")),
        ("Odom/Iterations", Renamed("Vis/Iterations")),
        ("Odom/MaxDepth", Renamed("Vis/MaxDepth")),
        ("Odom/RoiRatios", Renamed("Vis/RoiRatios")),
        ("Odom/PnPReprojError", Renamed("Vis/PnPReprojError")),
        ("Odom/PnPFlags", Renamed("Vis/PnPFlags")),
        ("Odom/Force2D", Renamed("Reg/Force3DoF")),
        (
            "Odom/VarianceFromInliersCount",
            Renamed("Reg/VarianceFromInliersCount"),
        ),
        ("OdomBow/LocalHistorySize", Renamed("OdomF2M/MaxSize")),
        ("OdomFlow/WinSize", Renamed("Vis/CorFlowWinSize")),
        ("OdomBow/ReinitializeRefFrame", Removed { similar: None }),
        ("OdomBow/FixedLocalMapPath", Removed { similar: None }),
        (
            "OdomF2M/FixedMapPath",
            Removed {
                similar: Some("OdomF2M/MaxSize"),
            },
        ),
        (
            "Odom/FeaturesRatio",
            Removed {
                similar: Some("Odom/KeyFrameThr"),
            },
        ),
    ]
}

/// The result of applying the migration table to user overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// `(old, new, value)` for every renamed parameter that was set.
    pub migrated: Vec<(String, String, String)>,
    /// `(old, similar)` for every removed parameter that was set.
    pub removed: Vec<(String, Option<String>)>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.migrated.is_empty() && self.removed.is_empty()
    }

    pub fn log(&self) {
        for (old, new, value) in &self.migrated {
            warn!(
                "Odometry: Parameter name changed: \"{}\" -> \"{}\". Please update your configuration accordingly. Value \"{}\" is still set to the new parameter name.",
                old, new, value
            );
        }
        for (old, similar) in &self.removed {
            match similar {
                Some(similar) => error!(
                    "Odometry: Parameter \"{}\" doesn't exist anymore! You may look at this similar parameter: \"{}\"",
                    old, similar
                ),
                None => error!("Odometry: Parameter \"{}\" doesn't exist anymore!", old),
            }
        }
    }
}

/// Carries values set under deprecated names over to their new names.
/// Logging is left to the caller through [`MigrationReport::log`].
pub fn migrate_deprecated(
    params: &mut ParametersMap,
    overrides: &BTreeMap<String, ParamValue>,
) -> MigrationReport {
    let mut report = MigrationReport::default();
    for (old, removal) in removed_parameters() {
        let Some(value) = overrides.get(*old) else {
            continue;
        };
        match removal {
            Removal::Renamed(new) => {
                let value = value.to_string();
                params.insert(new.to_string(), value.clone());
                report
                    .migrated
                    .push((old.to_string(), new.to_string(), value));
            }
            Removal::Removed { similar } => {
                report
                    .removed
                    .push((old.to_string(), similar.map(str::to_string)));
            }
        }
    }
    report
}
