// odom_core/src/types.rs

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

// --- Core Type Aliases ---
/// A rigid 3D transform. Identity means "not initialized yet".
pub type Pose = Isometry3<f64>;
/// Timestamps are seconds. A stamp of `0.0` means "latest available".
pub type Stamp = f64;

/// Builds a pose from a translation and roll/pitch/yaw angles in radians.
pub fn pose_from_xyzrpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Pose {
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

/// Splits a pose back into `[x, y, z, roll, pitch, yaw]`.
pub fn pose_to_xyzrpy(pose: &Pose) -> [f64; 6] {
    let t = pose.translation.vector;
    let (roll, pitch, yaw) = pose.rotation.euler_angles();
    [t.x, t.y, t.z, roll, pitch, yaw]
}

/// Exact identity check, used as the "uninitialized" sentinel.
pub fn is_identity(pose: &Pose) -> bool {
    pose.translation.vector == Vector3::zeros() && pose.rotation == UnitQuaternion::identity()
}

/// Human readable `xyz=... rpy=...` form for logs.
pub fn pretty_print(pose: &Pose) -> String {
    let [x, y, z, roll, pitch, yaw] = pose_to_xyzrpy(pose);
    format!(
        "xyz={:.6},{:.6},{:.6} rpy={:.6},{:.6},{:.6}",
        x, y, z, roll, pitch, yaw
    )
}

/// Parses the `"x y z roll pitch yaw"` form used by the `initial_pose` setting.
/// Returns `None` when the string does not contain exactly six numbers.
pub fn parse_pose_str(value: &str) -> Option<Pose> {
    let values: Vec<f64> = value
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, z, roll, pitch, yaw] => Some(pose_from_xyzrpy(*x, *y, *z, *roll, *pitch, *yaw)),
        _ => None,
    }
}
