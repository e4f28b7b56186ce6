// odom_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::estimation::{OdometryEngine, OdometryInfo};
pub use crate::frames::{TransformError, TransformOracle, WaitPolicy};

// --- Core Data Structures ---
pub use crate::messages::{
    LaserScan, OdomInfoMsg, OdometryMsg, Point, PointCloudMsg, SensorData, TransformStamped,
    BAD_COVARIANCE,
};
pub use crate::params::{OdometryModality, ParamValue, ParametersMap};
pub use crate::types::{Pose, Stamp};

// --- Tracking ---
pub use crate::tracking::{
    CycleOutcome, CycleReport, GuessSource, SupervisorConfig, TrackingFrames, TrackingState,
    TrackingSupervisor,
};

// --- Concrete Implementations ---
pub use crate::estimation::{create_engine, MotionModelOdometry};
pub use crate::frames::TfBuffer;
