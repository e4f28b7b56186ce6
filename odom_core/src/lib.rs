// odom_core/src/lib.rs

// Pure odometry tracking library: no I/O besides reading parameter files.
pub mod error;
pub mod estimation;
pub mod frames;
pub mod messages;
pub mod output;
pub mod params;
pub mod prelude;
pub mod tracking;
pub mod types;
