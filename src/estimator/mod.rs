// Torso/spoke state estimation
//
// Provides:
// - Center-of-mass acceleration correction (rigid-body kinematics)
// - IMU calibration and the orientation filter interface
// - Per-tick torso and spoke state estimator

pub mod imu;
pub mod kinematics;
mod state;

pub use imu::{ExternalFusion, InertialCalibration, OrientationFilter};
pub use kinematics::{com_acceleration, cross};
pub use state::{CalibrationOffsets, SpokeState, StateEstimator, TorsoState};
