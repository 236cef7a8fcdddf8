// Motor controller module for the spoke-wheel base
//
// Provides:
// - Line-oriented ASCII link to the ODrive over serial
// - High-level ODrive client (calibration, setpoints, error polling)

pub mod link;
mod odrive;

pub use link::{DeviceLink, LinkError, OfflinePort, Transport};
pub use odrive::{
    AXES, AxisControlMode, AxisErrorSet, AxisState, CalibrationOutcome, ErrorDomain,
    MotorController,
};
