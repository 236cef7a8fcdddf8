// Balance control runtime for a two-wheel spoke robot
//
// Fuses IMU and encoder readings into torso/spoke state, enforces the e-stop
// interlock and drives an ODrive over its ASCII serial protocol.

pub mod clock;
pub mod config;
pub mod control;
pub mod estimator;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod safety;

#[cfg(test)]
mod testing;
