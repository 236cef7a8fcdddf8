// ODrive motor controller client
//
// Builds the controller's command vocabulary (parameter writes, motion
// setpoints, axis state requests, error polling) on top of the ASCII link.

use std::fmt::{self, Display};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::link::{DeviceLink, Result, Transport};
use crate::clock::{Clock, SystemClock};
use crate::config::{
    ControlMode, ENCODER_OFFSET_TIMEOUT, MOTOR_CALIBRATION_TIMEOUT, MOTOR_CURRENT_LIMIT,
    MOTOR_VELOCITY_LIMIT, STATE_POLL_INTERVAL, TORQUE_CONSTANT,
};
use crate::messages::ErrorReport;

/// Both axes, in wire order
pub const AXES: [u8; 2] = [0, 1];

/// Axis states understood by `requested_state` / `current_state`
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    Undefined = 0,
    Idle = 1,
    StartupSequence = 2,
    FullCalibrationSequence = 3,
    MotorCalibration = 4,
    EncoderIndexSearch = 6,
    EncoderOffsetCalibration = 7,
    ClosedLoopControl = 8,
}

/// Values of `controller.config.control_mode`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisControlMode {
    Voltage = 0,
    Torque = 1,
    Velocity = 2,
    Position = 3,
}

/// Error registers polled each tick, in the order they are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    Odrive,
    Motor0,
    Motor1,
    Axis0,
    Axis1,
    Encoder0,
    Encoder1,
    Controller0,
    Controller1,
}

impl ErrorDomain {
    pub const ALL: [ErrorDomain; 9] = [
        ErrorDomain::Odrive,
        ErrorDomain::Motor0,
        ErrorDomain::Motor1,
        ErrorDomain::Axis0,
        ErrorDomain::Axis1,
        ErrorDomain::Encoder0,
        ErrorDomain::Encoder1,
        ErrorDomain::Controller0,
        ErrorDomain::Controller1,
    ];

    /// Property path read for this register
    pub fn path(self) -> &'static str {
        match self {
            ErrorDomain::Odrive => "error",
            ErrorDomain::Motor0 => "axis0.motor.error",
            ErrorDomain::Motor1 => "axis1.motor.error",
            ErrorDomain::Axis0 => "axis0.error",
            ErrorDomain::Axis1 => "axis1.error",
            ErrorDomain::Encoder0 => "axis0.encoder.error",
            ErrorDomain::Encoder1 => "axis1.encoder.error",
            ErrorDomain::Controller0 => "axis0.controller.error",
            ErrorDomain::Controller1 => "axis1.controller.error",
        }
    }
}

/// Snapshot of all nine error registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisErrorSet(pub [i64; 9]);

impl AxisErrorSet {
    /// True iff any register is non-zero
    pub fn is_faulted(&self) -> bool {
        self.0.iter().any(|&e| e != 0)
    }

    pub fn get(&self, domain: ErrorDomain) -> i64 {
        self.0[domain as usize]
    }

    /// Non-zero registers with their domain
    pub fn active(&self) -> impl Iterator<Item = (ErrorDomain, i64)> + '_ {
        ErrorDomain::ALL
            .iter()
            .zip(self.0.iter())
            .filter(|(_, e)| **e != 0)
            .map(|(d, e)| (*d, *e))
    }
}

impl From<&AxisErrorSet> for ErrorReport {
    fn from(errors: &AxisErrorSet) -> Self {
        Self {
            data: errors.0.to_vec(),
        }
    }
}

impl Display for AxisErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (domain, code) in self.active() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{:?}=0x{:X}", domain, code)?;
            first = false;
        }
        if first {
            write!(f, "no errors")?;
        }
        Ok(())
    }
}

/// Result of an axis calibration sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    /// Closed-loop control was requested
    Completed,
    /// The given step never reported back idle; later steps were not issued
    Aborted { step: AxisState },
}

/// High-level client for the two-axis ODrive
pub struct MotorController<T: Transport = Box<dyn Transport>, C: Clock = SystemClock> {
    link: DeviceLink<T>,
    clock: C,
}

impl<T: Transport, C: Clock> MotorController<T, C> {
    pub fn new(link: DeviceLink<T>, clock: C) -> Self {
        Self { link, clock }
    }

    /// Send a read request and parse the float reply (0.0 if unreadable)
    fn query_float(&mut self, path: &str) -> f32 {
        if let Err(e) = self.link.send_command(&format!("r {}", path)) {
            warn!("Failed to request {}: {}", path, e);
            return 0.0;
        }
        self.link.read_float()
    }

    /// Send a read request and parse the integer reply (0 if unreadable)
    fn query_long(&mut self, path: &str) -> i64 {
        if let Err(e) = self.link.send_command(&format!("r {}", path)) {
            warn!("Failed to request {}: {}", path, e);
            return 0;
        }
        self.link.read_long()
    }

    /// Fire-and-forget write of `axis<N>.<path>`. The device never
    /// acknowledges, so a rejected write goes unnoticed.
    pub fn write_parameter(&mut self, axis: u8, path: &str, value: impl Display) -> Result<()> {
        self.link.send_command(&format!("w axis{}.{} {}", axis, path, value))
    }

    pub fn set_control_mode(&mut self, axis: u8, mode: AxisControlMode) -> Result<()> {
        self.write_parameter(axis, "controller.config.control_mode", mode as u8)
    }

    /// Velocity setpoint with zero torque feed-forward
    pub fn set_velocity(&mut self, axis: u8, velocity: f32) -> Result<()> {
        self.link.send_command(&format!("v {} {} 0", axis, velocity))
    }

    pub fn set_torque(&mut self, axis: u8, torque: f32) -> Result<()> {
        self.write_parameter(axis, "controller.input_torque", torque)
    }

    /// Raw encoder position estimate (rad)
    pub fn get_position(&mut self, axis: u8) -> f32 {
        self.query_float(&format!("axis{}.encoder.pos_estimate", axis))
    }

    pub fn vbus_voltage(&mut self) -> f32 {
        self.query_float("vbus_voltage")
    }

    /// Poll all nine error registers in reporting order
    pub fn read_errors(&mut self) -> AxisErrorSet {
        let mut errors = AxisErrorSet::default();
        for (slot, domain) in errors.0.iter_mut().zip(ErrorDomain::ALL) {
            *slot = self.query_long(domain.path());
        }
        errors
    }

    /// Request an axis state, optionally waiting for the axis to return to idle
    ///
    /// Returns false if `wait` elapsed before the axis reported idle.
    pub fn run_state(
        &mut self,
        axis: u8,
        state: AxisState,
        wait: Option<Duration>,
    ) -> Result<bool> {
        self.write_parameter(axis, "requested_state", state as i64)?;

        let Some(timeout) = wait else {
            return Ok(true);
        };

        let polls = (timeout.as_millis() / STATE_POLL_INTERVAL.as_millis()).max(1);
        let current_state = format!("axis{}.current_state", axis);
        for _ in 0..polls {
            self.clock.sleep(STATE_POLL_INTERVAL);
            if self.query_long(&current_state) == AxisState::Idle as i64 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Motor calibration -> encoder offset calibration -> closed-loop control
    ///
    /// Stops at the first step that does not complete. The axis is then left
    /// in whatever state the device reports; check `read_errors`.
    pub fn run_calibration(&mut self, axis: u8) -> Result<CalibrationOutcome> {
        let steps = [
            (AxisState::MotorCalibration, Some(MOTOR_CALIBRATION_TIMEOUT)),
            (AxisState::EncoderOffsetCalibration, Some(ENCODER_OFFSET_TIMEOUT)),
            (AxisState::ClosedLoopControl, None),
        ];

        for (step, wait) in steps {
            info!("Axis{}: requesting state {:?} ({})", axis, step, step as i64);
            if !self.run_state(axis, step, wait)? {
                warn!("Axis{}: {:?} did not complete, aborting calibration", axis, step);
                return Ok(CalibrationOutcome::Aborted { step });
            }
        }

        Ok(CalibrationOutcome::Completed)
    }

    /// Calibrate both axes in order, logging each outcome
    pub fn calibrate_all(&mut self) -> Result<()> {
        for axis in AXES {
            let outcome = self.run_calibration(axis)?;
            info!("Axis{}: calibration {:?}", axis, outcome);
        }
        Ok(())
    }

    /// Clear errors on the device
    pub fn clear_errors(&mut self) -> Result<()> {
        info!("Clearing ODrive errors");
        self.link.send_command("sc")
    }

    /// Reboot the device
    pub fn reboot(&mut self) -> Result<()> {
        info!("Rebooting ODrive");
        self.link.send_command("sr")
    }

    /// Startup limits for both axes
    pub fn configure_limits(&mut self) -> Result<()> {
        for axis in AXES {
            self.write_parameter(axis, "error", 0)?;
            self.write_parameter(axis, "controller.config.vel_limit", MOTOR_VELOCITY_LIMIT)?;
            self.write_parameter(axis, "motor.config.current_lim", MOTOR_CURRENT_LIMIT)?;
        }
        Ok(())
    }

    /// Put both axes in the controller mode the strategy drives
    pub fn apply_control_mode(&mut self, mode: ControlMode) -> Result<()> {
        for axis in AXES {
            match mode {
                ControlMode::Torque => {
                    self.set_control_mode(axis, AxisControlMode::Torque)?;
                    self.write_parameter(axis, "motor.config.torque_constant", TORQUE_CONSTANT)?;
                    self.write_parameter(axis, "controller.enable_torque_mode_vel_limit", 0)?;
                }
                ControlMode::Velocity => {
                    self.set_control_mode(axis, AxisControlMode::Velocity)?;
                }
            }
        }
        Ok(())
    }

    /// Zero torque on both axes
    pub fn zero_torque(&mut self) -> Result<()> {
        for axis in AXES {
            self.set_torque(axis, 0.0)?;
        }
        Ok(())
    }

    /// Velocity mode at zero speed on both axes
    pub fn brake(&mut self) -> Result<()> {
        debug!("Braking both axes");
        for axis in AXES {
            self.set_control_mode(axis, AxisControlMode::Velocity)?;
        }
        for axis in AXES {
            self.set_velocity(axis, 0.0)?;
        }
        Ok(())
    }

    /// Zero velocity on both axes
    pub fn stop(&mut self) -> Result<()> {
        for axis in AXES {
            self.set_velocity(axis, 0.0)?;
        }
        Ok(())
    }

    /// Block for `duration` on this controller's clock
    pub fn settle(&self, duration: Duration) {
        self.clock.sleep(duration);
    }
}

impl<T: Transport, C: Clock> Drop for MotorController<T, C> {
    fn drop(&mut self) {
        // Leave the wheels unpowered when the runtime goes away
        if let Err(e) = self.zero_torque() {
            warn!("Failed to zero torque on drop: {}", e);
        }
    }
}
