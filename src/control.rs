// Balance controller: safety interlock and torque policy
//
// One `tick` per control period:
//   1. estimate torso and spoke state
//   2. poll the ODrive error registers
//   3. pick exactly one of: e-stop hold, overspeed brake, nominal command
//
// The e-stop is evaluated every tick from the line level, so while it is
// tripped every tick re-commands zero torque and telemetry keeps flowing.

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{
    CLEAR_ERRORS_SETTLE_DELAY, ControlMode, DeviceMode, MOTOR_VELOCITY_LIMIT, OVERSPEED_RATE,
    REBOOT_SETTLE_DELAY,
};
use crate::estimator::{
    CalibrationOffsets, OrientationFilter, SpokeState, StateEstimator, TorsoState,
};
use crate::messages::{ImuSample, JointCommand, OperatorAction, OperatorCommand, SensorFeedback};
use crate::motor::link::Result;
use crate::motor::{AXES, AxisControlMode, AxisErrorSet, MotorController, Transport};
use crate::safety::EstopState;

/// Torque setpoint per axis (Nm)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorqueCommand {
    pub torque0: f32,
    pub torque1: f32,
}

impl TorqueCommand {
    /// Same torque on both axes
    pub fn mirrored(torque: f32) -> Self {
        Self {
            torque0: torque,
            torque1: torque,
        }
    }
}

/// Per-tick inputs sampled outside the motor link
#[derive(Debug, Clone, Copy, Default)]
pub struct TickInputs {
    pub imu: ImuSample,
    /// E-stop line level; low means tripped
    pub estop_line_high: bool,
}

/// Which branch of the policy ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// E-stop tripped: zero torque on both axes
    EstopHold,
    /// E-stop just cleared: control mode restored, nothing commanded
    EstopReleased,
    /// Torso rate at or above the overspeed limit: braked
    OverspeedBrake,
    /// Setpoint from the command channel applied
    Nominal,
}

/// Everything one tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub torso: TorsoState,
    pub spokes: SpokeState,
    pub feedback: SensorFeedback,
    /// Set when any error register was non-zero
    pub faults: Option<AxisErrorSet>,
    /// None when the motor commands could not be written
    pub action: Option<ControlAction>,
}

/// Control loop context: owns the device, the estimator and all loop state
pub struct ControlLoop<
    F: OrientationFilter,
    T: Transport = Box<dyn Transport>,
    C: Clock = SystemClock,
> {
    motors: MotorController<T, C>,
    estimator: StateEstimator<F>,
    mode: ControlMode,
    device: DeviceMode,
    estop: EstopState,
    /// Control mode last written to both axes by this loop
    axis_mode: AxisControlMode,
    torque: TorqueCommand,
    /// Scaled velocity setpoints, before the axis 0 sign flip
    velocity: [f32; 2],
    last_errors: AxisErrorSet,
}

fn axis_mode_for(mode: ControlMode) -> AxisControlMode {
    match mode {
        ControlMode::Torque => AxisControlMode::Torque,
        ControlMode::Velocity => AxisControlMode::Velocity,
    }
}

impl<F: OrientationFilter, T: Transport, C: Clock> ControlLoop<F, T, C> {
    pub fn new(
        motors: MotorController<T, C>,
        estimator: StateEstimator<F>,
        mode: ControlMode,
        device: DeviceMode,
    ) -> Self {
        Self {
            motors,
            estimator,
            mode,
            device,
            estop: EstopState::Armed,
            axis_mode: axis_mode_for(mode),
            torque: TorqueCommand::default(),
            velocity: [0.0; 2],
            last_errors: AxisErrorSet::default(),
        }
    }

    /// Device bring-up: limits, then calibration of both axes
    pub fn prepare_device(&mut self) -> Result<()> {
        if self.device == DeviceMode::Connected {
            info!("Vbus voltage: {:.2} V", self.motors.vbus_voltage());

            info!("Setting parameters...");
            self.motors.configure_limits()?;
            self.motors.calibrate_all()?;
        } else {
            info!("Running offline, skipping ODrive setup");
        }
        Ok(())
    }

    /// Feed the orientation filter while the robot settles; nothing is commanded
    pub fn warm_up(&mut self, imu: &ImuSample) {
        self.estimator.update_torso(imu);
    }

    /// Take the current pose as the zero reference, then apply the control mode
    pub fn capture_offsets(&mut self, imu: &ImuSample) -> Result<CalibrationOffsets> {
        let (torso, spokes) = self.read_states(imu);
        let offsets = self.estimator.capture_offsets(&spokes, &torso);
        info!(
            "Captured offsets: enc0={:.4} enc1={:.4} yaw={:.4}",
            offsets.enc0, offsets.enc1, offsets.yaw
        );

        if self.device == DeviceMode::Connected {
            self.motors.apply_control_mode(self.mode)?;
        }
        self.axis_mode = axis_mode_for(self.mode);

        info!("Ready ({:?} control)", self.mode);
        Ok(offsets)
    }

    fn read_states(&mut self, imu: &ImuSample) -> (TorsoState, SpokeState) {
        let torso = self.estimator.update_torso(imu);
        let raw = [self.motors.get_position(0), self.motors.get_position(1)];
        let spokes = self.estimator.update_spokes(raw);
        (torso, spokes)
    }

    /// Poll the error registers, logging only when the snapshot changes
    fn poll_faults(&mut self) -> Option<AxisErrorSet> {
        if self.device == DeviceMode::Offline {
            return None;
        }

        let errors = self.motors.read_errors();
        if errors != self.last_errors {
            if errors.is_faulted() {
                warn!("ODrive fault: {}", errors);
            } else {
                info!("ODrive errors cleared");
            }
            self.last_errors = errors;
        }
        errors.is_faulted().then_some(errors)
    }

    /// Run one control tick
    pub fn tick(&mut self, inputs: &TickInputs) -> TickReport {
        let (torso, spokes) = self.read_states(&inputs.imu);
        let faults = self.poll_faults();
        let feedback = SensorFeedback::from_states(&torso, &spokes);

        let action = match self.apply_policy(&torso, inputs.estop_line_high) {
            Ok(action) => Some(action),
            Err(e) => {
                warn!("Failed to command motors: {}", e);
                None
            }
        };

        TickReport {
            torso,
            spokes,
            feedback,
            faults,
            action,
        }
    }

    fn set_axis_mode(&mut self, mode: AxisControlMode) -> Result<()> {
        self.axis_mode = mode;
        for axis in AXES {
            self.motors.set_control_mode(axis, mode)?;
        }
        Ok(())
    }

    fn apply_policy(&mut self, torso: &TorsoState, estop_line_high: bool) -> Result<ControlAction> {
        match (self.estop, EstopState::from_line(estop_line_high)) {
            (previous, EstopState::Tripped) => {
                self.estop = EstopState::Tripped;
                if !previous.is_tripped() {
                    warn!("E-stop tripped, holding zero torque");
                    self.motors.brake()?;
                }
                self.set_axis_mode(AxisControlMode::Torque)?;
                self.motors.zero_torque()?;
                return Ok(ControlAction::EstopHold);
            }
            (EstopState::Tripped, EstopState::Armed) => {
                info!("E-stop released");
                self.estop = EstopState::Armed;
                self.set_axis_mode(axis_mode_for(self.mode))?;
                return Ok(ControlAction::EstopReleased);
            }
            (EstopState::Armed, EstopState::Armed) => {}
        }

        if torso.angular_rate >= OVERSPEED_RATE {
            warn!(
                "Torso rate {:.2} rad/s over limit, braking",
                torso.angular_rate
            );
            self.motors.brake()?;
            self.set_axis_mode(AxisControlMode::Torque)?;
            return Ok(ControlAction::OverspeedBrake);
        }

        let wanted = axis_mode_for(self.mode);
        if self.axis_mode != wanted {
            self.set_axis_mode(wanted)?;
        }

        match self.mode {
            ControlMode::Torque => {
                self.motors.set_torque(0, -self.torque.torque0)?;
                self.motors.set_torque(1, self.torque.torque1)?;
            }
            ControlMode::Velocity => {
                self.motors.set_velocity(0, -self.velocity[0])?;
                self.motors.set_velocity(1, self.velocity[1])?;
            }
        }
        Ok(ControlAction::Nominal)
    }

    /// Take a new setpoint from the command channel
    pub fn on_joint_command(&mut self, cmd: &JointCommand) {
        match self.mode {
            ControlMode::Torque => match cmd.effort.first() {
                // One command drives both axes
                Some(&effort) => {
                    debug!("Received torque command: {}", effort);
                    self.torque = TorqueCommand::mirrored(effort);
                }
                None => warn!("Joint command without effort ignored"),
            },
            ControlMode::Velocity => match cmd.velocity.as_slice() {
                [v0, v1, ..] => {
                    debug!("Received velocity command: {}, {}", v0, v1);
                    self.velocity = [v0 * MOTOR_VELOCITY_LIMIT, v1 * MOTOR_VELOCITY_LIMIT];
                }
                _ => warn!("Joint command needs two velocities, ignored"),
            },
        }
    }

    /// Handle an operator button press. Blocks through the settle delay and
    /// recalibration of both axes.
    pub fn on_operator_command(&mut self, cmd: &OperatorCommand) -> Result<()> {
        let Some(action) = cmd.action() else {
            return Ok(());
        };
        if self.estop.is_tripped() {
            warn!("Ignoring {:?} while e-stop is tripped", action);
            return Ok(());
        }
        if self.device == DeviceMode::Offline {
            info!("Ignoring {:?} while offline", action);
            return Ok(());
        }

        self.motors.stop()?;
        match action {
            OperatorAction::ClearErrors => {
                self.motors.clear_errors()?;
                self.motors.settle(CLEAR_ERRORS_SETTLE_DELAY);
                self.motors.calibrate_all()?;
            }
            OperatorAction::Reboot => {
                self.motors.reboot()?;
                self.motors.settle(REBOOT_SETTLE_DELAY);
                // A reboot drops everything written at startup
                self.motors.configure_limits()?;
                self.motors.calibrate_all()?;
                self.motors.apply_control_mode(self.mode)?;
                self.axis_mode = axis_mode_for(self.mode);
            }
        }
        Ok(())
    }

    pub fn estop_state(&self) -> EstopState {
        self.estop
    }

    pub fn torque_command(&self) -> TorqueCommand {
        self.torque
    }

    pub fn estimator_mut(&mut self) -> &mut StateEstimator<F> {
        &mut self.estimator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{ExternalFusion, InertialCalibration};
    use crate::messages::Orientation;
    use crate::motor::DeviceLink;
    use crate::testing::{ManualClock, MockPort, StubFilter};
    use std::f32::consts::{FRAC_PI_2, PI};
    use std::time::Duration;

    type TestLoop = ControlLoop<StubFilter, MockPort, ManualClock>;

    fn control_loop(mode: ControlMode, device: DeviceMode) -> (TestLoop, MockPort, ManualClock) {
        let port = MockPort::new();
        let clock = ManualClock::new();
        let motors = MotorController::new(DeviceLink::new(port.clone()), clock.clone());
        let estimator = StateEstimator::new(
            StubFilter::default(),
            InertialCalibration::default(),
            [0.0; 3],
            Duration::from_millis(10),
        );
        (ControlLoop::new(motors, estimator, mode, device), port, clock)
    }

    fn armed() -> TickInputs {
        TickInputs {
            imu: ImuSample::default(),
            estop_line_high: true,
        }
    }

    fn tripped() -> TickInputs {
        TickInputs {
            imu: ImuSample::default(),
            estop_line_high: false,
        }
    }

    /// Torque values written to `input_torque`, as (axis line, value)
    fn torque_writes(sent: &[String]) -> Vec<(String, f32)> {
        sent.iter()
            .filter(|c| c.contains(".controller.input_torque "))
            .map(|c| {
                let (path, value) = c.rsplit_once(' ').unwrap();
                (path.to_string(), value.parse::<f32>().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_nominal_torque_is_mirrored_with_axis0_negated() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        control.on_joint_command(&JointCommand {
            velocity: vec![],
            effort: vec![0.5, 9.0],
        });
        assert_eq!(control.torque_command(), TorqueCommand::mirrored(0.5));

        let report = control.tick(&armed());
        assert_eq!(report.action, Some(ControlAction::Nominal));
        assert_eq!(
            torque_writes(&port.sent()),
            vec![
                ("w axis0.controller.input_torque".to_string(), -0.5),
                ("w axis1.controller.input_torque".to_string(), 0.5),
            ]
        );
    }

    #[test]
    fn test_estop_holds_zero_torque_until_released() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        control.on_joint_command(&JointCommand {
            velocity: vec![],
            effort: vec![1.5],
        });
        control.tick(&armed());
        port.clear_sent();

        for _ in 0..5 {
            let report = control.tick(&tripped());
            assert_eq!(report.action, Some(ControlAction::EstopHold));
            assert!(control.estop_state().is_tripped());
        }
        // A new command arriving mid-trip must not leak through
        control.on_joint_command(&JointCommand {
            velocity: vec![],
            effort: vec![2.0],
        });
        control.tick(&tripped());

        let during_trip = port.sent();
        let torques = torque_writes(&during_trip);
        assert_eq!(torques.len(), 12);
        assert!(torques.iter().all(|(_, t)| *t == 0.0));
        // Braked once on entry
        assert_eq!(during_trip.iter().filter(|c| *c == "v 0 0 0").count(), 1);

        port.clear_sent();
        let report = control.tick(&armed());
        assert_eq!(report.action, Some(ControlAction::EstopReleased));
        assert!(torque_writes(&port.sent()).is_empty());
        assert!(
            port.sent()
                .contains(&"w axis0.controller.config.control_mode 1".to_string())
        );

        port.clear_sent();
        let report = control.tick(&armed());
        assert_eq!(report.action, Some(ControlAction::Nominal));
        assert_eq!(torque_writes(&port.sent())[1].1, 2.0);
    }

    #[test]
    fn test_overspeed_brakes_instead_of_commanding() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        control.on_joint_command(&JointCommand {
            velocity: vec![],
            effort: vec![0.8],
        });

        let inputs = TickInputs {
            imu: ImuSample {
                gyro: [PI, 0.0, 0.0],
                ..ImuSample::default()
            },
            estop_line_high: true,
        };
        let report = control.tick(&inputs);

        assert_eq!(report.action, Some(ControlAction::OverspeedBrake));
        let sent = port.sent();
        assert!(sent.contains(&"v 0 0 0".to_string()));
        assert!(sent.contains(&"v 1 0 0".to_string()));
        assert!(torque_writes(&sent).is_empty());
        assert_eq!(
            sent.last().map(String::as_str),
            Some("w axis1.controller.config.control_mode 1")
        );
    }

    #[test]
    fn test_estop_takes_priority_over_overspeed() {
        let (mut control, _, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        let inputs = TickInputs {
            imu: ImuSample {
                gyro: [2.0 * PI, 0.0, 0.0],
                ..ImuSample::default()
            },
            estop_line_high: false,
        };
        assert_eq!(control.tick(&inputs).action, Some(ControlAction::EstopHold));
    }

    #[test]
    fn test_faults_reported_and_telemetry_kept() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        port.set_default("axis1.encoder.pos_estimate", "0.25");

        let report = control.tick(&armed());
        assert!(report.faults.is_none());

        port.set_default("axis0.error", "4");
        let report = control.tick(&armed());
        let faults = report.faults.expect("fault snapshot");
        assert_eq!(faults.0[3], 4);
        assert_eq!(report.feedback.position[2], 0.25);
        assert_eq!(report.action, Some(ControlAction::Nominal));

        // Persistent faults are reported every tick
        assert!(control.tick(&armed()).faults.is_some());
    }

    #[test]
    fn test_offline_skips_error_polling() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Offline);
        let report = control.tick(&armed());
        assert!(report.faults.is_none());
        assert!(!port.sent().iter().any(|c| c.ends_with(".error")));
    }

    #[test]
    fn test_velocity_mode_scales_and_restores_mode_after_brake() {
        let (mut control, port, _) = control_loop(ControlMode::Velocity, DeviceMode::Connected);
        control.on_joint_command(&JointCommand {
            velocity: vec![0.5, 0.25],
            effort: vec![],
        });

        control.tick(&armed());
        let sent = port.sent();
        assert!(sent.contains(&"v 0 -25 0".to_string()));
        assert!(sent.contains(&"v 1 12.5 0".to_string()));

        let spin = TickInputs {
            imu: ImuSample {
                gyro: [4.0, 0.0, 0.0],
                ..ImuSample::default()
            },
            estop_line_high: true,
        };
        control.tick(&spin);
        port.clear_sent();

        control.tick(&armed());
        let sent = port.sent();
        assert!(sent.contains(&"w axis0.controller.config.control_mode 2".to_string()));
        assert!(sent.contains(&"v 0 -25 0".to_string()));
    }

    #[test]
    fn test_clear_errors_button_recalibrates() {
        let (mut control, port, clock) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        port.set_default("axis0.current_state", "1");
        port.set_default("axis1.current_state", "1");

        control
            .on_operator_command(&OperatorCommand {
                buttons: vec![1, 0, 0, 0],
            })
            .unwrap();

        let sent = port.sent();
        assert_eq!(&sent[..3], ["v 0 0 0", "v 1 0 0", "sc"]);
        assert!(sent.contains(&"w axis0.requested_state 8".to_string()));
        assert!(sent.contains(&"w axis1.requested_state 8".to_string()));
        assert!(!sent.contains(&"sr".to_string()));
        assert!(clock.now() >= CLEAR_ERRORS_SETTLE_DELAY);
    }

    #[test]
    fn test_reboot_button_waits_longer() {
        let (mut control, port, clock) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        port.set_default("axis0.current_state", "1");
        port.set_default("axis1.current_state", "1");

        control
            .on_operator_command(&OperatorCommand {
                buttons: vec![0, 0, 0, 1],
            })
            .unwrap();

        let sent = port.sent();
        assert_eq!(sent[2], "sr");
        assert!(sent.contains(&"w axis1.requested_state 8".to_string()));
        assert!(clock.now() >= REBOOT_SETTLE_DELAY);
    }

    #[test]
    fn test_operator_ignored_while_tripped() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        control.tick(&tripped());
        port.clear_sent();

        control
            .on_operator_command(&OperatorCommand {
                buttons: vec![1, 0, 0, 1],
            })
            .unwrap();
        assert!(port.sent().is_empty());
    }

    #[test]
    fn test_startup_sequence() {
        let (mut control, port, clock) = control_loop(ControlMode::Torque, DeviceMode::Connected);
        port.set_default("vbus_voltage", "24.0");
        port.set_default("axis0.current_state", "1");
        port.set_default("axis1.current_state", "1");
        port.set_default("axis0.encoder.pos_estimate", "-0.5");
        port.set_default("axis1.encoder.pos_estimate", "1.25");

        control.prepare_device().unwrap();
        let offsets = control.capture_offsets(&ImuSample::default()).unwrap();
        assert!((offsets.enc0 - 0.5).abs() < 1e-6);
        assert!((offsets.enc1 - 1.25).abs() < 1e-6);
        // Calibration polled the axes on the controller's clock
        assert!(clock.now() > Duration::ZERO);

        let sent = port.sent();
        let position = |line: &str| sent.iter().position(|c| c == line).unwrap();
        assert!(
            position("w axis0.controller.config.vel_limit 50")
                < position("w axis0.requested_state 4")
        );
        assert!(
            position("w axis1.requested_state 8")
                < position("w axis0.controller.config.control_mode 1")
        );
        assert!(sent.contains(&"w axis1.motor.config.current_lim 20".to_string()));

        // Positions read back as zero once the offsets are in place
        port.clear_sent();
        let report = control.tick(&armed());
        assert!(report.spokes.position0.abs() < 1e-6);
        assert!(report.spokes.position1.abs() < 1e-6);
        assert!(report.spokes.velocity1.abs() < 1e-3);
    }

    #[test]
    fn test_offline_startup_touches_only_encoders() {
        let (mut control, port, _) = control_loop(ControlMode::Torque, DeviceMode::Offline);
        control.prepare_device().unwrap();
        control.warm_up(&ImuSample::default());
        control.capture_offsets(&ImuSample::default()).unwrap();
        assert_eq!(
            port.sent(),
            vec!["r axis0.encoder.pos_estimate", "r axis1.encoder.pos_estimate"]
        );
    }

    #[test]
    fn test_yaw_reference_taken_from_fused_orientation() {
        let port = MockPort::new();
        let motors = MotorController::new(DeviceLink::new(port.clone()), ManualClock::new());
        let estimator = StateEstimator::new(
            ExternalFusion::default(),
            InertialCalibration::default(),
            [0.0; 3],
            Duration::from_millis(10),
        );
        let mut control =
            ControlLoop::new(motors, estimator, ControlMode::Torque, DeviceMode::Offline);

        control.prepare_device().unwrap();
        control.warm_up(&ImuSample::default());
        // The settle phase forwards filter input and takes the filter's answer
        assert!(control.estimator_mut().filter_mut().take_pending().is_some());
        control.estimator_mut().filter_mut().ingest(Orientation {
            roll_deg: 0.0,
            yaw_deg: 90.0,
        });

        let offsets = control.capture_offsets(&ImuSample::default()).unwrap();
        assert!((offsets.yaw - FRAC_PI_2).abs() < 1e-6);

        let report = control.tick(&armed());
        assert!(report.torso.yaw.abs() < 1e-6);
        assert!(report.feedback.position[3].abs() < 1e-6);
    }
}
