// Torso and spoke state estimation
//
// All estimator history (previous encoder positions, previous roll rate,
// startup offsets) lives in `StateEstimator`; nothing is shared.

use std::time::Duration;

use super::imu::{InertialCalibration, OrientationFilter};
use super::kinematics::com_acceleration;
use crate::config::SPOKE_REST_ANGLE;
use crate::messages::{FusionInput, ImuSample, SensorFeedback};

/// Torso attitude (rad) and roll rate (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorsoState {
    pub roll: f32,
    pub angular_rate: f32,
    pub yaw: f32,
}

/// Offset-corrected spoke positions (rad) and their rates (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpokeState {
    pub position0: f32,
    pub position1: f32,
    pub velocity0: f32,
    pub velocity1: f32,
}

/// Zero references captured once at startup
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationOffsets {
    pub enc0: f32,
    pub enc1: f32,
    pub yaw: f32,
}

impl SensorFeedback {
    pub fn from_states(torso: &TorsoState, spokes: &SpokeState) -> Self {
        Self {
            position: [torso.roll, spokes.position0, spokes.position1, torso.yaw],
            velocity: [torso.angular_rate, spokes.velocity0, spokes.velocity1],
        }
    }
}

pub struct StateEstimator<F: OrientationFilter> {
    filter: F,
    calibration: InertialCalibration,
    imu_to_com: [f32; 3],
    /// Tick period (s), never zero
    period: f32,
    offsets: CalibrationOffsets,
    prev_spoke: [f32; 2],
    prev_roll_rate: f32,
}

impl<F: OrientationFilter> StateEstimator<F> {
    pub fn new(
        filter: F,
        calibration: InertialCalibration,
        imu_to_com: [f32; 3],
        period: Duration,
    ) -> Self {
        assert!(!period.is_zero(), "tick period must be non-zero");
        Self {
            filter,
            calibration,
            imu_to_com,
            period: period.as_secs_f32(),
            offsets: CalibrationOffsets::default(),
            prev_spoke: [SPOKE_REST_ANGLE; 2],
            prev_roll_rate: 0.0,
        }
    }

    /// Fold in one pair of raw encoder positions
    ///
    /// Axis 0 is mounted mirrored, so its reading is negated.
    pub fn update_spokes(&mut self, raw: [f32; 2]) -> SpokeState {
        let position0 = -raw[0] - self.offsets.enc0;
        let position1 = raw[1] - self.offsets.enc1;

        let state = SpokeState {
            position0,
            position1,
            velocity0: (position0 - self.prev_spoke[0]) / self.period,
            velocity1: (position1 - self.prev_spoke[1]) / self.period,
        };

        self.prev_spoke = [position0, position1];
        state
    }

    /// Fold in one raw inertial sample and query the orientation filter
    pub fn update_torso(&mut self, raw: &ImuSample) -> TorsoState {
        let sample = self.calibration.apply(raw);

        let angular_rate = sample.gyro[0];
        let alpha_x = (angular_rate - self.prev_roll_rate) / self.period;
        let accel = com_acceleration(sample.accel, sample.gyro, alpha_x, self.imu_to_com);

        self.filter.update(FusionInput {
            gyro_dps: sample.gyro.map(f32::to_degrees),
            accel,
            mag: sample.mag,
        });

        self.prev_roll_rate = angular_rate;

        TorsoState {
            roll: self.filter.roll_deg().to_radians(),
            angular_rate,
            yaw: self.filter.yaw_deg().to_radians() - self.offsets.yaw,
        }
    }

    /// Make the given states the zero reference from now on
    ///
    /// The encoder history is shifted by the same amount so the next
    /// velocity is not a step from the old frame.
    pub fn capture_offsets(
        &mut self,
        spokes: &SpokeState,
        torso: &TorsoState,
    ) -> CalibrationOffsets {
        let offsets = CalibrationOffsets {
            enc0: self.offsets.enc0 + spokes.position0,
            enc1: self.offsets.enc1 + spokes.position1,
            yaw: self.offsets.yaw + torso.yaw,
        };
        self.prev_spoke[0] -= spokes.position0;
        self.prev_spoke[1] -= spokes.position1;
        self.offsets = offsets;
        offsets
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut F {
        &mut self.filter
    }
}
