// Message types exchanged over the pub/sub channel

use serde::{Deserialize, Serialize};

// Command from the policy/teleop -> runtime
// Only the fields the active control mode needs are read; both default to empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointCommand {
    #[serde(default)]
    pub velocity: Vec<f32>,
    #[serde(default)]
    pub effort: Vec<f32>,
}

/// Button vector from the operator pad
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorCommand {
    #[serde(default)]
    pub buttons: Vec<i32>,
}

/// Operator buttons the runtime reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    ClearErrors,
    Reboot,
}

impl OperatorCommand {
    pub const CLEAR_ERRORS_BUTTON: usize = 0;
    pub const REBOOT_BUTTON: usize = 3;

    fn pressed(&self, index: usize) -> bool {
        self.buttons.get(index) == Some(&1)
    }

    /// Clear-errors wins when both buttons are held
    pub fn action(&self) -> Option<OperatorAction> {
        if self.pressed(Self::CLEAR_ERRORS_BUTTON) {
            Some(OperatorAction::ClearErrors)
        } else if self.pressed(Self::REBOOT_BUTTON) {
            Some(OperatorAction::Reboot)
        } else {
            None
        }
    }
}

// Feedback from runtime -> policy
// position = [roll, encoder0, encoder1, yaw], velocity = [roll rate, encoder0 vel, encoder1 vel]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFeedback {
    pub position: [f32; 4],
    pub velocity: [f32; 3],
}

/// Fault snapshot published whenever any polled error register is non-zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub data: Vec<i64>,
}

/// One raw inertial sample from the IMU bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// m/s^2
    pub accel: [f32; 3],
    /// rad/s
    pub gyro: [f32; 3],
    /// uT
    pub mag: [f32; 3],
}

/// Input handed to the orientation filter each tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionInput {
    pub gyro_dps: [f32; 3],
    pub accel: [f32; 3],
    pub mag: [f32; 3],
}

/// Orientation estimate returned by the filter, in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll_deg: f32,
    pub yaw_deg: f32,
}
