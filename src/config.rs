// Rates, topics, device limits and the runtime configuration
use std::f32::consts::PI;
use std::path::PathBuf;
use std::time::Duration;

// Control loop / fusion filter update rate
pub const LOOP_HZ: u32 = 100;

// Zenoh topics
pub const TOPIC_CMD_TORSO: &str = "spokebot/cmd/torso"; // joint/torque commands
pub const TOPIC_CMD_ODRIVE: &str = "spokebot/cmd/odrive"; // operator buttons
pub const TOPIC_SENSORS: &str = "spokebot/state/sensors"; // state feedback
pub const TOPIC_ODRIVE_ERRORS: &str = "spokebot/state/odrive_errors"; // fault snapshots
pub const TOPIC_IMU_RAW: &str = "spokebot/imu/raw"; // raw inertial samples from the IMU bridge
pub const TOPIC_FUSION_IN: &str = "spokebot/imu/fusion_in"; // COM-corrected filter input
pub const TOPIC_ORIENTATION: &str = "spokebot/imu/orientation"; // filter output

// Motor controller serial link
pub const ODRIVE_PORT: &str = "/dev/ttyACM0";
pub const ODRIVE_BAUDRATE: u32 = 115_200;
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

// Axis limits written at startup
pub const MOTOR_VELOCITY_LIMIT: f32 = 50.0;
pub const MOTOR_CURRENT_LIMIT: f32 = 20.0; // amps
pub const TORQUE_CONSTANT: f32 = 8.23 / 150.0; // Nm/A

// Calibration waits
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MOTOR_CALIBRATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const ENCODER_OFFSET_TIMEOUT: Duration = Duration::from_secs(25);

// Settle delays
pub const OFFSET_SETTLE_DELAY: Duration = Duration::from_millis(250);
pub const CLEAR_ERRORS_SETTLE_DELAY: Duration = Duration::from_millis(250);
pub const REBOOT_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Torso angular rate (rad/s) at or above which the tip-over brake engages
pub const OVERSPEED_RATE: f32 = PI;

/// Spoke count of each wheel
pub const SPOKES_PER_WHEEL: f32 = 10.0;

/// Half the angle between two spokes; seeds the encoder history
pub const SPOKE_REST_ANGLE: f32 = 360.0 / SPOKES_PER_WHEEL / 2.0 * PI / 180.0;

/// Sensor-to-center-of-mass lever arm (m). Zero until measured.
pub const IMU_TO_COM: [f32; 3] = [0.0, 0.0, 0.0];

/// How the nominal tick drives the axes. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ControlMode {
    /// `effort[0]` mirrored to both axes as a torque setpoint
    #[default]
    Torque,
    /// `velocity[0..2]` scaled by the velocity limit
    Velocity,
}

/// Whether a motor controller is attached to the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    #[default]
    Connected,
    /// No device; writes are dropped and reads answer zero
    Offline,
}

/// Runtime configuration, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: String,
    pub baudrate: u32,
    pub loop_hz: u32,
    pub control_mode: ControlMode,
    pub device: DeviceMode,
    pub estop_gpio: Option<PathBuf>,
    pub imu_calibration: Option<PathBuf>,
    pub imu_to_com: [f32; 3],
}

impl RuntimeConfig {
    /// Length of one control tick
    pub fn tick_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.loop_hz.max(1)))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: ODRIVE_PORT.to_string(),
            baudrate: ODRIVE_BAUDRATE,
            loop_hz: LOOP_HZ,
            control_mode: ControlMode::default(),
            device: DeviceMode::default(),
            estop_gpio: None,
            imu_calibration: None,
            imu_to_com: IMU_TO_COM,
        }
    }
}
