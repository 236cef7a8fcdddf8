// Inertial sensor calibration and the orientation filter seam

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::messages::{FusionInput, ImuSample, Orientation};

/// Per-sensor calibration applied to every raw sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InertialCalibration {
    /// Accelerometer zero-g offset (m/s^2)
    pub accel_zerog: [f32; 3],
    /// Gyroscope zero-rate offset (rad/s)
    pub gyro_zerorate: [f32; 3],
    /// Magnetometer hard-iron offset (uT)
    pub mag_hardiron: [f32; 3],
    /// Magnetometer soft-iron correction, row-major
    pub mag_softiron: [[f32; 3]; 3],
}

impl Default for InertialCalibration {
    fn default() -> Self {
        Self {
            accel_zerog: [0.0; 3],
            gyro_zerorate: [0.0; 3],
            mag_hardiron: [0.0; 3],
            mag_softiron: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

/// Errors loading a calibration file
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid calibration file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl InertialCalibration {
    /// Load a JSON calibration file; missing fields keep their identity values
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        let calibration = serde_json::from_str(&text)?;
        info!("Loaded IMU calibration from {}", path.display());
        Ok(calibration)
    }

    pub fn apply(&self, raw: &ImuSample) -> ImuSample {
        let mut out = *raw;
        for i in 0..3 {
            out.accel[i] = raw.accel[i] - self.accel_zerog[i];
            out.gyro[i] = raw.gyro[i] - self.gyro_zerorate[i];
        }

        let centered = [
            raw.mag[0] - self.mag_hardiron[0],
            raw.mag[1] - self.mag_hardiron[1],
            raw.mag[2] - self.mag_hardiron[2],
        ];
        for (i, row) in self.mag_softiron.iter().enumerate() {
            out.mag[i] = row[0] * centered[0] + row[1] * centered[1] + row[2] * centered[2];
        }
        out
    }
}

/// Black-box attitude estimator fed once per tick
pub trait OrientationFilter {
    /// Gyro in deg/s, acceleration and magnetic field in sensor units
    fn update(&mut self, input: FusionInput);

    fn roll_deg(&self) -> f32;

    fn yaw_deg(&self) -> f32;
}

/// Filter running outside this process
///
/// Inputs are queued for the runtime to forward; the orientation reported
/// is the latest one the external filter published.
#[derive(Debug, Default)]
pub struct ExternalFusion {
    latest: Orientation,
    pending: Option<FusionInput>,
}

impl ExternalFusion {
    /// Record an orientation published by the external filter
    pub fn ingest(&mut self, orientation: Orientation) {
        self.latest = orientation;
    }

    /// Input queued by the last `update`, if not yet forwarded
    pub fn take_pending(&mut self) -> Option<FusionInput> {
        self.pending.take()
    }
}

impl OrientationFilter for ExternalFusion {
    fn update(&mut self, input: FusionInput) {
        self.pending = Some(input);
    }

    fn roll_deg(&self) -> f32 {
        self.latest.roll_deg
    }

    fn yaw_deg(&self) -> f32 {
        self.latest.yaw_deg
    }
}
