use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use spokebot_runtime::config::{
    ControlMode, DeviceMode, IMU_TO_COM, LOOP_HZ, ODRIVE_BAUDRATE, ODRIVE_PORT, RuntimeConfig,
};

/// Balance control runtime for the spoke-wheel robot
#[derive(Debug, Parser)]
#[command(name = "spokebot-runtime", version)]
struct Args {
    /// Serial port of the ODrive
    #[arg(long, default_value = ODRIVE_PORT)]
    port: String,

    #[arg(long, default_value_t = ODRIVE_BAUDRATE)]
    baudrate: u32,

    /// Control loop rate in Hz
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u32).range(1..=1000))]
    loop_hz: u32,

    #[arg(long, value_enum, default_value_t = ControlMode::Torque)]
    control_mode: ControlMode,

    /// Run without an ODrive attached
    #[arg(long)]
    offline: bool,

    /// sysfs value file of the e-stop GPIO (e.g. /sys/class/gpio/gpio3/value)
    #[arg(long)]
    estop_gpio: Option<PathBuf>,

    /// JSON file with IMU calibration
    #[arg(long)]
    imu_calibration: Option<PathBuf>,

    /// IMU to center-of-mass offset in meters, as x,y,z
    #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = IMU_TO_COM)]
    lever_arm: Vec<f32>,
}

impl Args {
    fn into_config(self) -> Result<RuntimeConfig, String> {
        let imu_to_com = <[f32; 3]>::try_from(self.lever_arm.as_slice())
            .map_err(|_| "--lever-arm takes exactly three values".to_string())?;

        Ok(RuntimeConfig {
            port: self.port,
            baudrate: self.baudrate,
            loop_hz: self.loop_hz,
            control_mode: self.control_mode,
            device: if self.offline {
                DeviceMode::Offline
            } else {
                DeviceMode::Connected
            },
            estop_gpio: self.estop_gpio,
            imu_calibration: self.imu_calibration,
            imu_to_com,
        })
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug to see wire traffic)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid arguments: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = spokebot_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
