// Fixed-rate balance loop wired to Zenoh
//
// Each tick: pull the freshest IMU sample and orientation, read the e-stop
// line, run the controller, publish feedback (and faults), then take any
// commands that arrived. Device I/O blocks, so it runs under block_in_place.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::block_in_place;
use tokio::time::Instant;
use tracing::{info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

// local imports
use crate::clock::{SystemClock, TickTimer};
use crate::config::{
    DeviceMode, OFFSET_SETTLE_DELAY, RuntimeConfig, TOPIC_CMD_ODRIVE, TOPIC_CMD_TORSO,
    TOPIC_FUSION_IN, TOPIC_IMU_RAW, TOPIC_ODRIVE_ERRORS, TOPIC_ORIENTATION, TOPIC_SENSORS,
};
use crate::control::{ControlLoop, TickInputs};
use crate::estimator::{ExternalFusion, InertialCalibration, StateEstimator};
use crate::messages::{ErrorReport, ImuSample, JointCommand, OperatorCommand, Orientation};
use crate::motor::{DeviceLink, MotorController};
use crate::safety::{EstopInput, GpioEstop, NoEstop};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Drain all pending messages (non-blocking), skipping ones that fail to parse
fn drain<T: DeserializeOwned>(
    subscriber: &Subscriber<FifoChannelHandler<Sample>>,
    topic: &str,
) -> Vec<T> {
    let mut messages = Vec::new();
    while let Ok(Some(sample)) = subscriber.try_recv() {
        let payload = sample.payload().to_bytes();
        match serde_json::from_slice::<T>(&payload) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!("Failed to parse message on {}: {}", topic, e),
        }
    }
    messages
}

/// Take the freshest IMU sample and orientation. True if an orientation arrived.
fn refresh_sensors(
    sub_imu: &Subscriber<FifoChannelHandler<Sample>>,
    sub_orientation: &Subscriber<FifoChannelHandler<Sample>>,
    imu: &mut ImuSample,
    fusion: &mut ExternalFusion,
) -> bool {
    if let Some(sample) = drain::<ImuSample>(sub_imu, TOPIC_IMU_RAW).pop() {
        *imu = sample;
    }
    match drain::<Orientation>(sub_orientation, TOPIC_ORIENTATION).pop() {
        Some(orientation) => {
            fusion.ingest(orientation);
            true
        }
        None => false,
    }
}

/// Publish as JSON; failures are logged and the loop carries on
async fn publish<T: Serialize>(publisher: &Publisher<'_>, topic: &str, msg: &T) {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode message for {}: {}", topic, e);
            return;
        }
    };
    if let Err(e) = publisher.put(json).await {
        warn!("Failed to publish on {}: {}", topic, e);
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_torso = session.declare_subscriber(TOPIC_CMD_TORSO).await?;
    let sub_odrive = session.declare_subscriber(TOPIC_CMD_ODRIVE).await?;
    let sub_imu = session.declare_subscriber(TOPIC_IMU_RAW).await?;
    let sub_orientation = session.declare_subscriber(TOPIC_ORIENTATION).await?;
    let pub_sensors = session.declare_publisher(TOPIC_SENSORS).await?;
    let pub_errors = session.declare_publisher(TOPIC_ODRIVE_ERRORS).await?;
    let pub_fusion = session.declare_publisher(TOPIC_FUSION_IN).await?;

    let link = match config.device {
        DeviceMode::Connected => {
            info!("Opening ODrive on {} at {} baud", config.port, config.baudrate);
            DeviceLink::open_with_baudrate(&config.port, config.baudrate)?
        }
        DeviceMode::Offline => {
            warn!("No ODrive attached, running offline");
            DeviceLink::offline()
        }
    };

    let calibration = match &config.imu_calibration {
        Some(path) => InertialCalibration::load(path)?,
        None => InertialCalibration::default(),
    };

    let mut estop: Box<dyn EstopInput> = match &config.estop_gpio {
        Some(path) => Box::new(GpioEstop::new(path)),
        None => {
            warn!("No e-stop line configured");
            Box::new(NoEstop)
        }
    };

    let period = config.tick_period();
    let estimator = StateEstimator::new(
        ExternalFusion::default(),
        calibration,
        config.imu_to_com,
        period,
    );
    let motors = MotorController::new(link, SystemClock::new());
    let mut control = ControlLoop::new(motors, estimator, config.control_mode, config.device);

    block_in_place(|| control.prepare_device())?;

    // Settle at the loop rate with the fusion filter fed, so the yaw
    // reference comes from a real orientation
    let mut imu = ImuSample::default();
    let mut has_orientation = false;
    let mut timer = TickTimer::new(SystemClock::new(), period);
    let settle_until = Instant::now() + OFFSET_SETTLE_DELAY;
    while Instant::now() < settle_until {
        tokio::time::sleep(timer.time_until_next()).await;
        if !timer.try_begin() {
            continue;
        }
        let fusion = control.estimator_mut().filter_mut();
        has_orientation |= refresh_sensors(&sub_imu, &sub_orientation, &mut imu, fusion);
        control.warm_up(&imu);
        if let Some(input) = control.estimator_mut().filter_mut().take_pending() {
            publish(&pub_fusion, TOPIC_FUSION_IN, &input).await;
        }
    }
    let fusion = control.estimator_mut().filter_mut();
    has_orientation |= refresh_sensors(&sub_imu, &sub_orientation, &mut imu, fusion);
    if !has_orientation {
        warn!(
            "No orientation on {} while settling, yaw reference is 0",
            TOPIC_ORIENTATION
        );
    }
    block_in_place(|| control.capture_offsets(&imu))?;

    info!(
        "Runtime started: {}Hz loop, {:?} control",
        config.loop_hz, config.control_mode
    );
    info!(
        "Subscribed to: {}, {}, {}, {}",
        TOPIC_CMD_TORSO, TOPIC_CMD_ODRIVE, TOPIC_IMU_RAW, TOPIC_ORIENTATION
    );
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_SENSORS, TOPIC_ODRIVE_ERRORS, TOPIC_FUSION_IN
    );

    loop {
        tokio::time::sleep(timer.time_until_next()).await;
        if !timer.try_begin() {
            continue;
        }

        // 1. Freshest sensor inputs
        let fusion = control.estimator_mut().filter_mut();
        refresh_sensors(&sub_imu, &sub_orientation, &mut imu, fusion);
        let inputs = TickInputs {
            imu,
            estop_line_high: estop.line_high(),
        };

        // 2. Estimate, poll faults, apply the safety/torque policy
        let report = block_in_place(|| control.tick(&inputs));

        // 3. Telemetry
        if let Some(faults) = &report.faults {
            publish(&pub_errors, TOPIC_ODRIVE_ERRORS, &ErrorReport::from(faults)).await;
        }
        publish(&pub_sensors, TOPIC_SENSORS, &report.feedback).await;
        if let Some(input) = control.estimator_mut().filter_mut().take_pending() {
            publish(&pub_fusion, TOPIC_FUSION_IN, &input).await;
        }

        // 4. Commands that arrived since the last tick
        for cmd in drain::<JointCommand>(&sub_torso, TOPIC_CMD_TORSO) {
            control.on_joint_command(&cmd);
        }
        for cmd in drain::<OperatorCommand>(&sub_odrive, TOPIC_CMD_ODRIVE) {
            if let Err(e) = block_in_place(|| control.on_operator_command(&cmd)) {
                warn!("Operator command failed: {}", e);
            }
        }
    }
}
