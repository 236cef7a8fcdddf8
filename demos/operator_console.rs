// Keyboard console: W/S lean torque, C clear errors, B reboot, R/F gain, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use spokebot_runtime::config::{TOPIC_CMD_ODRIVE, TOPIC_CMD_TORSO};
use spokebot_runtime::messages::{JointCommand, OperatorCommand};
use std::time::{Duration, Instant};
use tracing::info;

const EFFORTS: [f32; 3] = [0.1, 0.3, 0.6]; // Nm
const INPUT_TIMEOUT_MS: u64 = 100; // Drop back to zero effort after this much time with no input

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let torso = session.declare_publisher(TOPIC_CMD_TORSO).await?;
    let odrive = session.declare_publisher(TOPIC_CMD_ODRIVE).await?;

    info!("Controls: W/S=effort, C=clear errors, B=reboot, R/F=gain, Q=quit");
    info!("Gain: LOW");

    enable_raw_mode()?;
    let result = run_console(&torso, &odrive).await;
    disable_raw_mode()?;

    result
}

fn button_press(index: usize) -> OperatorCommand {
    let mut buttons = vec![0; 4];
    buttons[index] = 1;
    OperatorCommand { buttons }
}

async fn run_console(
    torso: &zenoh::pubsub::Publisher<'_>,
    odrive: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), BoxError> {
    let mut gain_idx: usize = 0;
    let mut effort = 0.0;
    let mut last_input = Instant::now();

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        effort = EFFORTS[gain_idx];
                        last_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        effort = -EFFORTS[gain_idx];
                        last_input = Instant::now();
                    }

                    // Operator buttons go out once per key press
                    KeyCode::Char('c') if kind == KeyEventKind::Press => {
                        info!("Requesting error clear");
                        let cmd = button_press(OperatorCommand::CLEAR_ERRORS_BUTTON);
                        odrive.put(serde_json::to_string(&cmd)?).await?;
                    }
                    KeyCode::Char('b') if kind == KeyEventKind::Press => {
                        info!("Requesting reboot");
                        let cmd = button_press(OperatorCommand::REBOOT_BUTTON);
                        odrive.put(serde_json::to_string(&cmd)?).await?;
                    }

                    KeyCode::Char('r') if pressed => {
                        gain_idx = (gain_idx + 1).min(2);
                        print_gain(gain_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        gain_idx = gain_idx.saturating_sub(1);
                        print_gain(gain_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            effort = 0.0;
        }

        // ~50Hz; the runtime mirrors effort onto both wheels
        let cmd = JointCommand {
            velocity: Vec::new(),
            effort: vec![effort],
        };
        torso.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_gain(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Gain: {}", label);
}
