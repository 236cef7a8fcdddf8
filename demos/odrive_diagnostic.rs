// ODrive diagnostic: reads bus voltage, encoder positions and error registers
//
// Sends only `r` queries while running; nothing moves. On exit the
// controller's drop hook writes a zero torque setpoint.
//
// Usage: cargo run --example odrive_diagnostic -- [port] [samples]

use spokebot_runtime::clock::{SystemClock, TickTimer};
use spokebot_runtime::config::ODRIVE_PORT;
use spokebot_runtime::motor::link::available_ports;
use spokebot_runtime::motor::{AXES, DeviceLink, MotorController};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SAMPLE_PERIOD: Duration = Duration::from_millis(200);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| ODRIVE_PORT.to_string());
    let samples: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 25,
    };

    println!("ODrive diagnostic (read-only)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let link = match DeviceLink::open(&port) {
        Ok(link) => {
            println!("  ✓ Serial port opened");
            link
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            match available_ports() {
                Ok(ports) if !ports.is_empty() => println!("  Ports found: {}", ports.join(", ")),
                Ok(_) => println!("  No serial ports found"),
                Err(e) => println!("  Could not list ports: {}", e),
            }
            return Err(e.into());
        }
    };
    let mut motors = MotorController::new(link, SystemClock::new());
    println!();

    println!("Step 2: Bus voltage");
    println!("  vbus = {:.2} V", motors.vbus_voltage());
    println!();

    println!("Step 3: Error registers");
    let errors = motors.read_errors();
    if errors.is_faulted() {
        println!("  ✗ {}", errors);
    } else {
        println!("  ✓ No errors latched");
    }
    println!();

    println!("Step 4: Sampling encoders ({} samples, turn the wheels by hand)", samples);
    let mut timer = TickTimer::new(SystemClock::new(), SAMPLE_PERIOD);
    for _ in 0..samples {
        timer.wait();
        let positions: Vec<String> = AXES
            .iter()
            .map(|&axis| format!("axis{} = {:>8.3}", axis, motors.get_position(axis)))
            .collect();
        println!("  {}", positions.join("   "));
    }

    let errors = motors.read_errors();
    if errors.is_faulted() {
        println!("  ✗ Errors after sampling: {}", errors);
    }
    println!();
    println!("Done.");
    Ok(())
}
