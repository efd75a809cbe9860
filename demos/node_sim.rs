//! Run the full node loop on a simulated sensor, sending real UDP telemetry.
//!
//! Usage: cargo run --example node_sim [seconds]
//!
//! Configuration comes from `FDW_*` environment variables, e.g.
//!   FDW_SERVER=127.0.0.1:9999 FDW_SENSOR=icm20948 FDW_BUTTON=1 RUST_LOG=info
//! With a button enabled, the simulated wearer taps it two seconds in.

use fdw_node::gpio::{LogOutput, ScriptedButton};
use fdw_node::{ControlLoop, NodeConfig, Pins, SimulatedImu, SystemClock, UdpTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    env_logger::init();

    let seconds: Option<u64> = std::env::args().nth(1).and_then(|s| s.parse().ok());

    let config = NodeConfig::from_env();
    println!("Player:   {}", config.player_id);
    println!("Server:   {}", config.server);
    println!("Sensor:   {}", config.sensor.label());
    println!("Recenter: {}", config.recenter.label());
    println!("Rate:     {} Hz", config.telemetry_rate_hz);
    println!();

    let transport = match UdpTransport::open(&config.udp()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to open transport: {}", e);
            std::process::exit(1);
        }
    };
    if let Ok(local) = transport.local_addr() {
        println!("UDP:      {} -> {}", local, transport.server_addr());
    }

    let imu = SimulatedImu::new(config.sensor, config.nominal_dt_s());
    let mut pins = Pins::new(LogOutput::new());
    if config.button_enabled {
        let idle_ticks = 2 * config.telemetry_rate_hz as usize;
        pins = pins.with_button(ScriptedButton::press(idle_ticks, 3));
    }

    let mut node = match ControlLoop::start(config, imu, transport, SystemClock::new(), pins) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Bring-up failed: {}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    if let Some(secs) = seconds {
        let stop = running.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            stop.store(false, Ordering::Relaxed);
        });
        println!("Running for {}s...", secs);
    } else {
        println!("Running (Ctrl+C to stop)...");
    }

    node.run(&running);

    let stats = node.stats();
    println!(
        "--- {} ticks, {} skipped, {} send failures, {} alerts ---",
        stats.ticks, stats.skipped, stats.send_failures, stats.alerts_received
    );
}
