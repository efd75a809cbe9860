//! Send one alert command to a node.
//!
//! Usage: cargo run --example alert_sender <node_addr> <player_id> <on|off> [intensity] [hold_ms]
//! Example: cargo run --example alert_sender 192.168.1.50:12001 1 on 255 800

use fdw_node::protocol::{self, AlertFrame, ALERT_FRAME_SIZE};
use std::net::UdpSocket;

fn usage() -> ! {
    eprintln!("Usage: alert_sender <node_addr> <player_id> <on|off> [intensity] [hold_ms]");
    std::process::exit(2);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        usage();
    }
    let addr = &args[0];
    let player_id: u8 = args[1].parse().unwrap_or_else(|_| usage());
    let alert_on = match args[2].to_ascii_lowercase().as_str() {
        "on" | "1" => true,
        "off" | "0" => false,
        _ => usage(),
    };
    let intensity: u8 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(255);
    let hold_ms: u16 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(500);

    let frame = AlertFrame {
        player_id,
        alert_on,
        intensity,
        hold_ms,
    };
    let mut buf = [0u8; ALERT_FRAME_SIZE];
    let n = protocol::pack_alert(&mut buf, &frame);

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open socket: {}", e);
            std::process::exit(1);
        }
    };
    match socket.send_to(&buf[..n], addr) {
        Ok(sent) => println!("Sent {} bytes to {}: {:02x?}", sent, addr, &buf[..n]),
        Err(e) => {
            eprintln!("Send to {} failed: {}", addr, e);
            std::process::exit(1);
        }
    }
}
