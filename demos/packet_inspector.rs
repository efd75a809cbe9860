//! Listen for node frames on UDP and print them decoded.
//!
//! Usage: cargo run --example packet_inspector [bind_addr]
//! Default bind address is 0.0.0.0:9999.

use fdw_node::protocol::{self, MSG_ALERT, MSG_TELEMETRY};
use std::net::UdpSocket;

fn main() {
    env_logger::init();

    let bind = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:9999".to_string());
    let socket = match UdpSocket::bind(&bind) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", bind, e);
            std::process::exit(1);
        }
    };
    println!("Listening on {} (Ctrl+C to stop)...", bind);

    let mut buf = [0u8; 512];
    loop {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("recv error: {}", e);
                continue;
            }
        };
        let data = &buf[..n];

        match protocol::peek_message_type(data) {
            Some(MSG_TELEMETRY) => match protocol::unpack_telemetry(data) {
                Ok(t) => {
                    let a = t.attitude();
                    println!(
                        "{}  TEL player={} seq={:<5} t={}ms yaw={:+7.2} pitch={:+7.2} roll={:+7.2} q={:<3} batt={}mV flags={:?}",
                        from, t.player_id, t.seq, t.timestamp_ms, a.yaw_deg, a.pitch_deg, a.roll_deg,
                        t.quality, t.battery_mv, t.flags,
                    );
                }
                Err(e) => println!("{}  TEL rejected ({} bytes): {}", from, n, e),
            },
            Some(MSG_ALERT) => match protocol::unpack_alert(data) {
                Ok(a) => println!(
                    "{}  ALERT player={} on={} intensity={} hold={}ms",
                    from, a.player_id, a.alert_on, a.intensity, a.hold_ms
                ),
                Err(e) => println!("{}  ALERT rejected ({} bytes): {}", from, n, e),
            },
            _ => println!("{}  unknown datagram ({} bytes): {:02x?}", from, n, &data[..n.min(16)]),
        }
    }
}
