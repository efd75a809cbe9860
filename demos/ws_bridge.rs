//! Relay node telemetry from UDP to WebSocket clients as JSON.
//!
//! Usage: cargo run --example ws_bridge [udp_bind] [ws_port]
//! Defaults: UDP 0.0.0.0:9999, WebSocket port 8080.
//!
//! Each valid telemetry frame becomes one text message:
//!   {"player":1,"seq":5,"t":1000,"yaw":45.00,"pitch":0.00,"roll":0.00,"q":90,"batt":3700,"flags":0}

use fdw_node::protocol;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tungstenite::Message;

type WsClient = Arc<Mutex<tungstenite::WebSocket<TcpStream>>>;

fn main() {
    env_logger::init();

    let udp_bind = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:9999".to_string());
    let ws_port: u16 = std::env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(8080);

    let clients: Arc<Mutex<Vec<WsClient>>> = Arc::new(Mutex::new(Vec::new()));

    let socket = match UdpSocket::bind(&udp_bind) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to bind UDP {}: {}", udp_bind, e);
            std::process::exit(1);
        }
    };

    let udp_clients = clients.clone();
    let relay = std::thread::Builder::new()
        .name("fdw-udp-relay".into())
        .spawn(move || relay_loop(socket, udp_clients));
    if let Err(e) = relay {
        eprintln!("Failed to spawn relay thread: {}", e);
        std::process::exit(1);
    }

    let listener = match TcpListener::bind(("0.0.0.0", ws_port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind port {}: {}", ws_port, e);
            std::process::exit(1);
        }
    };

    eprintln!("[UDP] telemetry on {}", udp_bind);
    eprintln!("[WS]  ws://localhost:{}", ws_port);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[TCP] accept error: {}", e);
                continue;
            }
        };
        // Write timeout keeps the relay thread from blocking on a slow client.
        stream.set_write_timeout(Some(Duration::from_secs(2))).ok();
        stream.set_nodelay(true).ok();

        match tungstenite::accept(stream) {
            Ok(ws) => {
                if let Ok(mut list) = clients.lock() {
                    list.push(Arc::new(Mutex::new(ws)));
                    eprintln!("[WS] Client connected ({} total)", list.len());
                }
            }
            Err(e) => eprintln!("[WS] handshake error: {}", e),
        }
    }
}

/// Decode telemetry and broadcast it; clients that fail a send are dropped.
fn relay_loop(socket: UdpSocket, clients: Arc<Mutex<Vec<WsClient>>>) {
    let mut buf = [0u8; 512];
    let mut frames: u64 = 0;
    let mut rejected: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        let n = match socket.recv_from(&mut buf) {
            Ok((n, _)) => n,
            Err(e) => {
                eprintln!("[UDP] recv error: {}", e);
                continue;
            }
        };

        let t = match protocol::unpack_telemetry(&buf[..n]) {
            Ok(t) => t,
            Err(e) => {
                log::debug!("Dropped datagram ({} bytes): {}", n, e);
                rejected += 1;
                continue;
            }
        };
        frames += 1;

        let a = t.attitude();
        let json = format!(
            "{{\"player\":{},\"seq\":{},\"t\":{},\"yaw\":{:.2},\"pitch\":{:.2},\"roll\":{:.2},\"q\":{},\"batt\":{},\"flags\":{}}}",
            t.player_id,
            t.seq,
            t.timestamp_ms,
            a.yaw_deg,
            a.pitch_deg,
            a.roll_deg,
            t.quality,
            t.battery_mv,
            t.flags.bits(),
        );

        let msg = Message::Text(json);
        if let Ok(mut list) = clients.lock() {
            list.retain(|ws_arc| match ws_arc.lock() {
                Ok(mut ws) => ws.send(msg.clone()).is_ok(),
                Err(_) => false,
            });
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            let elapsed = last_report.elapsed().as_secs_f64();
            let clients_count = clients.lock().map(|l| l.len()).unwrap_or(0);
            eprintln!(
                "[UDP] {:.1} frames/s, {} rejected, {} client(s)",
                frames as f64 / elapsed,
                rejected,
                clients_count
            );
            frames = 0;
            rejected = 0;
            last_report = Instant::now();
        }
    }
}
