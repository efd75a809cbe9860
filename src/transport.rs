use crate::{NodeError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest datagram the reader thread accepts. Anything longer is cut here.
const MAX_DATAGRAM: usize = 512;
/// Inbound queue depth. The loop drains one datagram per tick.
const QUEUE_DEPTH: usize = 32;
/// Reader thread wakes at least this often to check the stop flag.
const READ_POLL: Duration = Duration::from_millis(100);
const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Datagram link to the server. No delivery or ordering guarantee.
pub trait Transport {
    /// Send one datagram, returning the number of bytes sent.
    fn send(&mut self, frame: &[u8]) -> Result<usize>;

    /// Copy at most one pending datagram into `buf`, waiting up to `timeout`.
    /// `Ok(0)` means nothing arrived.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        (**self).send(frame)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive(buf, timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConfig {
    /// `host:port` of the telemetry server.
    pub server: String,
    pub local_port: u16,
    /// Give up bring-up after this long.
    pub open_timeout: Duration,
}

/// UDP transport with a background reader thread.
///
/// The thread owns a clone of the socket and forwards every datagram into a
/// bounded channel; [`receive`](Transport::receive) only touches the channel,
/// so a zero timeout never blocks.
pub struct UdpTransport {
    socket: UdpSocket,
    server: SocketAddr,
    receiver: Receiver<Vec<u8>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UdpTransport {
    /// Resolve the server, bind the local port and start the reader.
    ///
    /// Binding is retried until `open_timeout` elapses, after which the
    /// transport is reported unavailable.
    pub fn open(config: &UdpConfig) -> Result<UdpTransport> {
        let server = resolve(&config.server)?;
        let socket = bind_with_retry(config.local_port, config.open_timeout)?;
        let reader = socket.try_clone()?;
        reader.set_read_timeout(Some(READ_POLL))?;

        let (sender, receiver) = crossbeam_channel::bounded(QUEUE_DEPTH);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("fdw-udp-rx".into())
            .spawn(move || {
                udp_reader_loop(reader, sender, stop_clone);
            })
            .map_err(|e| NodeError::TransportUnavailable(format!("Failed to spawn UDP reader: {}", e)))?;

        log::info!(
            "UDP ready: local {} -> server {}",
            socket.local_addr()?,
            server
        );

        Ok(UdpTransport {
            socket,
            server,
            receiver,
            stop_flag,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(frame, self.server)?)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let datagram = if timeout.is_zero() {
            match self.receiver.try_recv() {
                Ok(d) => d,
                Err(crossbeam_channel::TryRecvError::Empty) => return Ok(0),
                Err(crossbeam_channel::TryRecvError::Disconnected) => return Err(NodeError::ChannelDisconnected),
            }
        } else {
            match self.receiver.recv_timeout(timeout) {
                Ok(d) => d,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => return Ok(0),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(NodeError::ChannelDisconnected)
                }
            }
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve(server: &str) -> Result<SocketAddr> {
    server
        .to_socket_addrs()
        .map_err(|e| NodeError::InvalidConfig(format!("server address '{}': {}", server, e)))?
        .next()
        .ok_or_else(|| NodeError::InvalidConfig(format!("server address '{}' did not resolve", server)))
}

fn bind_with_retry(local_port: u16, timeout: Duration) -> Result<UdpSocket> {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match UdpSocket::bind(("0.0.0.0", local_port)) {
            Ok(socket) => {
                if attempt > 1 {
                    log::info!("UDP bind on port {} succeeded (attempt {})", local_port, attempt);
                }
                return Ok(socket);
            }
            Err(e) if Instant::now() + BIND_RETRY_DELAY < deadline => {
                log::warn!("UDP bind on port {} failed (attempt {}): {}", local_port, attempt, e);
                std::thread::sleep(BIND_RETRY_DELAY);
            }
            Err(e) => {
                return Err(NodeError::TransportUnavailable(format!(
                    "bind on port {} failed after {} attempts: {}",
                    local_port, attempt, e
                )));
            }
        }
    }
}

/// Runs in a dedicated thread until the stop flag is set or the transport is dropped.
fn udp_reader_loop(socket: UdpSocket, sender: Sender<Vec<u8>>, stop_flag: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];

    log::debug!("UDP reader started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::debug!("UDP reader stopping (stop flag set)");
            break;
        }

        let len = match socket.recv_from(&mut buf) {
            Ok((n, _from)) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                log::warn!("UDP read error: {}", e);
                continue;
            }
        };

        if let Err(e) = sender.try_send(buf[..len].to_vec()) {
            match e {
                crossbeam_channel::TrySendError::Full(_) => {
                    log::trace!("UDP queue full, dropping datagram");
                }
                crossbeam_channel::TrySendError::Disconnected(_) => {
                    log::debug!("UDP queue disconnected, stopping reader");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (UdpTransport, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let transport = UdpTransport::open(&UdpConfig {
            server: peer.local_addr().unwrap().to_string(),
            local_port: 0,
            open_timeout: Duration::from_secs(1),
        })
        .unwrap();
        (transport, peer)
    }

    #[test]
    fn test_send_reaches_server() {
        let (mut transport, peer) = loopback_pair();
        assert_eq!(transport.server_addr(), peer.local_addr().unwrap());
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 3);
        let mut buf = [0u8; 8];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn test_receive_empty_is_zero() {
        let (mut transport, _peer) = loopback_pair();
        let mut buf = [0u8; 16];
        assert_eq!(transport.receive(&mut buf, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_receive_truncates_to_buffer() {
        let (mut transport, peer) = loopback_pair();
        let port = transport.local_addr().unwrap().port();
        peer.send_to(&[9u8; 20], ("127.0.0.1", port)).unwrap();
        let mut buf = [0u8; 11];
        let n = transport.receive(&mut buf, Duration::from_secs(2)).unwrap();
        assert_eq!(n, 11);
        assert_eq!(buf, [9u8; 11]);
    }

    #[test]
    fn test_unresolvable_server_is_config_error() {
        let err = UdpTransport::open(&UdpConfig {
            server: "not an address".into(),
            local_port: 0,
            open_timeout: Duration::from_millis(10),
        });
        assert!(matches!(err, Err(NodeError::InvalidConfig(_))));
    }

    #[test]
    fn test_drop_joins_reader() {
        let (transport, _peer) = loopback_pair();
        assert!(transport.is_active());
        drop(transport);
    }
}
