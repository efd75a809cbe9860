use std::fmt;

/// Errors raised by the node's collaborators and bring-up sequence.
///
/// Only bring-up failures are fatal. Once the control loop runs, every
/// variant is logged and the tick is skipped or the frame dropped.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sensor identity mismatch: expected 0x{expected:02x}, got 0x{found:02x}")]
    SensorIdentity { expected: u8, found: u8 },

    #[error("Sensor bus init failed: {0}")]
    BusInit(String),

    #[error("Sensor not initialized")]
    SensorNotInitialized,

    #[error("Sensor read failed: {0}")]
    SensorRead(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel disconnected")]
    ChannelDisconnected,
}

/// Why an inbound or outbound frame was rejected by the codec.
///
/// The control loop never surfaces these; they exist for tools and the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame length mismatch: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Buffer too small: need {needed}, have {capacity}")]
    Capacity { needed: usize, capacity: usize },

    #[error("Bad magic: 0x{0:02x}{1:02x}")]
    Magic(u8, u8),

    #[error("Unsupported version: {0}")]
    Version(u8),

    #[error("Unexpected message type: {0}")]
    MessageType(u8),

    #[error("CRC mismatch: frame 0x{received:04x}, computed 0x{computed:04x}")]
    Crc { received: u16, computed: u16 },
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &dyn fmt::Display) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
