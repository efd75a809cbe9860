//! # fdw-node - orientation node for wearable haptic tracking
//!
//! Fuses IMU (and optionally magnetometer) samples into a heading/attitude
//! estimate, streams it as 45-byte CRC-protected telemetry over UDP and
//! drives a haptic output from inbound alert frames. Provides:
//! - Madgwick gradient-descent fusion, with and without magnetometer
//! - Gyro-bias bootstrap, hard-iron calibration and yaw recentering
//! - Bit-exact wire codec (telemetry v2, alert v1, CRC16-CCITT)
//! - A fixed-rate control loop over pluggable sensor/transport/clock
//! - C FFI for the codec
//!
//! ## Quick Start
//! ```no_run
//! use fdw_node::{ControlLoop, NodeConfig, Pins, SimulatedImu, SystemClock, UdpTransport};
//! use fdw_node::gpio::LogOutput;
//! use std::sync::atomic::AtomicBool;
//!
//! let config = NodeConfig::from_env();
//! let imu = SimulatedImu::new(config.sensor, config.nominal_dt_s());
//! let transport = UdpTransport::open(&config.udp()).unwrap();
//! let mut node = ControlLoop::start(config, imu, transport, SystemClock::new(), Pins::new(LogOutput::new())).unwrap();
//! node.run(&AtomicBool::new(true));
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod fusion;
pub mod quality;
pub mod calibration;
pub mod alert;
pub mod sensor;
pub mod transport;
pub mod gpio;
pub mod clock;
pub mod config;
pub mod control;
pub mod ffi;

pub use error::{FrameError, NodeError};
pub use types::*;
pub use protocol::{AlertFrame, TelemetryFrame};
pub use fusion::FusionEngine;
pub use quality::QualityScorer;
pub use calibration::{CalibrationController, HardIronCalibrator, RecenterMode};
pub use alert::{AlertState, AlertStateMachine};
pub use sensor::{BusConfig, ImuSensor, SimulatedImu};
pub use transport::{Transport, UdpConfig, UdpTransport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NodeConfig;
pub use control::{ControlLoop, Pins, TickOutcome, TickReport};

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
