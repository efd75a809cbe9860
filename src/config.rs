use crate::calibration::{ButtonTiming, RecenterMode, DEFAULT_AUTO_RECENTER_DELAY_MS};
use crate::fusion::DEFAULT_BETA;
use crate::quality::DEFAULT_MAG_EXPECTED_UT;
use crate::sensor::BusConfig;
use crate::transport::UdpConfig;
use crate::types::SensorKind;
use crate::{NodeError, Result};
use std::str::FromStr;
use std::time::Duration;

/// Everything a node needs to know at bring-up.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub player_id: u8,
    /// `host:port` of the telemetry server.
    pub server: String,
    pub local_port: u16,
    pub sensor: SensorKind,
    pub bus: BusConfig,
    pub button_enabled: bool,
    pub recenter: RecenterMode,
    pub button_timing: ButtonTiming,
    pub telemetry_rate_hz: u32,
    pub gyro_calibration_ms: u32,
    pub mag_expected_ut: f32,
    pub beta: f32,
    /// Reported battery voltage. There is no fuel gauge.
    pub battery_mv: u16,
    /// Larger tick deltas are treated as a stall and replaced by the nominal period.
    pub max_dt_s: f32,
    pub transport_open_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            player_id: 1,
            server: "192.168.1.100:9999".into(),
            local_port: 12001,
            sensor: SensorKind::Mpu6050,
            bus: BusConfig::default(),
            button_enabled: false,
            recenter: RecenterMode::AutoOnBoot {
                delay_ms: DEFAULT_AUTO_RECENTER_DELAY_MS,
            },
            button_timing: ButtonTiming::default(),
            telemetry_rate_hz: 20,
            gyro_calibration_ms: 2000,
            mag_expected_ut: DEFAULT_MAG_EXPECTED_UT,
            beta: DEFAULT_BETA,
            battery_mv: 3700,
            max_dt_s: 0.2,
            transport_open_timeout: Duration::from_millis(15_000),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden by `FDW_*` environment variables.
    ///
    /// Unparseable values keep the default. Enabling the button switches the
    /// recenter mode to button-driven; `FDW_RECENTER=auto` with a button is
    /// rejected later by [`validate`](Self::validate).
    pub fn from_env() -> Self {
        let d = Self::default();

        let button_enabled = read_env_bool("FDW_BUTTON", d.button_enabled);
        let auto_delay_ms = read_env("FDW_AUTO_RECENTER_DELAY_MS", DEFAULT_AUTO_RECENTER_DELAY_MS);
        let default_mode = if button_enabled { "button" } else { "auto" };
        let recenter = match read_env_string("FDW_RECENTER", default_mode).as_str() {
            "button" => RecenterMode::Button,
            "auto" | "auto-on-boot" => RecenterMode::AutoOnBoot { delay_ms: auto_delay_ms },
            other => {
                log::warn!("Unknown FDW_RECENTER='{}', using {} (supported: button|auto)", other, default_mode);
                if button_enabled {
                    RecenterMode::Button
                } else {
                    RecenterMode::AutoOnBoot { delay_ms: auto_delay_ms }
                }
            }
        };

        let sensor_name = read_env_string("FDW_SENSOR", d.sensor.label());
        let sensor = SensorKind::parse(&sensor_name).unwrap_or_else(|| {
            log::warn!(
                "Unknown FDW_SENSOR='{}', using {} (supported: mpu6050|icm20948)",
                sensor_name,
                d.sensor.label()
            );
            d.sensor
        });

        Self {
            player_id: read_env("FDW_PLAYER_ID", d.player_id),
            server: std::env::var("FDW_SERVER")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(d.server),
            local_port: read_env("FDW_LOCAL_PORT", d.local_port),
            sensor,
            bus: BusConfig {
                sda_pin: read_env("FDW_I2C_SDA", d.bus.sda_pin),
                scl_pin: read_env("FDW_I2C_SCL", d.bus.scl_pin),
                ..d.bus
            },
            button_enabled,
            recenter,
            button_timing: d.button_timing,
            telemetry_rate_hz: read_env("FDW_RATE_HZ", d.telemetry_rate_hz),
            gyro_calibration_ms: read_env("FDW_GYRO_CAL_MS", d.gyro_calibration_ms),
            mag_expected_ut: read_env("FDW_MAG_EXPECTED_UT", d.mag_expected_ut),
            beta: read_env("FDW_BETA", d.beta),
            battery_mv: read_env("FDW_BATTERY_MV", d.battery_mv),
            max_dt_s: d.max_dt_s,
            transport_open_timeout: Duration::from_millis(read_env(
                "FDW_OPEN_TIMEOUT_MS",
                d.transport_open_timeout.as_millis() as u64,
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telemetry_rate_hz == 0 || self.telemetry_rate_hz > 1000 {
            return Err(NodeError::InvalidConfig(format!(
                "telemetry rate {} Hz out of range 1..=1000",
                self.telemetry_rate_hz
            )));
        }
        if !(self.beta > 0.0) {
            return Err(NodeError::InvalidConfig(format!("filter gain {} must be positive", self.beta)));
        }
        if !(self.mag_expected_ut > 0.0) {
            return Err(NodeError::InvalidConfig(format!(
                "expected field {} uT must be positive",
                self.mag_expected_ut
            )));
        }
        if !(self.max_dt_s > 0.0) {
            return Err(NodeError::InvalidConfig(format!("max dt {} s must be positive", self.max_dt_s)));
        }
        // A fitted button always drives recentering and hard-iron calibration.
        match (self.recenter, self.button_enabled) {
            (RecenterMode::Button, false) => {
                return Err(NodeError::InvalidConfig(
                    "button recentering selected but no button is fitted".into(),
                ))
            }
            (RecenterMode::AutoOnBoot { .. }, true) => {
                return Err(NodeError::InvalidConfig(
                    "auto-on-boot recentering selected but a button is fitted".into(),
                ))
            }
            _ => {}
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.telemetry_rate_hz.max(1) as u64)
    }

    /// Integration step used when the measured one is implausible.
    pub fn nominal_dt_s(&self) -> f32 {
        1.0 / self.telemetry_rate_hz.max(1) as f32
    }

    pub fn udp(&self) -> UdpConfig {
        UdpConfig {
            server: self.server.clone(),
            local_port: self.local_port,
            open_timeout: self.transport_open_timeout,
        }
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
