//! Sensor collaborator interface and a host-side simulated sensor.
//!
//! Register-level drivers live behind [`ImuSensor`]; the core only sees
//! calibrated [`Sample`]s and pushes calibration values back down.

use crate::calibration;
use crate::clock::Clock;
use crate::types::{CalibrationState, Sample, SensorKind};
use crate::{NodeError, Result};

/// I2C bus wiring handed to the driver at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub port: u8,
    pub sda_pin: u8,
    pub scl_pin: u8,
    pub clock_hz: u32,
}

impl Default for BusConfig {
    /// XIAO ESP32-C3 mapping: D4 -> GPIO6 (SDA), D5 -> GPIO7 (SCL), fast mode.
    fn default() -> Self {
        Self {
            port: 0,
            sda_pin: 6,
            scl_pin: 7,
            clock_hz: 400_000,
        }
    }
}

/// An inertial sensor that applies its own calibration when sampling.
pub trait ImuSensor {
    /// Configure the bus and verify chip identity. Fatal on failure.
    fn init(&mut self, bus: &BusConfig) -> Result<()>;

    /// Chip fitted on this board.
    fn kind(&self) -> SensorKind;

    fn has_magnetometer(&self) -> bool {
        self.kind().has_magnetometer()
    }

    /// One calibrated sample: gyro bias and hard-iron offset removed.
    fn read_sample(&mut self) -> Result<Sample>;

    /// Angular rate in deg/s without bias correction.
    fn read_raw_gyro(&mut self) -> Result<[f32; 3]>;

    fn set_gyro_bias(&mut self, bias_dps: [f32; 3]);

    fn set_mag_offset(&mut self, offset_ut: [f32; 3]);

    fn mag_offset(&self) -> [f32; 3];

    fn calibration(&self) -> CalibrationState;

    /// Blocking gyro-bias bootstrap; the device must be still.
    fn calibrate_gyro_bias<C: Clock>(&mut self, duration_ms: u32, clock: &mut C) -> Result<[f32; 3]>
    where
        Self: Sized,
    {
        calibration::bootstrap_gyro_bias(self, clock, duration_ms)
    }
}

/// Synthetic wearer standing level and slowly turning their head.
///
/// Heading follows `amplitude * (1 - cos(2π f t))`, so the wearer starts at
/// rest and the gyro bootstrap sees only bias. The gyro carries a constant
/// bias and the magnetometer (ICM-20948 only) a constant hard-iron error, so
/// both calibration paths have something to remove.
#[derive(Debug, Clone)]
pub struct SimulatedImu {
    kind: SensorKind,
    identity: u8,
    initialized: bool,
    cal: CalibrationState,
    sample_period_s: f32,
    t_s: f32,
    yaw_amplitude_deg: f32,
    yaw_freq_hz: f32,
    raw_gyro_bias_dps: [f32; 3],
    earth_field_ut: [f32; 3],
    hard_iron_ut: [f32; 3],
    fail_every: Option<u32>,
    reads: u32,
}

impl SimulatedImu {
    pub fn new(kind: SensorKind, sample_period_s: f32) -> Self {
        Self {
            kind,
            identity: kind.expected_identity(),
            initialized: false,
            cal: CalibrationState::default(),
            sample_period_s,
            t_s: 0.0,
            yaw_amplitude_deg: 80.0,
            yaw_freq_hz: 0.05,
            raw_gyro_bias_dps: [0.8, -0.5, 0.3],
            earth_field_ut: [22.0, 0.0, 42.0],
            hard_iron_ut: [12.0, -7.0, 4.0],
            fail_every: None,
            reads: 0,
        }
    }

    /// Make the chip answer with a different WHO_AM_I value.
    pub fn with_identity(mut self, identity: u8) -> Self {
        self.identity = identity;
        self
    }

    /// Heading swing amplitude and frequency.
    pub fn with_motion(mut self, amplitude_deg: f32, freq_hz: f32) -> Self {
        self.yaw_amplitude_deg = amplitude_deg;
        self.yaw_freq_hz = freq_hz;
        self
    }

    pub fn with_gyro_bias(mut self, bias_dps: [f32; 3]) -> Self {
        self.raw_gyro_bias_dps = bias_dps;
        self
    }

    pub fn with_hard_iron(mut self, offset_ut: [f32; 3]) -> Self {
        self.hard_iron_ut = offset_ut;
        self
    }

    /// Fail every `n`th sample read.
    pub fn with_read_failures(mut self, n: u32) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// True heading at the current simulation time, in degrees.
    pub fn true_yaw_deg(&self) -> f32 {
        let w = 2.0 * std::f32::consts::PI * self.yaw_freq_hz;
        self.yaw_amplitude_deg * (1.0 - (w * self.t_s).cos())
    }

    fn true_yaw_rate_dps(&self) -> f32 {
        let w = 2.0 * std::f32::consts::PI * self.yaw_freq_hz;
        self.yaw_amplitude_deg * w * (w * self.t_s).sin()
    }

    fn raw_gyro(&self) -> [f32; 3] {
        let b = self.raw_gyro_bias_dps;
        [b[0], b[1], b[2] + self.true_yaw_rate_dps()]
    }

    /// Earth field seen in the body frame, plus hard-iron error.
    fn raw_mag(&self) -> [f32; 3] {
        let (s, c) = self.true_yaw_deg().to_radians().sin_cos();
        let e = self.earth_field_ut;
        let h = self.hard_iron_ut;
        [
            c * e[0] + s * e[1] + h[0],
            -s * e[0] + c * e[1] + h[1],
            e[2] + h[2],
        ]
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(NodeError::SensorNotInitialized)
        }
    }
}

impl ImuSensor for SimulatedImu {
    fn init(&mut self, bus: &BusConfig) -> Result<()> {
        if bus.clock_hz == 0 || bus.sda_pin == bus.scl_pin {
            return Err(NodeError::BusInit(format!(
                "invalid bus wiring sda={} scl={} clock={}Hz",
                bus.sda_pin, bus.scl_pin, bus.clock_hz
            )));
        }
        let expected = self.kind.expected_identity();
        if self.identity != expected {
            return Err(NodeError::SensorIdentity {
                expected,
                found: self.identity,
            });
        }
        self.initialized = true;
        log::info!("{} initialized (simulated)", self.kind.label());
        Ok(())
    }

    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn read_sample(&mut self) -> Result<Sample> {
        self.ensure_initialized()?;
        self.reads = self.reads.wrapping_add(1);
        self.t_s += self.sample_period_s;
        if let Some(n) = self.fail_every {
            if self.reads % n == 0 {
                return Err(NodeError::SensorRead("simulated bus NACK".into()));
            }
        }

        let raw_gyro = self.raw_gyro();
        let bias = self.cal.gyro_bias_dps;
        let gyro_dps = [raw_gyro[0] - bias[0], raw_gyro[1] - bias[1], raw_gyro[2] - bias[2]];

        let mag_ut = if self.kind.has_magnetometer() {
            let raw = self.raw_mag();
            let o = self.cal.mag_offset_ut;
            [raw[0] - o[0], raw[1] - o[1], raw[2] - o[2]]
        } else {
            [0.0; 3]
        };

        Ok(Sample {
            accel_g: [0.0, 0.0, 1.0],
            gyro_dps,
            mag_ut,
        })
    }

    fn read_raw_gyro(&mut self) -> Result<[f32; 3]> {
        self.ensure_initialized()?;
        Ok(self.raw_gyro())
    }

    fn set_gyro_bias(&mut self, bias_dps: [f32; 3]) {
        self.cal.gyro_bias_dps = bias_dps;
    }

    fn set_mag_offset(&mut self, offset_ut: [f32; 3]) {
        self.cal.mag_offset_ut = offset_ut;
    }

    fn mag_offset(&self) -> [f32; 3] {
        self.cal.mag_offset_ut
    }

    fn calibration(&self) -> CalibrationState {
        self.cal
    }
}
