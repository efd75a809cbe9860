/// One inertial reading, produced per tick by the sensor and consumed immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Acceleration [x, y, z] in g.
    pub accel_g: [f32; 3],
    /// Angular rate [x, y, z] in deg/s, gyro bias already removed.
    pub gyro_dps: [f32; 3],
    /// Magnetic field [x, y, z] in µT, hard-iron offset already removed.
    /// All zero when the sensor has no magnetometer.
    pub mag_ut: [f32; 3],
}

impl Sample {
    /// Angular rate converted to rad/s, as the fusion filter expects it.
    pub fn gyro_rad_s(&self) -> [f32; 3] {
        self.gyro_dps.map(f32::to_radians)
    }
}

/// Euclidean norm of a 3-vector.
pub fn norm3(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Fused attitude in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    pub yaw_deg: f32,
    pub pitch_deg: f32,
    pub roll_deg: f32,
}

/// Sensor corrections applied by the sensor when producing a [`Sample`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationState {
    /// Gyro zero-rate offset in deg/s.
    pub gyro_bias_dps: [f32; 3],
    /// Magnetometer hard-iron offset in µT.
    pub mag_offset_ut: [f32; 3],
}

/// Heading reference subtracted from raw yaw before transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecenterState {
    pub yaw_offset_deg: f32,
    pub auto_recenter_done: bool,
}

bitflags::bitflags! {
    /// Status bits carried in the telemetry `flags` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct TelemetryFlags: u8 {
        const IMU_ONLY_MODE      = 1 << 0;
        const AUTO_RECENTER_DONE = 1 << 1;
        const MAG_CAL_ACTIVE     = 1 << 2;
    }
}

/// Supported sensor chips.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Accelerometer + gyroscope only.
    Mpu6050 = 0,
    /// Accelerometer + gyroscope + AK09916 magnetometer.
    Icm20948 = 1,
}

impl SensorKind {
    /// WHO_AM_I value the chip must report at bring-up.
    pub fn expected_identity(self) -> u8 {
        match self {
            SensorKind::Mpu6050 => 0x68,
            SensorKind::Icm20948 => 0xEA,
        }
    }

    pub fn has_magnetometer(self) -> bool {
        matches!(self, SensorKind::Icm20948)
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Mpu6050 => "MPU-6050",
            SensorKind::Icm20948 => "ICM-20948",
        }
    }

    /// Parse a config string such as `mpu6050` or `icm20948`.
    pub fn parse(s: &str) -> Option<SensorKind> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "mpu6050" => Some(SensorKind::Mpu6050),
            "icm20948" => Some(SensorKind::Icm20948),
            _ => None,
        }
    }
}

/// Hardware capabilities resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCapabilities {
    pub kind: SensorKind,
    pub has_magnetometer: bool,
    pub has_button: bool,
}

impl SensorCapabilities {
    pub fn new(kind: SensorKind, has_button: bool) -> Self {
        Self {
            kind,
            has_magnetometer: kind.has_magnetometer(),
            has_button,
        }
    }

    /// Hard-iron calibration needs both a magnetometer and the button to trigger it.
    pub fn supports_mag_calibration(&self) -> bool {
        self.has_magnetometer && self.has_button
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_bits_match_wire() {
        assert_eq!(TelemetryFlags::IMU_ONLY_MODE.bits(), 0x01);
        assert_eq!(TelemetryFlags::AUTO_RECENTER_DONE.bits(), 0x02);
        assert_eq!(TelemetryFlags::MAG_CAL_ACTIVE.bits(), 0x04);
    }

    #[test]
    fn test_sensor_kind_parse() {
        assert_eq!(SensorKind::parse("MPU-6050"), Some(SensorKind::Mpu6050));
        assert_eq!(SensorKind::parse(" icm_20948 "), Some(SensorKind::Icm20948));
        assert_eq!(SensorKind::parse("bno086"), None);
    }

    #[test]
    fn test_mag_calibration_requires_button() {
        assert!(!SensorCapabilities::new(SensorKind::Icm20948, false).supports_mag_calibration());
        assert!(SensorCapabilities::new(SensorKind::Icm20948, true).supports_mag_calibration());
        assert!(!SensorCapabilities::new(SensorKind::Mpu6050, true).supports_mag_calibration());
    }

    #[test]
    fn test_gyro_rad_s() {
        let s = Sample {
            gyro_dps: [180.0, 0.0, -90.0],
            ..Default::default()
        };
        let g = s.gyro_rad_s();
        assert!((g[0] - std::f32::consts::PI).abs() < 1e-6);
        assert!((g[2] + std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
