//! Gyro-bias bootstrap, magnetometer hard-iron calibration and yaw recentering.

use std::time::Duration;

use crate::clock::Clock;
use crate::protocol::wrap_deg;
use crate::sensor::ImuSensor;
use crate::types::{RecenterState, SensorCapabilities, TelemetryFlags};
use crate::Result;

// -- Timing constants --

/// Sample cadence of the gyro-bias bootstrap.
pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_millis(10);
/// The bootstrap never averages fewer samples than this.
pub const BOOTSTRAP_MIN_SAMPLES: u32 = 10;

pub const DEFAULT_TAP_MAX_MS: u64 = 1200;
pub const DEFAULT_MAG_CAL_HOLD_MS: u64 = 3000;
pub const DEFAULT_MAG_CAL_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_AUTO_RECENTER_DELAY_MS: u64 = 1500;

// -- Gyro bias --

/// Average the raw gyro rate over `duration_ms` and push the mean to the
/// sensor as its bias. Blocks; the device must be held still.
pub fn bootstrap_gyro_bias<S, C>(sensor: &mut S, clock: &mut C, duration_ms: u32) -> Result<[f32; 3]>
where
    S: ImuSensor + ?Sized,
    C: Clock + ?Sized,
{
    let interval_ms = BOOTSTRAP_INTERVAL.as_millis() as u32;
    let samples = (duration_ms / interval_ms).max(BOOTSTRAP_MIN_SAMPLES);

    let mut sum = [0.0f64; 3];
    for _ in 0..samples {
        let g = sensor.read_raw_gyro()?;
        for (acc, v) in sum.iter_mut().zip(g) {
            *acc += v as f64;
        }
        clock.sleep(BOOTSTRAP_INTERVAL);
    }

    let n = samples as f64;
    let bias = sum.map(|s| (s / n) as f32);
    sensor.set_gyro_bias(bias);
    log::info!(
        "Gyro bias ({} samples): ({:.3}, {:.3}, {:.3}) dps",
        samples,
        bias[0],
        bias[1],
        bias[2]
    );
    Ok(bias)
}

// -- Hard iron --

/// Running per-axis min/max of the raw magnetic field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardIronCalibrator {
    min: [f32; 3],
    max: [f32; 3],
    samples: u32,
}

impl HardIronCalibrator {
    pub fn new() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
            samples: 0,
        }
    }

    pub fn update(&mut self, raw_ut: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(raw_ut[axis]);
            self.max[axis] = self.max[axis].max(raw_ut[axis]);
        }
        self.samples += 1;
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    /// Offset = midpoint of min and max, or `None` before the first sample.
    pub fn offset(&self) -> Option<[f32; 3]> {
        if self.samples == 0 {
            return None;
        }
        Some([
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ])
    }

    /// Half the min/max span per axis.
    pub fn radius(&self) -> Option<[f32; 3]> {
        if self.samples == 0 {
            return None;
        }
        Some([
            0.5 * (self.max[0] - self.min[0]),
            0.5 * (self.max[1] - self.min[1]),
            0.5 * (self.max[2] - self.min[2]),
        ])
    }
}

impl Default for HardIronCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct MagCalSession {
    started_ms: u64,
    calibrator: HardIronCalibrator,
}

// -- Recenter policy --

/// Recenter strategy, fixed for the lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecenterMode {
    /// Tap the button to recenter; hold it to start hard-iron calibration.
    Button,
    /// Recenter once, `delay_ms` after boot.
    AutoOnBoot { delay_ms: u64 },
}

impl RecenterMode {
    pub fn label(&self) -> &'static str {
        match self {
            RecenterMode::Button => "button",
            RecenterMode::AutoOnBoot { .. } => "auto-on-boot",
        }
    }
}

/// Button thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonTiming {
    /// A release within this many ms of the press is a tap.
    pub tap_max_ms: u64,
    /// Holding longer than this starts hard-iron calibration.
    pub mag_cal_hold_ms: u64,
    /// Length of the calibration window.
    pub mag_cal_window_ms: u64,
}

impl Default for ButtonTiming {
    fn default() -> Self {
        Self {
            tap_max_ms: DEFAULT_TAP_MAX_MS,
            mag_cal_hold_ms: DEFAULT_MAG_CAL_HOLD_MS,
            mag_cal_window_ms: DEFAULT_MAG_CAL_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonEvent {
    None,
    Tap,
    LongHold,
}

/// Edge detector for the recenter button.
#[derive(Debug, Clone, Copy)]
struct ButtonTracker {
    timing: ButtonTiming,
    prev_pressed: bool,
    pressed_since_ms: u64,
    long_hold_fired: bool,
}

impl ButtonTracker {
    fn new(timing: ButtonTiming) -> Self {
        Self {
            timing,
            prev_pressed: false,
            pressed_since_ms: 0,
            long_hold_fired: false,
        }
    }

    fn poll(&mut self, pressed: bool, now_ms: u64) -> ButtonEvent {
        if pressed && !self.prev_pressed {
            self.pressed_since_ms = now_ms;
            self.long_hold_fired = false;
        }
        let held_ms = now_ms.saturating_sub(self.pressed_since_ms);
        let was_pressed = self.prev_pressed;
        self.prev_pressed = pressed;

        if pressed && !self.long_hold_fired && held_ms > self.timing.mag_cal_hold_ms {
            self.long_hold_fired = true;
            return ButtonEvent::LongHold;
        }
        if !pressed && was_pressed && held_ms < self.timing.tap_max_ms {
            return ButtonEvent::Tap;
        }
        ButtonEvent::None
    }
}

#[derive(Debug, Clone, Copy)]
enum RecenterPolicy {
    Button(ButtonTracker),
    AutoOnBoot { due_ms: u64 },
}

// -- Controller --

/// Owns the recenter state and the hard-iron calibration session.
///
/// Driven twice per tick: [`before_fusion`](Self::before_fusion) with the
/// button level and raw field, then [`after_fusion`](Self::after_fusion)
/// with the fresh yaw.
#[derive(Debug, Clone)]
pub struct CalibrationController {
    policy: RecenterPolicy,
    mag_cal_allowed: bool,
    mag_cal_window_ms: u64,
    mag_cal: Option<MagCalSession>,
    recenter: RecenterState,
    recenter_requested: bool,
}

impl CalibrationController {
    pub fn new(mode: RecenterMode, caps: &SensorCapabilities, timing: ButtonTiming, boot_ms: u64) -> Self {
        let policy = match mode {
            RecenterMode::Button => RecenterPolicy::Button(ButtonTracker::new(timing)),
            RecenterMode::AutoOnBoot { delay_ms } => RecenterPolicy::AutoOnBoot {
                due_ms: boot_ms.saturating_add(delay_ms),
            },
        };
        Self {
            policy,
            mag_cal_allowed: matches!(mode, RecenterMode::Button) && caps.supports_mag_calibration(),
            mag_cal_window_ms: timing.mag_cal_window_ms,
            mag_cal: None,
            recenter: RecenterState::default(),
            recenter_requested: false,
        }
    }

    /// Evaluate the button and advance hard-iron calibration.
    ///
    /// `raw_mag_ut` is the field before offset correction. Returns the new
    /// offset on the tick the calibration window closes.
    pub fn before_fusion(&mut self, now_ms: u64, button_pressed: bool, raw_mag_ut: [f32; 3]) -> Option<[f32; 3]> {
        if let RecenterPolicy::Button(tracker) = &mut self.policy {
            match tracker.poll(button_pressed, now_ms) {
                ButtonEvent::LongHold if self.mag_cal_allowed && self.mag_cal.is_none() => {
                    self.mag_cal = Some(MagCalSession {
                        started_ms: now_ms,
                        calibrator: HardIronCalibrator::new(),
                    });
                    log::info!(
                        "Mag calibration started: move device slowly through multiple orientations for {}s",
                        self.mag_cal_window_ms / 1000
                    );
                }
                ButtonEvent::Tap => self.recenter_requested = true,
                _ => {}
            }
        }

        let session = self.mag_cal.as_mut()?;
        session.calibrator.update(raw_mag_ut);
        if now_ms.saturating_sub(session.started_ms) < self.mag_cal_window_ms {
            return None;
        }
        let offset = session.calibrator.offset();
        self.mag_cal = None;
        if let Some(o) = offset {
            log::info!("Mag calibration done offset=({:.2}, {:.2}, {:.2}) uT", o[0], o[1], o[2]);
        }
        offset
    }

    /// Apply any due recenter against the fused yaw and return the
    /// recentered yaw in (-180, 180].
    pub fn after_fusion(&mut self, now_ms: u64, yaw_deg: f32) -> f32 {
        match self.policy {
            RecenterPolicy::Button(_) => {
                if std::mem::take(&mut self.recenter_requested) {
                    self.recenter.yaw_offset_deg = yaw_deg;
                    log::info!("Heading recentered, yaw offset {:.2}", yaw_deg);
                }
            }
            RecenterPolicy::AutoOnBoot { due_ms } => {
                if !self.recenter.auto_recenter_done && now_ms >= due_ms {
                    self.recenter.yaw_offset_deg = yaw_deg;
                    self.recenter.auto_recenter_done = true;
                    log::info!("Auto recenter done at boot, yaw offset {:.2}", yaw_deg);
                }
            }
        }
        self.recentered(yaw_deg)
    }

    pub fn recentered(&self, yaw_deg: f32) -> f32 {
        wrap_deg(yaw_deg - self.recenter.yaw_offset_deg)
    }

    pub fn recenter_state(&self) -> RecenterState {
        self.recenter
    }

    pub fn mag_cal_active(&self) -> bool {
        self.mag_cal.is_some()
    }

    /// Recenter and calibration bits of the telemetry flags.
    pub fn flags(&self) -> TelemetryFlags {
        let mut flags = TelemetryFlags::empty();
        flags.set(TelemetryFlags::AUTO_RECENTER_DONE, self.recenter.auto_recenter_done);
        flags.set(TelemetryFlags::MAG_CAL_ACTIVE, self.mag_cal_active());
        flags
    }
}
