//! Fixed-rate control loop tying sensor, fusion, calibration, codec and alert together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::alert::{AlertState, AlertStateMachine};
use crate::calibration::CalibrationController;
use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::fusion::FusionEngine;
use crate::gpio::{AlertOutput, ButtonInput, NoButton};
use crate::protocol::{self, AlertFrame, TelemetryFrame, TELEMETRY_FRAME_SIZE};
use crate::quality::QualityScorer;
use crate::sensor::ImuSensor;
use crate::transport::Transport;
use crate::types::{Attitude, RecenterState, SensorCapabilities, TelemetryFlags};
use crate::Result;

/// Inbound datagrams longer than this are truncated and then fail decode.
const RX_BUFFER_SIZE: usize = 64;

/// Output pin and optional button of the board.
pub struct Pins {
    pub output: Box<dyn AlertOutput>,
    pub button: Box<dyn ButtonInput>,
}

impl Pins {
    /// Board with an alert output and no button.
    pub fn new(output: impl AlertOutput + 'static) -> Self {
        Self {
            output: Box::new(output),
            button: Box::new(NoButton),
        }
    }

    pub fn with_button(mut self, button: impl ButtonInput + 'static) -> Self {
        self.button = Box::new(button);
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Sensor read failed; nothing was updated or sent.
    Skipped,
    Completed(TickReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Telemetry packed this tick.
    pub frame: TelemetryFrame,
    /// Whether the transport accepted the frame.
    pub sent: bool,
    /// Recentered attitude as transmitted.
    pub attitude: Attitude,
    /// Alert command for this node decoded this tick, if any.
    pub alert_command: Option<AlertFrame>,
    /// Alert state after this tick.
    pub alert: AlertState,
    /// Hard-iron offset pushed to the sensor this tick, if calibration finished.
    pub mag_offset_applied: Option<[f32; 3]>,
}

/// Counters for the lifetime of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub skipped: u64,
    pub send_failures: u64,
    pub alerts_received: u64,
}

/// Keeps wakes on a fixed grid. A wake that is already in the past runs
/// immediately and the grid restarts from there; missed periods are not replayed.
#[derive(Debug, Clone, Copy)]
struct Scheduler {
    period_us: u64,
    next_wake_us: u64,
}

impl Scheduler {
    fn new(period: Duration, now_us: u64) -> Self {
        let period_us = (period.as_micros() as u64).max(1);
        Self {
            period_us,
            next_wake_us: now_us + period_us,
        }
    }

    fn wait<C: Clock>(&mut self, clock: &mut C) {
        let now = clock.now_us();
        if now > self.next_wake_us {
            log::debug!(
                "Scheduler late by {}us, re-anchoring",
                now - self.next_wake_us
            );
            self.next_wake_us = now;
        }
        clock.sleep_until(self.next_wake_us);
        self.next_wake_us += self.period_us;
    }
}

/// The node's single periodic task.
///
/// Owns every collaborator and all mutable state; nothing here is shared
/// with another thread.
pub struct ControlLoop<S, T, C> {
    config: NodeConfig,
    caps: SensorCapabilities,
    sensor: S,
    transport: T,
    clock: C,
    pins: Pins,
    fusion: FusionEngine,
    scorer: QualityScorer,
    calibration: CalibrationController,
    alert: AlertStateMachine,
    seq: u16,
    last_tick_us: u64,
    send_failing: bool,
    stats: LoopStats,
}

impl<S: ImuSensor, T: Transport, C: Clock> ControlLoop<S, T, C> {
    /// Bring the node up: sensor init, output low, gyro-bias bootstrap, filter init.
    ///
    /// Every error returned here is fatal. Once this succeeds nothing in the
    /// loop fails outward.
    pub fn start(config: NodeConfig, mut sensor: S, transport: T, mut clock: C, mut pins: Pins) -> Result<Self> {
        config.validate()?;

        pins.output.set(false);
        sensor.init(&config.bus)?;
        if sensor.kind() != config.sensor {
            log::warn!(
                "Configured sensor {} but {} is fitted, using {}",
                config.sensor.label(),
                sensor.kind().label(),
                sensor.kind().label()
            );
        }
        let caps = SensorCapabilities::new(sensor.kind(), config.button_enabled);

        log::info!("Keep device still for gyro calibration");
        sensor.calibrate_gyro_bias(config.gyro_calibration_ms, &mut clock)?;

        let fusion = FusionEngine::new(config.beta);
        let scorer = QualityScorer::for_capability(caps.has_magnetometer, config.mag_expected_ut);

        let now_us = clock.now_us();
        let calibration = CalibrationController::new(config.recenter, &caps, config.button_timing, now_us / 1000);

        log::info!(
            "Node {} up: sensor={} mag={} button={} recenter={} rate={}Hz",
            config.player_id,
            caps.kind.label(),
            caps.has_magnetometer,
            caps.has_button,
            config.recenter.label(),
            config.telemetry_rate_hz
        );

        Ok(Self {
            config,
            caps,
            sensor,
            transport,
            clock,
            pins,
            fusion,
            scorer,
            calibration,
            alert: AlertStateMachine::new(),
            seq: 0,
            last_tick_us: now_us,
            send_failing: false,
            stats: LoopStats::default(),
        })
    }

    /// Run one pass of the pipeline at the current clock time.
    pub fn tick(&mut self) -> TickOutcome {
        let now_us = self.clock.now_us();
        let now_ms = now_us / 1000;
        let mut dt_s = now_us.saturating_sub(self.last_tick_us) as f32 / 1_000_000.0;
        if !(dt_s > 0.0) || dt_s > self.config.max_dt_s {
            dt_s = self.config.nominal_dt_s();
        }

        let sample = match self.sensor.read_sample() {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("IMU read failed: {}", e);
                self.stats.skipped += 1;
                return TickOutcome::Skipped;
            }
        };
        self.last_tick_us = now_us;
        self.stats.ticks += 1;

        // Calibration policy sees the field before offset correction.
        let pressed = self.caps.has_button && self.pins.button.is_pressed();
        let offset = self.sensor.mag_offset();
        let raw_mag = [
            sample.mag_ut[0] + offset[0],
            sample.mag_ut[1] + offset[1],
            sample.mag_ut[2] + offset[2],
        ];
        let mag_offset_applied = self.calibration.before_fusion(now_ms, pressed, raw_mag);
        if let Some(o) = mag_offset_applied {
            self.sensor.set_mag_offset(o);
        }

        if self.caps.has_magnetometer {
            self.fusion
                .update_with_mag(dt_s, sample.gyro_rad_s(), sample.accel_g, sample.mag_ut);
        } else {
            self.fusion.update_imu_only(dt_s, sample.gyro_rad_s(), sample.accel_g);
        }

        let euler = self.fusion.euler_deg();
        let attitude = Attitude {
            yaw_deg: self.calibration.after_fusion(now_ms, euler.yaw_deg),
            ..euler
        };
        let quality = self.scorer.score(&sample);

        let mut flags = self.calibration.flags();
        flags.set(TelemetryFlags::IMU_ONLY_MODE, !self.caps.has_magnetometer);

        let frame = TelemetryFrame {
            player_id: self.config.player_id,
            seq: self.seq,
            timestamp_ms: now_ms as u32,
            quality,
            battery_mv: self.config.battery_mv,
            flags,
            ..Default::default()
        }
        .with_attitude(attitude);
        let sent = self.send_telemetry(&frame);

        let alert_command = self.poll_alert();
        let active = self.alert.update(alert_command.as_ref(), now_ms);
        self.pins.output.set(active);

        if self.stats.ticks % u64::from(self.config.telemetry_rate_hz) == 0 {
            let alert = self.alert.state();
            log::info!(
                "yaw={:.1} pitch={:.1} roll={:.1} q={} alert={} intensity={} flags=0x{:02X}",
                attitude.yaw_deg,
                attitude.pitch_deg,
                attitude.roll_deg,
                quality,
                alert.active as u8,
                alert.intensity,
                flags.bits()
            );
        }

        TickOutcome::Completed(TickReport {
            frame,
            sent,
            attitude,
            alert_command,
            alert: self.alert.state(),
            mag_offset_applied,
        })
    }

    /// Tick at the configured rate until `running` clears.
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!("Main loop started at {} Hz", self.config.telemetry_rate_hz);
        let mut scheduler = Scheduler::new(self.config.period(), self.clock.now_us());
        while running.load(Ordering::Relaxed) {
            scheduler.wait(&mut self.clock);
            self.tick();
        }
        self.pins.output.set(false);
        log::info!(
            "Main loop stopped after {} ticks ({} skipped, {} send failures)",
            self.stats.ticks,
            self.stats.skipped,
            self.stats.send_failures
        );
    }

    /// Tick at the configured rate `count` times.
    pub fn run_ticks(&mut self, count: u64) -> Vec<TickOutcome> {
        let mut scheduler = Scheduler::new(self.config.period(), self.clock.now_us());
        (0..count)
            .map(|_| {
                scheduler.wait(&mut self.clock);
                self.tick()
            })
            .collect()
    }

    /// Pack and send; the sequence number advances even if the send fails.
    fn send_telemetry(&mut self, frame: &TelemetryFrame) -> bool {
        let mut out = [0u8; TELEMETRY_FRAME_SIZE];
        let len = protocol::pack_telemetry(&mut out, frame);
        self.seq = self.seq.wrapping_add(1);
        if len != TELEMETRY_FRAME_SIZE {
            return false;
        }

        match self.transport.send(&out[..len]) {
            Ok(_) => {
                if self.send_failing {
                    log::info!("Telemetry send recovered");
                    self.send_failing = false;
                }
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                if !self.send_failing {
                    log::warn!("Telemetry send failed: {}", e);
                    self.send_failing = true;
                } else {
                    log::debug!("Telemetry send failed: {}", e);
                }
                false
            }
        }
    }

    /// Non-blocking receive of at most one datagram, decoded as an alert for this node.
    fn poll_alert(&mut self) -> Option<AlertFrame> {
        let mut buf = [0u8; RX_BUFFER_SIZE];
        let n = match self.transport.receive(&mut buf, Duration::ZERO) {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => {
                log::debug!("Receive failed: {}", e);
                return None;
            }
        };

        match protocol::unpack_alert(&buf[..n]) {
            Ok(cmd) if cmd.player_id == self.config.player_id => {
                self.stats.alerts_received += 1;
                Some(cmd)
            }
            Ok(cmd) => {
                log::trace!("Alert for player {} ignored", cmd.player_id);
                None
            }
            Err(e) => {
                log::trace!("Dropped inbound datagram ({} bytes): {}", n, e);
                None
            }
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn capabilities(&self) -> SensorCapabilities {
        self.caps
    }

    /// Sequence number the next frame will carry.
    pub fn next_seq(&self) -> u16 {
        self.seq
    }

    pub fn fusion(&self) -> &FusionEngine {
        &self.fusion
    }

    pub fn alert_state(&self) -> AlertState {
        self.alert.state()
    }

    pub fn recenter_state(&self) -> RecenterState {
        self.calibration.recenter_state()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
