use fdw_node::gpio::{ScriptedButton, SharedOutput};
use fdw_node::protocol::{self, AlertFrame, ALERT_FRAME_SIZE, TELEMETRY_FRAME_SIZE};
use fdw_node::{
    Clock, ControlLoop, FusionEngine, ImuSensor, ManualClock, NodeConfig, NodeError, Pins, RecenterMode, SensorKind, SimulatedImu,
    TelemetryFlags, TickOutcome, TickReport, Transport,
};
use std::collections::VecDeque;
use std::time::Duration;

/// In-memory transport: records every sent frame, replays queued inbound datagrams.
#[derive(Default)]
struct ScriptedTransport {
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    fail_sends: bool,
}

impl Transport for ScriptedTransport {
    fn send(&mut self, frame: &[u8]) -> fdw_node::Result<usize> {
        if self.fail_sends {
            return Err(NodeError::TransportUnavailable("link down".into()));
        }
        self.sent.push(frame.to_vec());
        Ok(frame.len())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> fdw_node::Result<usize> {
        match self.inbound.pop_front() {
            Some(d) => {
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}

type Node = ControlLoop<SimulatedImu, ScriptedTransport, ManualClock>;

fn start(config: NodeConfig, imu: SimulatedImu, pins: Pins) -> Node {
    ControlLoop::start(config, imu, ScriptedTransport::default(), ManualClock::new(), pins).unwrap()
}

fn still_mpu() -> SimulatedImu {
    SimulatedImu::new(SensorKind::Mpu6050, 0.05).with_motion(0.0, 0.0)
}

fn report(outcome: &TickOutcome) -> &TickReport {
    match outcome {
        TickOutcome::Completed(r) => r,
        TickOutcome::Skipped => panic!("tick was skipped"),
    }
}

fn alert_bytes(player_id: u8, alert_on: bool, hold_ms: u16) -> Vec<u8> {
    let mut buf = [0u8; ALERT_FRAME_SIZE];
    let frame = AlertFrame {
        player_id,
        alert_on,
        intensity: 180,
        hold_ms,
    };
    let n = protocol::pack_alert(&mut buf, &frame);
    buf[..n].to_vec()
}

#[test]
fn test_bring_up_runs_gyro_bootstrap() {
    let node = start(NodeConfig::default(), still_mpu(), Pins::new(SharedOutput::new()));
    // 2000 ms bootstrap at 10 ms cadence.
    assert_eq!(node.clock().now_ms(), 2000);
    let bias = node.sensor().calibration().gyro_bias_dps;
    assert!((bias[0] - 0.8).abs() < 1e-5);
    assert!(!node.capabilities().has_magnetometer);
}

#[test]
fn test_bring_up_fails_on_identity_mismatch() {
    let imu = still_mpu().with_identity(0x71);
    let result = ControlLoop::start(
        NodeConfig::default(),
        imu,
        ScriptedTransport::default(),
        ManualClock::new(),
        Pins::new(SharedOutput::new()),
    );
    assert!(matches!(result, Err(NodeError::SensorIdentity { expected: 0x68, found: 0x71 })));
}

#[test]
fn test_bring_up_rejects_invalid_config() {
    let config = NodeConfig {
        telemetry_rate_hz: 0,
        ..Default::default()
    };
    let result = ControlLoop::start(
        config,
        still_mpu(),
        ScriptedTransport::default(),
        ManualClock::new(),
        Pins::new(SharedOutput::new()),
    );
    assert!(matches!(result, Err(NodeError::InvalidConfig(_))));
}

#[test]
fn test_bring_up_rejects_button_with_auto_recenter() {
    let config = NodeConfig {
        sensor: SensorKind::Icm20948,
        button_enabled: true,
        recenter: RecenterMode::AutoOnBoot { delay_ms: 1500 },
        ..Default::default()
    };
    let result = ControlLoop::start(
        config,
        SimulatedImu::new(SensorKind::Icm20948, 0.05),
        ScriptedTransport::default(),
        ManualClock::new(),
        Pins::new(SharedOutput::new()).with_button(ScriptedButton::press(2, 70)),
    );
    assert!(matches!(result, Err(NodeError::InvalidConfig(_))));
}

#[test]
fn test_tick_sends_decodable_telemetry() {
    let mut node = start(NodeConfig::default(), still_mpu(), Pins::new(SharedOutput::new()));
    let outcomes = node.run_ticks(2);

    let first = report(&outcomes[0]);
    assert!(first.sent);
    assert_eq!(first.frame.seq, 0);
    assert_eq!(first.frame.timestamp_ms, 2050);
    assert_eq!(first.frame.player_id, 1);
    assert_eq!(first.frame.battery_mv, 3700);
    assert_eq!(first.frame.quality, 100);
    assert_eq!(first.frame.flags, TelemetryFlags::IMU_ONLY_MODE);
    assert_eq!(report(&outcomes[1]).frame.seq, 1);

    let sent = &node.transport_mut().sent;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].len(), TELEMETRY_FRAME_SIZE);
    assert_eq!(&sent[0][..5], &[0x46, 0x44, 0x02, 0x01, 0x01]);
    let decoded = protocol::unpack_telemetry(&sent[1]).unwrap();
    assert_eq!(decoded.seq, 1);
    assert_eq!(decoded.timestamp_ms, 2100);
    assert_eq!((decoded.pos_x_cm, decoded.pos_y_cm, decoded.pos_quality), (0, 0, 0));
}

#[test]
fn test_sensor_fault_skips_tick_without_state_change() {
    let imu = still_mpu().with_read_failures(3);
    let mut node = start(NodeConfig::default(), imu, Pins::new(SharedOutput::new()));
    let outcomes = node.run_ticks(4);

    assert!(matches!(outcomes[2], TickOutcome::Skipped));
    assert_eq!(report(&outcomes[3]).frame.seq, 2);
    assert_eq!(node.transport_mut().sent.len(), 3);
    let stats = node.stats();
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_send_failure_still_advances_sequence() {
    let mut node = start(NodeConfig::default(), still_mpu(), Pins::new(SharedOutput::new()));
    node.transport_mut().fail_sends = true;
    let outcomes = node.run_ticks(2);
    assert!(!report(&outcomes[0]).sent);
    node.transport_mut().fail_sends = false;
    let next = node.run_ticks(1);
    assert!(report(&next[0]).sent);
    assert_eq!(report(&next[0]).frame.seq, 2);
    assert_eq!(node.stats().send_failures, 2);
}

#[test]
fn test_auto_recenter_flag_after_delay() {
    let mut node = start(NodeConfig::default(), still_mpu(), Pins::new(SharedOutput::new()));
    // Boot completes at 2000 ms; recenter is due at 3500 ms, the 30th tick.
    let outcomes = node.run_ticks(30);
    let before = report(&outcomes[28]);
    let at = report(&outcomes[29]);
    assert_eq!(before.frame.timestamp_ms, 3450);
    assert!(!before.frame.flags.contains(TelemetryFlags::AUTO_RECENTER_DONE));
    assert_eq!(at.frame.timestamp_ms, 3500);
    assert!(at.frame.flags.contains(TelemetryFlags::AUTO_RECENTER_DONE));
    assert!(node.recenter_state().auto_recenter_done);
}

#[test]
fn test_alert_hold_wins_over_early_off() {
    let output = SharedOutput::new();
    let mut node = start(NodeConfig::default(), still_mpu(), Pins::new(output.clone()));

    node.transport_mut().inbound.push_back(alert_bytes(1, true, 200));
    let r = node.run_ticks(1);
    let r = report(&r[0]);
    assert!(r.alert.active);
    assert_eq!(r.alert.intensity, 180);
    assert_eq!(r.alert.hold_until_ms, 2250);
    assert!(output.is_on());

    // Off at 2100 ms is inside the hold.
    node.transport_mut().inbound.push_back(alert_bytes(1, false, 0));
    node.run_ticks(1);
    assert!(output.is_on());

    // 2150, 2200 still held; 2250 reaches hold_until.
    let r = node.run_ticks(3);
    assert!(report(&r[1]).alert.active);
    assert!(!report(&r[2]).alert.active);
    assert!(!output.is_on());
}

#[test]
fn test_foreign_and_corrupt_alerts_are_dropped() {
    let output = SharedOutput::new();
    let mut node = start(NodeConfig::default(), still_mpu(), Pins::new(output.clone()));

    node.transport_mut().inbound.push_back(alert_bytes(2, true, 1000));
    let r = node.run_ticks(1);
    assert_eq!(report(&r[0]).alert_command, None);

    let mut corrupt = alert_bytes(1, true, 1000);
    corrupt[6] ^= 0xFF;
    node.transport_mut().inbound.push_back(corrupt);
    node.run_ticks(1);

    // A telemetry frame echoed back is not an alert.
    let echo = node.transport_mut().sent[0].clone();
    node.transport_mut().inbound.push_back(echo);
    node.run_ticks(1);

    assert!(!output.is_on());
    assert_eq!(node.stats().alerts_received, 0);
}

#[test]
fn test_button_tap_recenters_yaw() {
    let config = NodeConfig {
        button_enabled: true,
        recenter: RecenterMode::Button,
        ..Default::default()
    };
    let imu = SimulatedImu::new(SensorKind::Mpu6050, 0.05).with_motion(80.0, 0.5);
    let pins = Pins::new(SharedOutput::new()).with_button(ScriptedButton::press(4, 2));
    let mut node = start(config, imu, pins);

    let outcomes = node.run_ticks(8);
    // Pressed on ticks 5 and 6, released on tick 7.
    let tapped = report(&outcomes[6]);
    assert_eq!(tapped.attitude.yaw_deg, 0.0);
    assert!(node.recenter_state().yaw_offset_deg > 1.0);
    assert!(!node.recenter_state().auto_recenter_done);
}

#[test]
fn test_long_press_calibrates_hard_iron() {
    let config = NodeConfig {
        sensor: SensorKind::Icm20948,
        button_enabled: true,
        recenter: RecenterMode::Button,
        ..Default::default()
    };
    // One full heading revolution every 10 s, matching the calibration window.
    let imu = SimulatedImu::new(SensorKind::Icm20948, 0.05)
        .with_motion(180.0, 0.1)
        .with_hard_iron([12.0, -7.0, 4.0]);
    let pins = Pins::new(SharedOutput::new()).with_button(ScriptedButton::press(2, 70));
    let mut node = start(config, imu, pins);

    let outcomes = node.run_ticks(300);

    // Pressed from tick 3 (2150 ms); held > 3000 ms at tick 64 (5200 ms).
    assert!(!report(&outcomes[62]).frame.flags.contains(TelemetryFlags::MAG_CAL_ACTIVE));
    assert!(report(&outcomes[63]).frame.flags.contains(TelemetryFlags::MAG_CAL_ACTIVE));
    assert!(report(&outcomes[150]).frame.flags.contains(TelemetryFlags::MAG_CAL_ACTIVE));

    // Window closes 10 s later at tick 264 (15200 ms).
    let done = report(&outcomes[263]);
    assert_eq!(done.frame.timestamp_ms, 15_200);
    let offset = done.mag_offset_applied.expect("calibration finished");
    assert!(!done.frame.flags.contains(TelemetryFlags::MAG_CAL_ACTIVE));
    assert!((offset[0] - 12.0).abs() < 0.5, "x offset {}", offset[0]);
    assert!((offset[1] + 7.0).abs() < 0.5, "y offset {}", offset[1]);
    assert_eq!(node.sensor().mag_offset(), offset);

    // Releasing after the long hold is not a tap.
    assert_eq!(node.recenter_state().yaw_offset_deg, 0.0);
    assert!(!report(&outcomes[299]).frame.flags.contains(TelemetryFlags::IMU_ONLY_MODE));
}

#[test]
fn test_stalled_clock_uses_nominal_dt() {
    let imu = SimulatedImu::new(SensorKind::Mpu6050, 0.05).with_motion(80.0, 0.5);
    let mut node = start(NodeConfig::default(), imu, Pins::new(SharedOutput::new()));
    node.run_ticks(1);
    let q_before = node.fusion().quaternion();
    // A 5 s stall must not integrate 5 s worth of rotation in one step.
    let clock = node.clock().clone();
    clock.advance(Duration::from_secs(5));
    node.tick();
    let q_after = node.fusion().quaternion();
    let dot: f32 = q_before.iter().zip(q_after.iter()).map(|(a, b)| a * b).sum();
    // Rotation under 10 degrees between the two.
    assert!(dot.abs() > (5.0f32).to_radians().cos());
}

#[test]
fn test_repeated_timestamp_uses_nominal_dt() {
    let imu = SimulatedImu::new(SensorKind::Mpu6050, 0.05).with_motion(80.0, 0.5);
    let config = NodeConfig::default();
    let beta = config.beta;
    let mut node = start(config, imu, Pins::new(SharedOutput::new()));
    node.run_ticks(1);

    // Replay the next sample through a standalone filter with one nominal step.
    let q_before = node.fusion().quaternion();
    let sample = node.sensor().clone().read_sample().unwrap();
    let mut expected = FusionEngine::from_quaternion(beta, q_before);
    expected.update_imu_only(0.05, sample.gyro_rad_s(), sample.accel_g);

    // Clock has not moved since the last tick.
    assert!(matches!(node.tick(), TickOutcome::Completed(_)));
    let q_after = node.fusion().quaternion();
    for (a, e) in q_after.iter().zip(expected.quaternion().iter()) {
        assert!((a - e).abs() < 1e-5, "q {:?} vs {:?}", q_after, expected.quaternion());
    }
    let dot: f32 = q_before.iter().zip(q_after.iter()).map(|(a, b)| a * b).sum();
    assert!(dot < 0.99999, "filter did not advance");
}
