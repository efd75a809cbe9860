use crate::error::FrameError;
use crate::types::{Attitude, TelemetryFlags};

// -- Frame header --
pub const MAGIC: [u8; 2] = [0x46, 0x44];
pub const TELEMETRY_VERSION: u8 = 0x02;
pub const ALERT_VERSION: u8 = 0x01;
pub const MSG_TELEMETRY: u8 = 0x01;
pub const MSG_ALERT: u8 = 0x02;

// -- Frame geometry --
pub const TELEMETRY_FRAME_SIZE: usize = 45;
pub const ALERT_FRAME_SIZE: usize = 11;
const CRC_SIZE: usize = 2;

// -- CRC16-CCITT (FALSE variant) --
pub const CRC16_POLY: u16 = 0x1021;
pub const CRC16_INIT: u16 = 0xFFFF;

/// CRC16-CCITT, MSB-first, polynomial 0x1021, initial value 0xFFFF, no final XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Wrap an angle into (-180, 180].
///
/// Uses a floating modulo so arbitrarily large finite inputs terminate.
pub fn wrap_deg(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Degrees to wire centidegrees: round to nearest, saturate to i16. NaN maps to 0.
pub fn deg_to_centideg(deg: f32) -> i16 {
    let v = (deg * 100.0).round();
    if v.is_nan() {
        return 0;
    }
    v.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn centideg_to_deg(cd: i16) -> f32 {
    f32::from(cd) / 100.0
}

/// Orientation telemetry sent by the node at the loop rate.
///
/// Angles are carried in centidegrees exactly as on the wire. Position and
/// GPS fields exist for receivers but the node always leaves them zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub player_id: u8,
    pub seq: u16,
    pub timestamp_ms: u32,
    pub yaw_cd: i16,
    pub pitch_cd: i16,
    pub roll_cd: i16,
    /// Confidence score 0..=100.
    pub quality: u8,
    pub pos_x_cm: i32,
    pub pos_y_cm: i32,
    pub pos_quality: u8,
    pub battery_mv: u16,
    pub flags: TelemetryFlags,
    pub gps_lat_e7: i32,
    pub gps_lon_e7: i32,
    pub gps_alt_cm: i32,
    pub gps_quality: u8,
}

impl TelemetryFrame {
    /// Set the three angle fields from degrees.
    pub fn with_attitude(mut self, attitude: Attitude) -> Self {
        self.yaw_cd = deg_to_centideg(attitude.yaw_deg);
        self.pitch_cd = deg_to_centideg(attitude.pitch_deg);
        self.roll_cd = deg_to_centideg(attitude.roll_deg);
        self
    }

    pub fn attitude(&self) -> Attitude {
        Attitude {
            yaw_deg: centideg_to_deg(self.yaw_cd),
            pitch_deg: centideg_to_deg(self.pitch_cd),
            roll_deg: centideg_to_deg(self.roll_cd),
        }
    }
}

/// Haptic alert command received from the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertFrame {
    pub player_id: u8,
    pub alert_on: bool,
    pub intensity: u8,
    pub hold_ms: u16,
}

/// Little-endian cursor over a caller-provided output buffer.
///
/// Callers check capacity up front, so the writes never go out of bounds.
struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    /// Append the CRC of everything written so far and return the frame length.
    fn finish(mut self) -> usize {
        let crc = crc16_ccitt(&self.buf[..self.pos]);
        self.u16(crc);
        self.pos
    }
}

/// Little-endian cursor over a length-checked input frame.
struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }
}

/// Validate length, header and CRC shared by both frame types.
fn check_frame(data: &[u8], size: usize, version: u8, msg_type: u8) -> Result<(), FrameError> {
    if data.len() != size {
        return Err(FrameError::Length {
            expected: size,
            actual: data.len(),
        });
    }
    if data[0] != MAGIC[0] || data[1] != MAGIC[1] {
        return Err(FrameError::Magic(data[0], data[1]));
    }
    if data[2] != version {
        return Err(FrameError::Version(data[2]));
    }
    if data[3] != msg_type {
        return Err(FrameError::MessageType(data[3]));
    }
    let body = size - CRC_SIZE;
    let received = u16::from_le_bytes([data[body], data[body + 1]]);
    let computed = crc16_ccitt(&data[..body]);
    if received != computed {
        return Err(FrameError::Crc { received, computed });
    }
    Ok(())
}

/// Serialize a telemetry frame into `out`.
///
/// Layout (45 bytes, little-endian):
/// - `[0..2]`: magic `0x46 0x44`
/// - `[2]`: version 2, `[3]`: type 1, `[4]`: player id
/// - `[5..7]`: seq u16, `[7..11]`: timestamp_ms u32
/// - `[11..17]`: yaw, pitch, roll as i16 centidegrees
/// - `[17]`: quality
/// - `[18..26]`: pos_x_cm, pos_y_cm i32, `[26]`: pos_quality
/// - `[27..29]`: battery_mv u16, `[29]`: flags
/// - `[30..42]`: gps lat/lon e7 and alt cm as i32, `[42]`: gps quality
/// - `[43..45]`: CRC16-CCITT over bytes `[0..43]`
///
/// Returns the number of bytes written, or 0 if `out` is too small.
pub fn pack_telemetry(out: &mut [u8], frame: &TelemetryFrame) -> usize {
    if out.len() < TELEMETRY_FRAME_SIZE {
        return 0;
    }
    let mut w = FrameWriter::new(out);
    w.put(&MAGIC);
    w.u8(TELEMETRY_VERSION);
    w.u8(MSG_TELEMETRY);
    w.u8(frame.player_id);
    w.u16(frame.seq);
    w.u32(frame.timestamp_ms);
    w.i16(frame.yaw_cd);
    w.i16(frame.pitch_cd);
    w.i16(frame.roll_cd);
    w.u8(frame.quality);
    w.i32(frame.pos_x_cm);
    w.i32(frame.pos_y_cm);
    w.u8(frame.pos_quality);
    w.u16(frame.battery_mv);
    w.u8(frame.flags.bits());
    w.i32(frame.gps_lat_e7);
    w.i32(frame.gps_lon_e7);
    w.i32(frame.gps_alt_cm);
    w.u8(frame.gps_quality);
    w.finish()
}

/// Parse a 45-byte telemetry frame.
pub fn unpack_telemetry(data: &[u8]) -> Result<TelemetryFrame, FrameError> {
    check_frame(data, TELEMETRY_FRAME_SIZE, TELEMETRY_VERSION, MSG_TELEMETRY)?;
    let mut r = FrameReader::new(data, 4);
    Ok(TelemetryFrame {
        player_id: r.u8(),
        seq: r.u16(),
        timestamp_ms: r.u32(),
        yaw_cd: r.i16(),
        pitch_cd: r.i16(),
        roll_cd: r.i16(),
        quality: r.u8(),
        pos_x_cm: r.i32(),
        pos_y_cm: r.i32(),
        pos_quality: r.u8(),
        battery_mv: r.u16(),
        flags: TelemetryFlags::from_bits_retain(r.u8()),
        gps_lat_e7: r.i32(),
        gps_lon_e7: r.i32(),
        gps_alt_cm: r.i32(),
        gps_quality: r.u8(),
    })
}

/// Serialize an alert frame into `out`.
///
/// Layout (11 bytes): magic(2), version 1, type 2, player id, alert_on,
/// intensity, hold_ms u16 LE, CRC16 LE.
///
/// Returns the number of bytes written, or 0 if `out` is too small.
pub fn pack_alert(out: &mut [u8], frame: &AlertFrame) -> usize {
    if out.len() < ALERT_FRAME_SIZE {
        return 0;
    }
    let mut w = FrameWriter::new(out);
    w.put(&MAGIC);
    w.u8(ALERT_VERSION);
    w.u8(MSG_ALERT);
    w.u8(frame.player_id);
    w.u8(u8::from(frame.alert_on));
    w.u8(frame.intensity);
    w.u16(frame.hold_ms);
    w.finish()
}

/// Parse an 11-byte alert frame. Any non-zero `alert_on` byte counts as on.
pub fn unpack_alert(data: &[u8]) -> Result<AlertFrame, FrameError> {
    check_frame(data, ALERT_FRAME_SIZE, ALERT_VERSION, MSG_ALERT)?;
    let mut r = FrameReader::new(data, 4);
    Ok(AlertFrame {
        player_id: r.u8(),
        alert_on: r.u8() != 0,
        intensity: r.u8(),
        hold_ms: r.u16(),
    })
}

/// Message type byte of a datagram, if it carries the FD magic.
pub fn peek_message_type(data: &[u8]) -> Option<u8> {
    match data {
        [m0, m1, _, msg_type, ..] if [*m0, *m1] == MAGIC => Some(*msg_type),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_telemetry() -> TelemetryFrame {
        TelemetryFrame {
            player_id: 2,
            seq: 345,
            timestamp_ms: 123_456_789,
            quality: 88,
            battery_mv: 3720,
            flags: TelemetryFlags::IMU_ONLY_MODE | TelemetryFlags::AUTO_RECENTER_DONE,
            ..Default::default()
        }
        .with_attitude(Attitude {
            yaw_deg: 12.34,
            pitch_deg: -5.67,
            roll_deg: 1.25,
        })
    }

    #[test]
    fn test_crc16_check_value() {
        // Standard CRC-16/CCITT-FALSE check value.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
        assert_eq!(crc16_ccitt(&[]), 0xFFFF);
    }

    #[test]
    fn test_deg_to_centideg() {
        assert_eq!(deg_to_centideg(1000.0), 32767);
        assert_eq!(deg_to_centideg(-1000.0), -32768);
        assert_eq!(deg_to_centideg(1.23), 123);
        assert_eq!(deg_to_centideg(-0.004), 0);
        assert_eq!(deg_to_centideg(-45.0), -4500);
        assert_eq!(deg_to_centideg(f32::NAN), 0);
    }

    #[test]
    fn test_wrap_deg() {
        assert!((wrap_deg(190.0) - (-170.0)).abs() < 1e-4);
        assert!((wrap_deg(-190.0) - 170.0).abs() < 1e-4);
        assert!((wrap_deg(180.0) - 180.0).abs() < 1e-6);
        assert!((wrap_deg(-180.0) - 180.0).abs() < 1e-6);
        assert!((wrap_deg(720.0 + 45.0) - 45.0).abs() < 1e-4);
        assert!(wrap_deg(1.0e30).abs() <= 180.0);
    }

    #[test]
    fn test_pack_telemetry_reference_frame() {
        let frame = TelemetryFrame {
            player_id: 1,
            seq: 5,
            timestamp_ms: 1000,
            quality: 90,
            battery_mv: 3700,
            ..Default::default()
        }
        .with_attitude(Attitude {
            yaw_deg: 45.0,
            pitch_deg: 0.0,
            roll_deg: 0.0,
        });

        let mut buf = [0u8; 64];
        let n = pack_telemetry(&mut buf, &frame);
        assert_eq!(n, TELEMETRY_FRAME_SIZE);
        assert_eq!(&buf[..5], &[0x46, 0x44, 0x02, 0x01, 0x01]);
        assert_eq!(&buf[5..7], &[0x05, 0x00]);
        assert_eq!(&buf[7..11], &1000u32.to_le_bytes());
        assert_eq!(&buf[11..13], &4500i16.to_le_bytes());
        assert_eq!(buf[17], 90);
        assert_eq!(&buf[27..29], &3700u16.to_le_bytes());
        let crc = crc16_ccitt(&buf[..43]);
        assert_eq!(&buf[43..45], &crc.to_le_bytes());
    }

    #[test]
    fn test_pack_rejects_small_buffer() {
        let mut small = [0u8; TELEMETRY_FRAME_SIZE - 1];
        assert_eq!(pack_telemetry(&mut small, &sample_telemetry()), 0);
        assert!(small.iter().all(|&b| b == 0));

        let mut small = [0u8; ALERT_FRAME_SIZE - 1];
        assert_eq!(pack_alert(&mut small, &AlertFrame::default()), 0);
    }

    #[test]
    fn test_telemetry_roundtrip() {
        let src = sample_telemetry();
        let mut buf = [0u8; TELEMETRY_FRAME_SIZE];
        assert_eq!(pack_telemetry(&mut buf, &src), TELEMETRY_FRAME_SIZE);
        let decoded = unpack_telemetry(&buf).unwrap();
        assert_eq!(decoded, src);
        assert!((decoded.attitude().pitch_deg - (-5.67)).abs() < 0.01);
    }

    #[test]
    fn test_telemetry_crc_rejects_tamper() {
        let mut buf = [0u8; TELEMETRY_FRAME_SIZE];
        pack_telemetry(&mut buf, &sample_telemetry());
        buf[10] ^= 0xFF;
        assert!(matches!(unpack_telemetry(&buf), Err(FrameError::Crc { .. })));
    }

    #[test]
    fn test_alert_roundtrip() {
        let src = AlertFrame {
            player_id: 3,
            alert_on: true,
            intensity: 200,
            hold_ms: 1500,
        };
        let mut buf = [0u8; 16];
        assert_eq!(pack_alert(&mut buf, &src), ALERT_FRAME_SIZE);
        assert_eq!(&buf[..4], &[0x46, 0x44, 0x01, 0x02]);
        assert_eq!(unpack_alert(&buf[..ALERT_FRAME_SIZE]).unwrap(), src);
    }

    #[test]
    fn test_alert_rejects_header_mismatch() {
        let mut buf = [0u8; ALERT_FRAME_SIZE];
        pack_alert(&mut buf, &AlertFrame::default());

        let mut bad = buf;
        bad[0] = 0x00;
        assert_eq!(unpack_alert(&bad), Err(FrameError::Magic(0x00, 0x44)));

        let mut bad = buf;
        bad[2] = TELEMETRY_VERSION;
        assert_eq!(unpack_alert(&bad), Err(FrameError::Version(2)));

        let mut bad = buf;
        bad[3] = MSG_TELEMETRY;
        assert_eq!(unpack_alert(&bad), Err(FrameError::MessageType(1)));

        assert_eq!(
            unpack_alert(&buf[..ALERT_FRAME_SIZE - 1]),
            Err(FrameError::Length {
                expected: ALERT_FRAME_SIZE,
                actual: ALERT_FRAME_SIZE - 1
            })
        );
    }

    #[test]
    fn test_alert_nonzero_on_byte_is_on() {
        let mut buf = [0x46, 0x44, 0x01, 0x02, 0x01, 0x07, 0x10, 0xE8, 0x03, 0, 0];
        let crc = crc16_ccitt(&buf[..9]);
        buf[9..].copy_from_slice(&crc.to_le_bytes());
        let alert = unpack_alert(&buf).unwrap();
        assert!(alert.alert_on);
        assert_eq!(alert.hold_ms, 1000);
    }

    #[test]
    fn test_peek_message_type() {
        let mut buf = [0u8; ALERT_FRAME_SIZE];
        pack_alert(&mut buf, &AlertFrame::default());
        assert_eq!(peek_message_type(&buf), Some(MSG_ALERT));
        assert_eq!(peek_message_type(&[0x46, 0x44, 0x01]), None);
        assert_eq!(peek_message_type(b"XXXX"), None);
    }
}
