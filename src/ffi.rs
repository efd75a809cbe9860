//! C FFI layer over the wire codec.
//!
//! Lets C receivers and test rigs share the exact frame layouts and CRC.
//! The generated C header is written to `include/fdw_node.h` by cbindgen.

use crate::error::{FrameError, LastError};
use crate::protocol::{self, AlertFrame, TelemetryFrame};
use crate::types::TelemetryFlags;
use std::ffi::c_char;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Telemetry frame in C-compatible layout. Angles in centidegrees.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FdwTelemetry {
    pub player_id: u8,
    pub seq: u16,
    pub timestamp_ms: u32,
    pub yaw_cd: i16,
    pub pitch_cd: i16,
    pub roll_cd: i16,
    pub quality: u8,
    pub pos_x_cm: i32,
    pub pos_y_cm: i32,
    pub pos_quality: u8,
    pub battery_mv: u16,
    /// Bit 0: IMU-only, bit 1: auto-recenter done, bit 2: mag calibration active.
    pub flags: u8,
    pub gps_lat_e7: i32,
    pub gps_lon_e7: i32,
    pub gps_alt_cm: i32,
    pub gps_quality: u8,
}

impl From<&FdwTelemetry> for TelemetryFrame {
    fn from(t: &FdwTelemetry) -> Self {
        TelemetryFrame {
            player_id: t.player_id,
            seq: t.seq,
            timestamp_ms: t.timestamp_ms,
            yaw_cd: t.yaw_cd,
            pitch_cd: t.pitch_cd,
            roll_cd: t.roll_cd,
            quality: t.quality,
            pos_x_cm: t.pos_x_cm,
            pos_y_cm: t.pos_y_cm,
            pos_quality: t.pos_quality,
            battery_mv: t.battery_mv,
            flags: TelemetryFlags::from_bits_retain(t.flags),
            gps_lat_e7: t.gps_lat_e7,
            gps_lon_e7: t.gps_lon_e7,
            gps_alt_cm: t.gps_alt_cm,
            gps_quality: t.gps_quality,
        }
    }
}

impl From<&TelemetryFrame> for FdwTelemetry {
    fn from(f: &TelemetryFrame) -> Self {
        FdwTelemetry {
            player_id: f.player_id,
            seq: f.seq,
            timestamp_ms: f.timestamp_ms,
            yaw_cd: f.yaw_cd,
            pitch_cd: f.pitch_cd,
            roll_cd: f.roll_cd,
            quality: f.quality,
            pos_x_cm: f.pos_x_cm,
            pos_y_cm: f.pos_y_cm,
            pos_quality: f.pos_quality,
            battery_mv: f.battery_mv,
            flags: f.flags.bits(),
            gps_lat_e7: f.gps_lat_e7,
            gps_lon_e7: f.gps_lon_e7,
            gps_alt_cm: f.gps_alt_cm,
            gps_quality: f.gps_quality,
        }
    }
}

/// Alert command in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FdwAlert {
    pub player_id: u8,
    /// 0 = off, anything else = on.
    pub alert_on: u8,
    pub intensity: u8,
    pub hold_ms: u16,
}

impl From<&FdwAlert> for AlertFrame {
    fn from(a: &FdwAlert) -> Self {
        AlertFrame {
            player_id: a.player_id,
            alert_on: a.alert_on != 0,
            intensity: a.intensity,
            hold_ms: a.hold_ms,
        }
    }
}

impl From<&AlertFrame> for FdwAlert {
    fn from(a: &AlertFrame) -> Self {
        FdwAlert {
            player_id: a.player_id,
            alert_on: a.alert_on as u8,
            intensity: a.intensity,
            hold_ms: a.hold_ms,
        }
    }
}

unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    }
}

unsafe fn byte_slice_mut<'a>(out: *mut u8, cap: usize) -> &'a mut [u8] {
    if out.is_null() || cap == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(out, cap)
    }
}

fn record_pack(written: usize, needed: usize, capacity: usize) -> usize {
    if written == 0 {
        LAST_ERROR.set(&FrameError::Capacity { needed, capacity });
    }
    written
}

/// CRC16-CCITT (poly 0x1021, init 0xFFFF) of `len` bytes.
///
/// # Safety
/// `data` must point to at least `len` readable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn fdw_crc16_ccitt(data: *const u8, len: usize) -> u16 {
    protocol::crc16_ccitt(byte_slice(data, len))
}

/// Pack a telemetry frame. Returns bytes written (45), or 0 if `cap` is too
/// small or an argument is null.
///
/// # Safety
/// `out` must point to `cap` writable bytes and `t` to a valid `FdwTelemetry`, or be null.
#[no_mangle]
pub unsafe extern "C" fn fdw_pack_telemetry(out: *mut u8, cap: usize, t: *const FdwTelemetry) -> usize {
    if t.is_null() {
        return 0;
    }
    let frame = TelemetryFrame::from(&*t);
    let written = protocol::pack_telemetry(byte_slice_mut(out, cap), &frame);
    record_pack(written, protocol::TELEMETRY_FRAME_SIZE, cap)
}

/// Decode a telemetry frame. Returns false and leaves `out` untouched on any
/// mismatch (check `fdw_last_error()`).
///
/// # Safety
/// `data` must point to `len` readable bytes and `out` to a writable `FdwTelemetry`, or be null.
#[no_mangle]
pub unsafe extern "C" fn fdw_unpack_telemetry(data: *const u8, len: usize, out: *mut FdwTelemetry) -> bool {
    if out.is_null() {
        return false;
    }
    match protocol::unpack_telemetry(byte_slice(data, len)) {
        Ok(frame) => {
            out.write(FdwTelemetry::from(&frame));
            LAST_ERROR.clear();
            true
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            false
        }
    }
}

/// Pack an alert frame. Returns bytes written (11), or 0 on failure.
///
/// # Safety
/// `out` must point to `cap` writable bytes and `a` to a valid `FdwAlert`, or be null.
#[no_mangle]
pub unsafe extern "C" fn fdw_pack_alert(out: *mut u8, cap: usize, a: *const FdwAlert) -> usize {
    if a.is_null() {
        return 0;
    }
    let frame = AlertFrame::from(&*a);
    let written = protocol::pack_alert(byte_slice_mut(out, cap), &frame);
    record_pack(written, protocol::ALERT_FRAME_SIZE, cap)
}

/// Decode an alert frame. Returns false on any mismatch.
///
/// # Safety
/// `data` must point to `len` readable bytes and `out` to a writable `FdwAlert`, or be null.
#[no_mangle]
pub unsafe extern "C" fn fdw_unpack_alert(data: *const u8, len: usize, out: *mut FdwAlert) -> bool {
    if out.is_null() {
        return false;
    }
    match protocol::unpack_alert(byte_slice(data, len)) {
        Ok(frame) => {
            out.write(FdwAlert::from(&frame));
            LAST_ERROR.clear();
            true
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            false
        }
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned string is valid until the next FFI call.
#[no_mangle]
pub extern "C" fn fdw_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}
