//! Gradient-descent quaternion attitude filter (Madgwick).
//!
//! Two update paths share one state: the magnetometer-aided update corrects
//! heading as well as tilt, the IMU-only update corrects tilt and lets yaw
//! dead-reckon on the gyro. Degenerate inputs leave the state untouched.

use crate::types::Attitude;

/// Default filter gain used by the node.
pub const DEFAULT_BETA: f32 = 0.08;

/// 1/sqrt(x), or 0 for non-positive input so callers can test for degeneracy.
fn inv_sqrt(x: f32) -> f32 {
    if x <= 0.0 {
        return 0.0;
    }
    1.0 / x.sqrt()
}

/// Unit quaternion `[q0, q1, q2, q3]` (scalar first) plus filter gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationState {
    pub q: [f32; 4],
    /// Gradient step gain. Larger converges faster, smaller rejects more noise.
    pub beta: f32,
}

#[derive(Debug, Clone)]
pub struct FusionEngine {
    state: OrientationState,
}

impl FusionEngine {
    /// Identity orientation with the given gain.
    pub fn new(beta: f32) -> Self {
        Self {
            state: OrientationState {
                q: [1.0, 0.0, 0.0, 0.0],
                beta,
            },
        }
    }

    /// Start from an arbitrary orientation. The quaternion is normalized;
    /// a zero quaternion falls back to identity.
    pub fn from_quaternion(beta: f32, q: [f32; 4]) -> Self {
        let mut engine = Self::new(beta);
        let norm = inv_sqrt(q.iter().map(|c| c * c).sum());
        if norm != 0.0 {
            engine.state.q = q.map(|c| c * norm);
        }
        engine
    }

    pub fn state(&self) -> OrientationState {
        self.state
    }

    pub fn quaternion(&self) -> [f32; 4] {
        self.state.q
    }

    /// Magnetometer-aided update.
    ///
    /// No-op when `dt_s <= 0` or when either the accelerometer or the
    /// magnetometer vector has zero norm.
    pub fn update_with_mag(&mut self, dt_s: f32, gyro_rad_s: [f32; 3], accel_g: [f32; 3], mag_ut: [f32; 3]) {
        if !(dt_s > 0.0) {
            return;
        }
        let [gx, gy, gz] = gyro_rad_s;
        let [q1, q2, q3, q4] = self.state.q;

        let norm = inv_sqrt(accel_g[0] * accel_g[0] + accel_g[1] * accel_g[1] + accel_g[2] * accel_g[2]);
        if norm == 0.0 {
            return;
        }
        let [ax, ay, az] = accel_g.map(|v| v * norm);

        let norm = inv_sqrt(mag_ut[0] * mag_ut[0] + mag_ut[1] * mag_ut[1] + mag_ut[2] * mag_ut[2]);
        if norm == 0.0 {
            return;
        }
        let [mx, my, mz] = mag_ut.map(|v| v * norm);

        let _2q1mx = 2.0 * q1 * mx;
        let _2q1my = 2.0 * q1 * my;
        let _2q1mz = 2.0 * q1 * mz;
        let _2q2mx = 2.0 * q2 * mx;
        let _2q1 = 2.0 * q1;
        let _2q2 = 2.0 * q2;
        let _2q3 = 2.0 * q3;
        let _2q4 = 2.0 * q4;
        let _2q1q3 = 2.0 * q1 * q3;
        let _2q3q4 = 2.0 * q3 * q4;
        let q1q1 = q1 * q1;
        let q1q2 = q1 * q2;
        let q1q3 = q1 * q3;
        let q1q4 = q1 * q4;
        let q2q2 = q2 * q2;
        let q2q3 = q2 * q3;
        let q2q4 = q2 * q4;
        let q3q3 = q3 * q3;
        let q3q4 = q3 * q4;
        let q4q4 = q4 * q4;

        // Earth field reference: measured field rotated into the earth frame,
        // horizontal component collapsed onto x.
        let hx = mx * q1q1 - _2q1my * q4 + _2q1mz * q3 + mx * q2q2 + _2q2 * my * q3 + _2q2 * mz * q4
            - mx * q3q3
            - mx * q4q4;
        let hy = _2q1mx * q4 + my * q1q1 - _2q1mz * q2 + _2q2mx * q3 - my * q2q2 + my * q3q3 + _2q3 * mz * q4
            - my * q4q4;
        let _2bx = (hx * hx + hy * hy).sqrt();
        let _2bz = -_2q1mx * q3 + _2q1my * q2 + mz * q1q1 + _2q2mx * q4 - mz * q2q2 + _2q3 * my * q4 - mz * q3q3
            + mz * q4q4;
        let _4bx = 2.0 * _2bx;
        let _4bz = 2.0 * _2bz;

        // Objective function residuals.
        let fa_x = 2.0 * q2q4 - _2q1q3 - ax;
        let fa_y = 2.0 * q1q2 + _2q3q4 - ay;
        let fa_z = 1.0 - 2.0 * q2q2 - 2.0 * q3q3 - az;
        let fm_x = _2bx * (0.5 - q3q3 - q4q4) + _2bz * (q2q4 - q1q3) - mx;
        let fm_y = _2bx * (q2q3 - q1q4) + _2bz * (q1q2 + q3q4) - my;
        let fm_z = _2bx * (q1q3 + q2q4) + _2bz * (0.5 - q2q2 - q3q3) - mz;

        // Jacobian-transpose times residual.
        let s1 = -_2q3 * fa_x + _2q2 * fa_y - _2bz * q3 * fm_x + (-_2bx * q4 + _2bz * q2) * fm_y + _2bx * q3 * fm_z;
        let s2 = _2q4 * fa_x + _2q1 * fa_y - 4.0 * q2 * fa_z
            + _2bz * q4 * fm_x
            + (_2bx * q3 + _2bz * q1) * fm_y
            + (_2bx * q4 - _4bz * q2) * fm_z;
        let s3 = -_2q1 * fa_x + _2q4 * fa_y - 4.0 * q3 * fa_z
            + (-_4bx * q3 - _2bz * q1) * fm_x
            + (_2bx * q2 + _2bz * q4) * fm_y
            + (_2bx * q1 - _4bz * q3) * fm_z;
        let s4 = _2q2 * fa_x + _2q3 * fa_y
            + (-_4bx * q4 + _2bz * q2) * fm_x
            + (-_2bx * q1 + _2bz * q3) * fm_y
            + _2bx * q2 * fm_z;

        let step = normalize_gradient([s1, s2, s3, s4]);
        let beta = self.state.beta;
        let q_dot = gyro_rate(self.state.q, gx, gy, gz);
        let q_dot = [
            q_dot[0] - beta * step[0],
            q_dot[1] - beta * step[1],
            q_dot[2] - beta * step[2],
            q_dot[3] - beta * step[3],
        ];
        self.integrate(q_dot, dt_s);
    }

    /// Accelerometer + gyro update.
    ///
    /// No-op when `dt_s <= 0`. An all-zero accelerometer vector skips the
    /// correction step and integrates the gyro alone for this tick.
    pub fn update_imu_only(&mut self, dt_s: f32, gyro_rad_s: [f32; 3], accel_g: [f32; 3]) {
        if !(dt_s > 0.0) {
            return;
        }
        let [gx, gy, gz] = gyro_rad_s;
        let [q0, q1, q2, q3] = self.state.q;
        let mut q_dot = gyro_rate(self.state.q, gx, gy, gz);

        if accel_g != [0.0, 0.0, 0.0] {
            let norm = inv_sqrt(accel_g[0] * accel_g[0] + accel_g[1] * accel_g[1] + accel_g[2] * accel_g[2]);
            if norm == 0.0 {
                return;
            }
            let [ax, ay, az] = accel_g.map(|v| v * norm);

            let _2q0 = 2.0 * q0;
            let _2q1 = 2.0 * q1;
            let _2q2 = 2.0 * q2;
            let _2q3 = 2.0 * q3;
            let _4q0 = 4.0 * q0;
            let _4q1 = 4.0 * q1;
            let _4q2 = 4.0 * q2;
            let _8q1 = 8.0 * q1;
            let _8q2 = 8.0 * q2;
            let q0q0 = q0 * q0;
            let q1q1 = q1 * q1;
            let q2q2 = q2 * q2;
            let q3q3 = q3 * q3;

            let s0 = _4q0 * q2q2 + _2q2 * ax + _4q0 * q1q1 - _2q1 * ay;
            let s1 = _4q1 * q3q3 - _2q3 * ax + 4.0 * q0q0 * q1 - _2q0 * ay - _4q1 + _8q1 * q1q1 + _8q1 * q2q2
                + _4q1 * az;
            let s2 = 4.0 * q0q0 * q2 + _2q0 * ax + _4q2 * q3q3 - _2q3 * ay - _4q2 + _8q2 * q1q1 + _8q2 * q2q2
                + _4q2 * az;
            let s3 = 4.0 * q1q1 * q3 - _2q1 * ax + 4.0 * q2q2 * q3 - _2q2 * ay;

            let step = normalize_gradient([s0, s1, s2, s3]);
            let beta = self.state.beta;
            for (d, s) in q_dot.iter_mut().zip(step) {
                *d -= beta * s;
            }
        }

        self.integrate(q_dot, dt_s);
    }

    /// Forward-Euler step followed by renormalization.
    fn integrate(&mut self, q_dot: [f32; 4], dt_s: f32) {
        let mut q = self.state.q;
        for (c, d) in q.iter_mut().zip(q_dot) {
            *c += d * dt_s;
        }
        let norm = inv_sqrt(q.iter().map(|c| c * c).sum());
        if norm == 0.0 {
            return;
        }
        self.state.q = q.map(|c| c * norm);
    }

    /// Yaw, pitch, roll in degrees (ZYX).
    ///
    /// The pitch `asin` argument is not clamped, so numerical drift past ±1
    /// yields NaN; the wire encoder maps that to zero.
    pub fn euler_deg(&self) -> Attitude {
        let [q0, q1, q2, q3] = self.state.q;
        let yaw = (2.0 * (q0 * q3 + q1 * q2)).atan2(1.0 - 2.0 * (q2 * q2 + q3 * q3));
        let pitch = (2.0 * (q0 * q2 - q3 * q1)).asin();
        let roll = (2.0 * (q0 * q1 + q2 * q3)).atan2(1.0 - 2.0 * (q1 * q1 + q2 * q2));
        Attitude {
            yaw_deg: yaw.to_degrees(),
            pitch_deg: pitch.to_degrees(),
            roll_deg: roll.to_degrees(),
        }
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BETA)
    }
}

/// Quaternion derivative from body rates: 0.5 * q ⊗ (0, ω).
fn gyro_rate(q: [f32; 4], gx: f32, gy: f32, gz: f32) -> [f32; 4] {
    let [q0, q1, q2, q3] = q;
    [
        0.5 * (-q1 * gx - q2 * gy - q3 * gz),
        0.5 * (q0 * gx + q2 * gz - q3 * gy),
        0.5 * (q0 * gy - q1 * gz + q3 * gx),
        0.5 * (q0 * gz + q1 * gy - q2 * gx),
    ]
}

/// Unit gradient direction. A zero gradient is returned as-is.
fn normalize_gradient(s: [f32; 4]) -> [f32; 4] {
    let norm = inv_sqrt(s.iter().map(|c| c * c).sum());
    if norm == 0.0 {
        return s;
    }
    s.map(|c| c * norm)
}
