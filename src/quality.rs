//! Heuristic 0..=100 confidence score for one sample.

use crate::types::{norm3, Sample};

/// Expected local geomagnetic field strength in µT.
pub const DEFAULT_MAG_EXPECTED_UT: f32 = 50.0;

/// `100 - min(100, error * gain)`.
fn penalty_score(error: f32, gain: f32) -> f32 {
    100.0 - (error * gain).min(100.0)
}

/// Clamp to [0, 100] and round half up.
fn finish(score: f32) -> u8 {
    (score.clamp(0.0, 100.0) + 0.5) as u8
}

/// Scoring variant, chosen once from the sensor capabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityScorer {
    /// Field-strength consistency dominates.
    WithMagnetometer { mag_expected_ut: f32 },
    /// Tilt reference consistency dominates; yaw rate is penalized on its own
    /// because heading is dead-reckoned.
    ImuOnly,
}

impl QualityScorer {
    pub fn for_capability(has_magnetometer: bool, mag_expected_ut: f32) -> Self {
        if has_magnetometer {
            QualityScorer::WithMagnetometer { mag_expected_ut }
        } else {
            QualityScorer::ImuOnly
        }
    }

    pub fn score(&self, s: &Sample) -> u8 {
        match *self {
            QualityScorer::WithMagnetometer { mag_expected_ut } => score_with_mag(s, mag_expected_ut),
            QualityScorer::ImuOnly => score_imu_only(s),
        }
    }
}

pub fn score_with_mag(s: &Sample, mag_expected_ut: f32) -> u8 {
    let mag_err = (norm3(s.mag_ut) - mag_expected_ut).abs();
    let mag_score = penalty_score(mag_err / mag_expected_ut, 120.0);

    let gyro_score = penalty_score(norm3(s.gyro_dps), 3.0);

    let accel_err = (norm3(s.accel_g) - 1.0).abs();
    let accel_score = penalty_score(accel_err, 200.0);

    finish(0.45 * mag_score + 0.20 * gyro_score + 0.35 * accel_score)
}

pub fn score_imu_only(s: &Sample) -> u8 {
    let accel_err = (norm3(s.accel_g) - 1.0).abs();
    let accel_score = penalty_score(accel_err, 220.0);

    let gyro_score = penalty_score(norm3(s.gyro_dps), 2.5);

    let yaw_rate_score = penalty_score(s.gyro_dps[2].abs(), 2.0);

    finish(0.45 * accel_score + 0.35 * gyro_score + 0.20 * yaw_rate_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still(mag_ut: [f32; 3]) -> Sample {
        Sample {
            accel_g: [0.0, 0.0, 1.0],
            gyro_dps: [0.0; 3],
            mag_ut,
        }
    }

    #[test]
    fn test_ideal_sample_scores_100() {
        assert_eq!(score_with_mag(&still([30.0, 0.0, 40.0]), 50.0), 100);
        assert_eq!(score_imu_only(&still([0.0; 3])), 100);
    }

    #[test]
    fn test_missing_field_loses_mag_weight() {
        // Zero field: mag score 0, everything else perfect.
        assert_eq!(score_with_mag(&still([0.0; 3]), 50.0), 55);
    }

    #[test]
    fn test_imu_only_yaw_rate_penalty() {
        let s = Sample {
            accel_g: [0.0, 0.0, 1.0],
            gyro_dps: [0.0, 0.0, 10.0],
            mag_ut: [0.0; 3],
        };
        // gyro: 100 - 25 = 75, yaw: 100 - 20 = 80 -> 45 + 26.25 + 16 = 87.25
        assert_eq!(score_imu_only(&s), 87);
    }

    #[test]
    fn test_violent_motion_scores_zero() {
        let s = Sample {
            accel_g: [3.0, 0.0, 0.0],
            gyro_dps: [500.0, 0.0, 500.0],
            mag_ut: [400.0, 0.0, 0.0],
        };
        assert_eq!(score_with_mag(&s, 50.0), 0);
        assert_eq!(score_imu_only(&s), 0);
    }

    #[test]
    fn test_variant_selection() {
        assert_eq!(QualityScorer::for_capability(false, 50.0), QualityScorer::ImuOnly);
        let scorer = QualityScorer::for_capability(true, 50.0);
        assert_eq!(scorer.score(&still([0.0, 50.0, 0.0])), 100);
    }
}
