//! Reading quality scoring and anomaly detection.

use crate::entity::sensor::SensorStatus;
use crate::readings::analysis::RunningStats;
use time::{Duration, OffsetDateTime};

/// A sensor whose calibration is older than this loses quality points.
pub const CALIBRATION_MAX_AGE_DAYS: i64 = 365;
/// Anomaly detection needs at least this many previous readings.
pub const MIN_ANOMALY_SAMPLES: usize = 5;

const OUT_OF_RANGE_PENALTY: f64 = 0.5;
const FAULTY_PENALTY: f64 = 0.4;
const CALIBRATING_PENALTY: f64 = 0.2;
const STALE_CALIBRATION_PENALTY: f64 = 0.1;
const ANOMALY_PENALTY: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
pub struct QualityInputs {
    pub in_range: bool,
    pub sensor_status: SensorStatus,
    pub calibrated_at: Option<OffsetDateTime>,
    pub recorded_at: OffsetDateTime,
    pub is_anomaly: bool,
}

pub fn calibration_stale(calibrated_at: Option<OffsetDateTime>, at: OffsetDateTime) -> bool {
    match calibrated_at {
        Some(calibrated) => at - calibrated > Duration::days(CALIBRATION_MAX_AGE_DAYS),
        None => true,
    }
}

/// Score in `[0, 1]`, rounded to two decimals.
pub fn quality_score(inputs: &QualityInputs) -> f64 {
    let mut score = 1.0;
    if !inputs.in_range {
        score -= OUT_OF_RANGE_PENALTY;
    }
    match inputs.sensor_status {
        SensorStatus::Faulty => score -= FAULTY_PENALTY,
        SensorStatus::Calibrating => score -= CALIBRATING_PENALTY,
        SensorStatus::Active | SensorStatus::Inactive => {}
    }
    if calibration_stale(inputs.calibrated_at, inputs.recorded_at) {
        score -= STALE_CALIBRATION_PENALTY;
    }
    if inputs.is_anomaly {
        score -= ANOMALY_PENALTY;
    }
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Population mean and standard deviation in a single pass (Welford).
pub fn mean_stddev(values: &[f64]) -> Option<(f64, f64)> {
    let mut stats = RunningStats::default();
    values.iter().for_each(|x| stats.push(*x));
    stats.mean_stddev()
}

/// Whether `value` deviates from `history` by more than `zscore` standard deviations.
pub fn is_anomaly(history: &[f64], value: f64, zscore: f64) -> bool {
    if history.len() < MIN_ANOMALY_SAMPLES {
        return false;
    }
    match mean_stddev(history) {
        Some((mean, stddev)) if stddev > 0.0 => ((value - mean) / stddev).abs() > zscore,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-10-01 12:00 UTC);

    fn inputs() -> QualityInputs {
        QualityInputs {
            in_range: true,
            sensor_status: SensorStatus::Active,
            calibrated_at: Some(NOW - Duration::days(30)),
            recorded_at: NOW,
            is_anomaly: false,
        }
    }

    #[test]
    fn perfect_reading_scores_one() {
        assert_eq!(quality_score(&inputs()), 1.0);
    }

    #[test]
    fn penalties_accumulate() {
        let mut i = inputs();
        i.in_range = false;
        assert_eq!(quality_score(&i), 0.5);
        i.sensor_status = SensorStatus::Calibrating;
        assert_eq!(quality_score(&i), 0.3);
        i.calibrated_at = None;
        assert_eq!(quality_score(&i), 0.2);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let i = QualityInputs {
            in_range: false,
            sensor_status: SensorStatus::Faulty,
            calibrated_at: None,
            recorded_at: NOW,
            is_anomaly: true,
        };
        assert_eq!(quality_score(&i), 0.0);
    }

    #[test]
    fn stale_calibration() {
        assert!(calibration_stale(None, NOW));
        assert!(calibration_stale(Some(NOW - Duration::days(366)), NOW));
        assert!(!calibration_stale(Some(NOW - Duration::days(365)), NOW));
        let mut i = inputs();
        i.calibrated_at = Some(NOW - Duration::days(400));
        assert_eq!(quality_score(&i), 0.9);
    }

    #[test]
    fn welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (mean, stddev) = mean_stddev(&values).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((stddev - 2.0).abs() < 1e-12);
        assert_eq!(mean_stddev(&[]), None);
    }

    #[test]
    fn anomaly_detection() {
        let history = [20.0, 21.0, 19.0, 20.0, 20.5, 19.5];
        assert!(is_anomaly(&history, 35.0, 3.0));
        assert!(!is_anomaly(&history, 20.8, 3.0));
    }

    #[test]
    fn anomaly_requires_samples_and_spread() {
        assert!(!is_anomaly(&[20.0, 21.0, 19.0, 20.0], 99.0, 3.0));
        assert!(!is_anomaly(&[20.0; 10], 99.0, 3.0));
    }
}
