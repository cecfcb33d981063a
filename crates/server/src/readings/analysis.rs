//! Statistics, time bucketing and gap detection over stored readings.
//!
//! Everything here is computed incrementally so the service can feed rows
//! chunk by chunk and never hold a whole time range in memory.

use crate::entity::sensor_reading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime, Time};
use utoipa::ToSchema;

/// Population mean and standard deviation, updated one sample at a time (Welford).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_stddev(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| (self.mean, (self.m2 / self.count as f64).sqrt()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ReadingStatistics {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub anomaly_count: u64,
    pub mean_quality: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_recorded_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
pub struct StatisticsAccumulator {
    values: RunningStats,
    quality: RunningStats,
    min: Option<f64>,
    max: Option<f64>,
    anomaly_count: u64,
    first: Option<OffsetDateTime>,
    last: Option<OffsetDateTime>,
}

impl StatisticsAccumulator {
    pub fn push(&mut self, reading: &sensor_reading::Model) {
        self.values.push(reading.value);
        self.quality.push(reading.quality_score);
        self.min = Some(self.min.map_or(reading.value, |m| m.min(reading.value)));
        self.max = Some(self.max.map_or(reading.value, |m| m.max(reading.value)));
        if reading.is_anomaly {
            self.anomaly_count += 1;
        }
        self.first = Some(self.first.map_or(reading.recorded_at, |t| t.min(reading.recorded_at)));
        self.last = Some(self.last.map_or(reading.recorded_at, |t| t.max(reading.recorded_at)));
    }

    pub fn finish(self) -> ReadingStatistics {
        let (mean, stddev) = self.values.mean_stddev().unzip();
        ReadingStatistics {
            count: self.values.count(),
            min: self.min,
            max: self.max,
            mean,
            stddev,
            anomaly_count: self.anomaly_count,
            mean_quality: self
                .quality
                .mean_stddev()
                .map(|(m, _)| (m * 100.0).round() / 100.0),
            first_recorded_at: self.first,
            last_recorded_at: self.last,
        }
    }
}

pub fn statistics(readings: &[sensor_reading::Model]) -> ReadingStatistics {
    let mut acc = StatisticsAccumulator::default();
    readings.iter().for_each(|r| acc.push(r));
    acc.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Hour,
    Day,
}

/// Start of the UTC hour or day containing `ts`.
pub fn bucket_start(ts: OffsetDateTime, bucket: Bucket) -> OffsetDateTime {
    let ts = ts.to_offset(time::UtcOffset::UTC);
    let time = match bucket {
        Bucket::Hour => Time::from_hms(ts.hour(), 0, 0).unwrap_or(Time::MIDNIGHT),
        Bucket::Day => Time::MIDNIGHT,
    };
    ts.replace_time(time)
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AggregateRow {
    pub sensor_id: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub bucket_start: OffsetDateTime,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Per sensor and bucket running totals: `(count, min, max, sum)`.
#[derive(Debug)]
pub struct Aggregator {
    bucket: Bucket,
    groups: BTreeMap<(i32, OffsetDateTime), (u64, f64, f64, f64)>,
}

impl Aggregator {
    pub fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            groups: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, reading: &sensor_reading::Model) {
        let key = (reading.sensor_id, bucket_start(reading.recorded_at, self.bucket));
        let entry = self
            .groups
            .entry(key)
            .or_insert((0, f64::INFINITY, f64::NEG_INFINITY, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.min(reading.value);
        entry.2 = entry.2.max(reading.value);
        entry.3 += reading.value;
    }

    /// Number of rows [`Self::finish`] will produce.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows ordered by sensor then time.
    pub fn finish(self) -> Vec<AggregateRow> {
        self.groups
            .into_iter()
            .map(|((sensor_id, bucket_start), (count, min, max, sum))| AggregateRow {
                sensor_id,
                bucket_start,
                count,
                min,
                max,
                avg: sum / count as f64,
            })
            .collect()
    }
}

/// Group readings per sensor and bucket. Output is ordered by sensor then time.
pub fn aggregate(readings: &[sensor_reading::Model], bucket: Bucket) -> Vec<AggregateRow> {
    let mut acc = Aggregator::new(bucket);
    readings.iter().for_each(|r| acc.push(r));
    acc.finish()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Gap {
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GapReport {
    pub sensor_id: i32,
    /// Intervals longer than this are reported
    pub threshold_minutes: f64,
    pub gaps: Vec<Gap>,
}

fn minutes(d: Duration) -> f64 {
    d.as_seconds_f64() / 60.0
}

/// Statistics of the intervals between consecutive timestamps (sorted ascending).
#[derive(Debug, Default)]
pub struct IntervalStats {
    previous: Option<OffsetDateTime>,
    intervals: RunningStats,
}

impl IntervalStats {
    pub fn push(&mut self, ts: OffsetDateTime) {
        if let Some(previous) = self.previous.replace(ts) {
            self.intervals.push(minutes(ts - previous));
        }
    }

    /// Mean interval plus three standard deviations, or 0 without intervals.
    pub fn threshold(&self) -> f64 {
        self.intervals
            .mean_stddev()
            .map(|(mean, stddev)| mean + 3.0 * stddev)
            .unwrap_or(0.0)
    }
}

/// Collects intervals longer than a fixed threshold.
#[derive(Debug)]
pub struct GapScanner {
    threshold: f64,
    previous: Option<OffsetDateTime>,
    gaps: Vec<Gap>,
}

impl GapScanner {
    pub fn new(threshold_minutes: f64) -> Self {
        Self {
            threshold: threshold_minutes,
            previous: None,
            gaps: Vec::new(),
        }
    }

    pub fn push(&mut self, ts: OffsetDateTime) {
        if let Some(previous) = self.previous.replace(ts) {
            let interval = minutes(ts - previous);
            if interval > self.threshold {
                self.gaps.push(Gap {
                    from: previous,
                    to: ts,
                    duration_minutes: interval,
                });
            }
        }
    }

    pub fn finish(self) -> (f64, Vec<Gap>) {
        (self.threshold, self.gaps)
    }
}

/// Find gaps between consecutive timestamps (sorted ascending).
///
/// Without an explicit `min_gap_minutes` the threshold is the mean interval
/// plus three standard deviations. Returns the threshold used and the gaps.
pub fn detect_gaps(
    timestamps: &[OffsetDateTime],
    min_gap_minutes: Option<f64>,
) -> (f64, Vec<Gap>) {
    let threshold = min_gap_minutes.unwrap_or_else(|| {
        let mut stats = IntervalStats::default();
        timestamps.iter().for_each(|ts| stats.push(*ts));
        stats.threshold()
    });
    let mut scanner = GapScanner::new(threshold);
    timestamps.iter().for_each(|ts| scanner.push(*ts));
    scanner.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading(sensor_id: i32, value: f64, at: OffsetDateTime) -> sensor_reading::Model {
        sensor_reading::Model {
            id: 0,
            sensor_id,
            station_id: 1,
            value,
            unit: "celsius".into(),
            recorded_at: at,
            quality_score: 1.0,
            is_anomaly: false,
            created_at: at,
        }
    }

    #[test]
    fn statistics_of_empty_set() {
        let stats = statistics(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, None);
    }

    #[test]
    fn statistics_summary() {
        let t0 = datetime!(2026-10-01 00:00 UTC);
        let mut readings = vec![
            reading(1, 10.0, t0),
            reading(1, 20.0, t0 + Duration::minutes(10)),
            reading(1, 30.0, t0 + Duration::minutes(20)),
        ];
        readings[1].is_anomaly = true;
        readings[1].quality_score = 0.7;
        let stats = statistics(&readings);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(10.0));
        assert_eq!(stats.max, Some(30.0));
        assert_eq!(stats.mean, Some(20.0));
        assert_eq!(stats.anomaly_count, 1);
        assert_eq!(stats.mean_quality, Some(0.9));
        assert_eq!(stats.first_recorded_at, Some(t0));
        assert_eq!(stats.last_recorded_at, Some(t0 + Duration::minutes(20)));
    }

    #[test]
    fn bucket_boundaries() {
        let ts = datetime!(2026-10-01 13:47:12 UTC);
        assert_eq!(bucket_start(ts, Bucket::Hour), datetime!(2026-10-01 13:00 UTC));
        assert_eq!(bucket_start(ts, Bucket::Day), datetime!(2026-10-01 00:00 UTC));
        let shifted = datetime!(2026-10-02 01:30 +02:00);
        assert_eq!(bucket_start(shifted, Bucket::Day), datetime!(2026-10-01 00:00 UTC));
    }

    #[test]
    fn hourly_aggregation() {
        let t0 = datetime!(2026-10-01 10:05 UTC);
        let readings = vec![
            reading(1, 10.0, t0),
            reading(1, 14.0, t0 + Duration::minutes(30)),
            reading(1, 20.0, t0 + Duration::hours(1)),
            reading(2, 5.0, t0),
        ];
        let rows = aggregate(&readings, Bucket::Hour);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].sensor_id, 1);
        assert_eq!(rows[0].bucket_start, datetime!(2026-10-01 10:00 UTC));
        assert_eq!((rows[0].count, rows[0].min, rows[0].max, rows[0].avg), (2, 10.0, 14.0, 12.0));
        assert_eq!(rows[1].count, 1);
        assert_eq!(rows[2].sensor_id, 2);
    }

    #[test]
    fn gaps_with_explicit_threshold() {
        let t0 = datetime!(2026-10-01 00:00 UTC);
        let ts = vec![
            t0,
            t0 + Duration::minutes(5),
            t0 + Duration::minutes(50),
            t0 + Duration::minutes(55),
        ];
        let (threshold, gaps) = detect_gaps(&ts, Some(15.0));
        assert_eq!(threshold, 15.0);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].from, t0 + Duration::minutes(5));
        assert_eq!(gaps[0].duration_minutes, 45.0);
    }

    #[test]
    fn gaps_with_statistical_threshold() {
        let t0 = datetime!(2026-10-01 00:00 UTC);
        let mut ts: Vec<_> = (0..20).map(|i| t0 + Duration::minutes(i * 5)).collect();
        let last = *ts.last().unwrap();
        ts.push(last + Duration::hours(3));
        let (threshold, gaps) = detect_gaps(&ts, None);
        assert!(threshold > 5.0);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].duration_minutes, 180.0);
    }

    #[test]
    fn regular_series_has_no_gaps() {
        let t0 = datetime!(2026-10-01 00:00 UTC);
        let ts: Vec<_> = (0..10).map(|i| t0 + Duration::minutes(i * 10)).collect();
        let (threshold, gaps) = detect_gaps(&ts, None);
        assert_eq!(threshold, 10.0);
        assert!(gaps.is_empty());
        assert!(detect_gaps(&ts[..1], None).1.is_empty());
    }
}
