//! Sensor reading ingestion and queries.
//!
//! Ingestion normalizes the value into the sensor's unit, scores its quality,
//! flags statistical anomalies and then drives alerting: threshold violations
//! open or escalate alerts, recovered readings resolve them, and any reading
//! clears an open offline alert for its sensor.
//!
//! ## Submodules
//!
//! - `quality` - Quality score and z-score anomaly detection
//! - `analysis` - Statistics, hourly/daily aggregation and gap detection

pub mod analysis;
pub mod quality;

use crate::AppResources;
use crate::alerts::StationAlertService;
use crate::entity::sensor::{self, SensorStatus, SensorType};
use crate::entity::sensor_reading;
use crate::entity::system_event::EventSeverity;
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use crate::readings::analysis::{
    AggregateRow, Aggregator, Bucket, GapReport, GapScanner, IntervalStats, ReadingStatistics,
    StatisticsAccumulator,
};
use crate::readings::quality::{QualityInputs, is_anomaly, quality_score};
use crate::settings::{
    ALERTS_ANOMALY_ALERTS, ALERTS_AUTO_RESOLVE, ANOMALY_WINDOW_RANGE, READINGS_ANOMALY_WINDOW,
    READINGS_ANOMALY_ZSCORE, SettingsService,
};
use crate::system::SystemService;
use crate::thresholds::{ThresholdService, ThresholdViolation};
use crate::units::{Unit, convert};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};

pub const MAX_BATCH_SIZE: usize = 1000;
/// Readings may be timestamped at most this far ahead of the server clock.
pub const MAX_FUTURE_SKEW: Duration = Duration::minutes(5);
/// Rows fetched per round trip when scanning a time range for analysis.
pub const ANALYSIS_CHUNK_SIZE: u64 = 5_000;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewReading {
    pub sensor_id: i32,
    pub value: f64,
    /// Unit of `value`; defaults to the sensor's unit
    pub unit: Option<String>,
    /// Defaults to the time of ingestion
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestedReading {
    pub reading: sensor_reading::Model,
    /// Thresholds broken by this reading, most severe first
    pub violations: Vec<ThresholdViolation>,
    /// Set when the reading was stored but alert processing failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerting_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<sensor_reading::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchResult {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ReadingFilter {
    pub station_id: Option<i32>,
    pub sensor_id: Option<i32>,
    pub sensor_type: Option<SensorType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    #[serde(default)]
    pub anomalies_only: bool,
    pub min_quality: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct GapQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    /// Report intervals longer than this; defaults to mean + 3σ of all intervals
    pub min_gap_minutes: Option<f64>,
}

pub struct SensorReadingsService {
    resources: AppResources,
}

impl SensorReadingsService {
    pub fn new(resources: AppResources) -> Self {
        Self { resources }
    }

    async fn sensor(&self, id: i32) -> AppResult<sensor::Model> {
        sensor::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Sensor {id} not found")))
    }

    /// Values of the sensor's most recent readings, newest first.
    async fn recent_values(&self, sensor_id: i32, window: u64) -> AppResult<Vec<f64>> {
        let rows = sensor_reading::Entity::find()
            .filter(sensor_reading::Column::SensorId.eq(sensor_id))
            .order_by_desc(sensor_reading::Column::RecordedAt)
            .order_by_desc(sensor_reading::Column::Id)
            .limit(window)
            .all(self.resources.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(|r| r.value).collect())
    }

    #[tracing::instrument(skip(self, new), fields(sensor_id = new.sensor_id))]
    pub async fn ingest(&self, new: NewReading) -> AppResult<IngestedReading> {
        if !new.value.is_finite() {
            return Err(AppError::bad_request("Reading value must be a finite number"));
        }
        let sensor = self.sensor(new.sensor_id).await?;
        if sensor.status == SensorStatus::Inactive {
            return Err(AppError::bad_request(format!(
                "Sensor {} is inactive and does not accept readings",
                sensor.id
            )));
        }

        let sensor_unit: Unit = sensor.unit.parse()?;
        let value = match new.unit.as_deref() {
            Some(unit) => convert(new.value, unit.parse()?, sensor_unit)?,
            None => new.value,
        };

        let now = OffsetDateTime::now_utc();
        let recorded_at = new.recorded_at.unwrap_or(now);
        if recorded_at > now + MAX_FUTURE_SKEW {
            return Err(AppError::bad_request(
                "recorded_at is more than 5 minutes in the future",
            ));
        }

        let settings = SettingsService::new(self.resources.db.clone());
        let window = settings
            .get_i64_within(READINGS_ANOMALY_WINDOW, 20, ANOMALY_WINDOW_RANGE)
            .await as u64;
        let zscore = settings.get_f64(READINGS_ANOMALY_ZSCORE, 3.0).await;
        let history = self.recent_values(sensor.id, window).await?;
        let anomaly = is_anomaly(&history, value, zscore);

        let score = quality_score(&QualityInputs {
            in_range: sensor.in_range(value),
            sensor_status: sensor.status,
            calibrated_at: sensor.calibrated_at,
            recorded_at,
            is_anomaly: anomaly,
        });

        let reading = sensor_reading::ActiveModel {
            sensor_id: Set(sensor.id),
            station_id: Set(sensor.station_id),
            value: Set(value),
            unit: Set(sensor_unit.symbol().to_string()),
            recorded_at: Set(recorded_at),
            quality_score: Set(score),
            is_anomaly: Set(anomaly),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.resources.db.as_ref())
        .await?;

        if sensor.last_reading_at.is_none_or(|last| last < recorded_at) {
            let mut active: sensor::ActiveModel = sensor.clone().into();
            active.last_reading_at = Set(Some(recorded_at));
            active.update(self.resources.db.as_ref()).await?;
        }

        let violations = ThresholdService::new(self.resources.db.clone())
            .evaluate(sensor.sensor_type, value, sensor_unit)
            .await?;
        let alerting_error = match self
            .drive_alerts(&sensor, &reading, &violations, &settings)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    name = "readings.ingest.alerting_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    reading_id = reading.id,
                    sensor_id = sensor.id,
                    error = %e,
                    message = "Reading stored but alert processing failed"
                );
                SystemService::new(self.resources.db.clone())
                    .record(
                        "readings.alerting_failed",
                        EventSeverity::Error,
                        "readings",
                        &format!("Alert processing failed for reading {}: {e}", reading.id),
                        Some(serde_json::json!({
                            "reading_id": reading.id,
                            "sensor_id": sensor.id,
                        })),
                    )
                    .await;
                Some(e.to_string())
            }
        };

        tracing::debug!(
            name = "readings.ingest.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            reading_id = reading.id,
            quality = reading.quality_score,
            anomaly = reading.is_anomaly,
            violations = violations.len(),
            message = "Reading ingested"
        );
        Ok(IngestedReading {
            reading,
            violations,
            alerting_error,
        })
    }

    async fn drive_alerts(
        &self,
        sensor: &sensor::Model,
        reading: &sensor_reading::Model,
        violations: &[ThresholdViolation],
        settings: &SettingsService,
    ) -> AppResult<()> {
        let alerts = StationAlertService::new(self.resources.clone());
        match violations.first() {
            Some(most_severe) => {
                alerts
                    .raise_threshold_violation(sensor, reading, most_severe)
                    .await?;
            }
            None => {
                if settings.get_bool(ALERTS_AUTO_RESOLVE, true).await {
                    alerts.resolve_recovered(sensor.id).await?;
                }
            }
        }
        alerts.resolve_sensor_offline(sensor.id).await?;
        if reading.is_anomaly && settings.get_bool(ALERTS_ANOMALY_ALERTS, false).await {
            alerts.raise_anomaly(sensor, reading).await?;
        }
        Ok(())
    }

    /// Ingest every item independently; a rejected item does not stop the batch.
    #[tracing::instrument(skip_all, fields(items = items.len()))]
    pub async fn ingest_batch(&self, items: Vec<NewReading>) -> AppResult<BatchResult> {
        if items.is_empty() {
            return Err(AppError::bad_request("Batch must contain at least one reading"));
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(AppError::bad_request(format!(
                "Batch of {} readings exceeds the limit of {MAX_BATCH_SIZE}",
                items.len()
            )));
        }
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let result = match self.ingest(item).await {
                Ok(ingested) => BatchItemResult {
                    index,
                    reading: Some(ingested.reading),
                    error: None,
                },
                Err(e) => BatchItemResult {
                    index,
                    reading: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        let accepted = results.iter().filter(|r| r.reading.is_some()).count();
        Ok(BatchResult {
            accepted,
            rejected: results.len() - accepted,
            results,
        })
    }

    async fn filtered(&self, filter: &ReadingFilter) -> AppResult<Select<sensor_reading::Entity>> {
        let mut query = sensor_reading::Entity::find();
        if let Some(station_id) = filter.station_id {
            query = query.filter(sensor_reading::Column::StationId.eq(station_id));
        }
        if let Some(sensor_id) = filter.sensor_id {
            query = query.filter(sensor_reading::Column::SensorId.eq(sensor_id));
        }
        if let Some(sensor_type) = filter.sensor_type {
            let sensor_ids: Vec<i32> = sensor::Entity::find()
                .filter(sensor::Column::SensorType.eq(sensor_type))
                .all(self.resources.db.as_ref())
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            query = query.filter(sensor_reading::Column::SensorId.is_in(sensor_ids));
        }
        if let Some(from) = filter.from {
            query = query.filter(sensor_reading::Column::RecordedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(sensor_reading::Column::RecordedAt.lte(to));
        }
        if filter.anomalies_only {
            query = query.filter(sensor_reading::Column::IsAnomaly.eq(true));
        }
        if let Some(min_quality) = filter.min_quality {
            query = query.filter(sensor_reading::Column::QualityScore.gte(min_quality));
        }
        Ok(query)
    }

    /// Readings matching `filter`, newest first.
    pub async fn list(
        &self,
        filter: &ReadingFilter,
        page: PageParams,
    ) -> AppResult<Page<sensor_reading::Model>> {
        let query = self
            .filtered(filter)
            .await?
            .order_by_desc(sensor_reading::Column::RecordedAt)
            .order_by_desc(sensor_reading::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    /// All readings matching `filter` in chronological order, up to `limit`.
    pub async fn fetch(
        &self,
        filter: &ReadingFilter,
        limit: u64,
    ) -> AppResult<Vec<sensor_reading::Model>> {
        Ok(self
            .filtered(filter)
            .await?
            .order_by_asc(sensor_reading::Column::RecordedAt)
            .order_by_asc(sensor_reading::Column::Id)
            .limit(limit)
            .all(self.resources.db.as_ref())
            .await?)
    }

    pub async fn get(&self, id: i32) -> AppResult<sensor_reading::Model> {
        sensor_reading::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Reading {id} not found")))
    }

    /// Most recent reading of each sensor of a station.
    pub async fn latest(&self, station_id: i32) -> AppResult<Vec<sensor_reading::Model>> {
        let sensors = sensor::Entity::find()
            .filter(sensor::Column::StationId.eq(station_id))
            .order_by_asc(sensor::Column::Id)
            .all(self.resources.db.as_ref())
            .await?;
        let mut latest = Vec::with_capacity(sensors.len());
        for s in sensors {
            if let Some(reading) = sensor_reading::Entity::find()
                .filter(sensor_reading::Column::SensorId.eq(s.id))
                .order_by_desc(sensor_reading::Column::RecordedAt)
                .order_by_desc(sensor_reading::Column::Id)
                .one(self.resources.db.as_ref())
                .await?
            {
                latest.push(reading);
            }
        }
        Ok(latest)
    }

    /// Visit every reading matching `filter` in `(recorded_at, id)` order.
    ///
    /// Pages with a keyset cursor so rows ingested mid-scan cannot shift the
    /// window, and at most [`ANALYSIS_CHUNK_SIZE`] rows are held at a time.
    pub async fn scan<F>(&self, filter: &ReadingFilter, mut visit: F) -> AppResult<u64>
    where
        F: FnMut(&sensor_reading::Model),
    {
        let base = self.filtered(filter).await?;
        let mut after: Option<(OffsetDateTime, i32)> = None;
        let mut visited = 0;
        loop {
            let mut cursor = base.clone().cursor_by((
                sensor_reading::Column::RecordedAt,
                sensor_reading::Column::Id,
            ));
            if let Some(key) = after {
                cursor.after(key);
            }
            let chunk = cursor
                .first(ANALYSIS_CHUNK_SIZE)
                .all(self.resources.db.as_ref())
                .await?;
            chunk.iter().for_each(&mut visit);
            visited += chunk.len() as u64;
            match chunk.last() {
                Some(last) if chunk.len() as u64 == ANALYSIS_CHUNK_SIZE => {
                    after = Some((last.recorded_at, last.id));
                }
                _ => break,
            }
        }
        Ok(visited)
    }

    pub async fn statistics(&self, filter: &ReadingFilter) -> AppResult<ReadingStatistics> {
        let mut acc = StatisticsAccumulator::default();
        self.scan(filter, |r| acc.push(r)).await?;
        Ok(acc.finish())
    }

    /// Bucketed aggregates over the whole filtered range.
    pub async fn aggregator(
        &self,
        filter: &ReadingFilter,
        bucket: Bucket,
    ) -> AppResult<Aggregator> {
        let mut acc = Aggregator::new(bucket);
        self.scan(filter, |r| acc.push(r)).await?;
        Ok(acc)
    }

    pub async fn aggregate(
        &self,
        filter: &ReadingFilter,
        bucket: Bucket,
    ) -> AppResult<Vec<AggregateRow>> {
        Ok(self.aggregator(filter, bucket).await?.finish())
    }

    #[tracing::instrument(skip(self, query))]
    pub async fn gaps(&self, sensor_id: i32, query: &GapQuery) -> AppResult<GapReport> {
        self.sensor(sensor_id).await?;
        if query.min_gap_minutes.is_some_and(|m| !m.is_finite() || m <= 0.0) {
            return Err(AppError::bad_request("min_gap_minutes must be positive"));
        }
        let filter = ReadingFilter {
            sensor_id: Some(sensor_id),
            from: query.from,
            to: query.to,
            ..Default::default()
        };
        let threshold = match query.min_gap_minutes {
            Some(explicit) => explicit,
            None => {
                let mut intervals = IntervalStats::default();
                self.scan(&filter, |r| intervals.push(r.recorded_at)).await?;
                intervals.threshold()
            }
        };
        let mut scanner = GapScanner::new(threshold);
        self.scan(&filter, |r| scanner.push(r.recorded_at)).await?;
        let (threshold_minutes, gaps) = scanner.finish();
        Ok(GapReport {
            sensor_id,
            threshold_minutes,
            gaps,
        })
    }
}
