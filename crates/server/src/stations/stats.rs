//! Per-station and fleet-wide statistics.

use crate::entity::maintenance_schedule::{self, MaintenanceStatus};
use crate::entity::monitoring_station;
use crate::entity::sensor::{self, SensorStatus};
use crate::entity::sensor_reading;
use crate::entity::station_alert::{self, AlertStatus};
use crate::error::{AppError, AppResult};
use crate::settings::{MINUTES_SETTING_RANGE, SENSORS_OFFLINE_AFTER_MINUTES, SettingsService};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select, sea_query::Expr,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StationStats {
    pub station_id: i32,
    pub sensors_total: u64,
    pub sensors_by_status: BTreeMap<String, u64>,
    /// Sensors that reported within the offline window
    pub sensors_online: u64,
    pub active_alerts: u64,
    pub active_alerts_by_severity: BTreeMap<String, u64>,
    pub readings_last_24h: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading_at: Option<OffsetDateTime>,
    /// Scheduled, overdue or in-progress maintenance entries
    pub open_maintenance: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StationsOverview {
    pub stations_total: u64,
    pub stations_by_status: BTreeMap<String, u64>,
    pub sensors_total: u64,
    pub sensors_by_status: BTreeMap<String, u64>,
    pub active_alerts: u64,
    pub active_alerts_by_severity: BTreeMap<String, u64>,
    pub readings_last_24h: u64,
}

/// Row counts of `select` grouped by a string backed enum column, keyed by the
/// stored value. Absent values have no entry.
pub async fn count_by<E>(
    select: Select<E>,
    column: E::Column,
    db: &DatabaseConnection,
) -> Result<BTreeMap<String, u64>, DbErr>
where
    E: EntityTrait,
{
    let rows: Vec<(String, i64)> = select
        .select_only()
        .column(column)
        .column_as(Expr::col(column).count(), "count")
        .group_by(column)
        .into_tuple()
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(key, count)| (key, count.max(0) as u64))
        .collect())
}

pub struct MonitoringStationStatsService {
    db: Arc<DatabaseConnection>,
}

impl MonitoringStationStatsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self))]
    pub async fn station_stats(&self, station_id: i32) -> AppResult<StationStats> {
        let db = self.db.as_ref();
        monitoring_station::Entity::find_by_id(station_id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Station {station_id} not found")))?;

        let now = OffsetDateTime::now_utc();
        let offline_after = SettingsService::new(self.db.clone())
            .get_i64_within(SENSORS_OFFLINE_AFTER_MINUTES, 30, MINUTES_SETTING_RANGE)
            .await;
        let online_cutoff = now - Duration::minutes(offline_after);

        let station_sensors =
            sensor::Entity::find().filter(sensor::Column::StationId.eq(station_id));
        let sensors_by_status =
            count_by(station_sensors.clone(), sensor::Column::Status, db).await?;
        let sensors_online = station_sensors
            .filter(sensor::Column::Status.ne(SensorStatus::Inactive))
            .filter(sensor::Column::LastReadingAt.gte(online_cutoff))
            .count(db)
            .await?;

        let active_alerts_by_severity = count_by(
            station_alert::Entity::find()
                .filter(station_alert::Column::StationId.eq(station_id))
                .filter(station_alert::Column::Status.eq(AlertStatus::Active)),
            station_alert::Column::Severity,
            db,
        )
        .await?;

        let readings_last_24h = sensor_reading::Entity::find()
            .filter(sensor_reading::Column::StationId.eq(station_id))
            .filter(sensor_reading::Column::RecordedAt.gte(now - Duration::hours(24)))
            .count(db)
            .await?;

        let last_reading_at = sensor_reading::Entity::find()
            .filter(sensor_reading::Column::StationId.eq(station_id))
            .order_by_desc(sensor_reading::Column::RecordedAt)
            .one(db)
            .await?
            .map(|r| r.recorded_at);

        let open_maintenance = maintenance_schedule::Entity::find()
            .filter(maintenance_schedule::Column::StationId.eq(station_id))
            .filter(maintenance_schedule::Column::Status.is_in([
                MaintenanceStatus::Scheduled,
                MaintenanceStatus::Overdue,
                MaintenanceStatus::InProgress,
            ]))
            .count(db)
            .await?;

        Ok(StationStats {
            station_id,
            sensors_total: sensors_by_status.values().sum(),
            sensors_by_status,
            sensors_online,
            active_alerts: active_alerts_by_severity.values().sum(),
            active_alerts_by_severity,
            readings_last_24h,
            last_reading_at,
            open_maintenance,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn overview(&self) -> AppResult<StationsOverview> {
        let db = self.db.as_ref();
        let stations_by_status = count_by(
            monitoring_station::Entity::find(),
            monitoring_station::Column::Status,
            db,
        )
        .await?;
        let sensors_by_status = count_by(sensor::Entity::find(), sensor::Column::Status, db).await?;
        let active_alerts_by_severity = count_by(
            station_alert::Entity::find()
                .filter(station_alert::Column::Status.eq(AlertStatus::Active)),
            station_alert::Column::Severity,
            db,
        )
        .await?;
        let readings_last_24h = sensor_reading::Entity::find()
            .filter(
                sensor_reading::Column::RecordedAt
                    .gte(OffsetDateTime::now_utc() - Duration::hours(24)),
            )
            .count(db)
            .await?;

        Ok(StationsOverview {
            stations_total: stations_by_status.values().sum(),
            stations_by_status,
            sensors_total: sensors_by_status.values().sum(),
            sensors_by_status,
            active_alerts: active_alerts_by_severity.values().sum(),
            active_alerts_by_severity,
            readings_last_24h,
        })
    }
}
