//! Offline sensor detection.
//!
//! Every [`OFFLINE_CHECK_INTERVAL`] active sensors are checked for silence: a
//! sensor whose last reading (or creation, if it never reported) is older than
//! the `sensors.offline_after_minutes` setting gets a `sensor_offline` alert.

use crate::AppResources;
use crate::alerts::StationAlertService;
use crate::entity::sensor::{self, SensorStatus};
use crate::error::AppResult;
use crate::settings::{MINUTES_SETTING_RANGE, SENSORS_OFFLINE_AFTER_MINUTES, SettingsService};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::time::Duration;

pub const OFFLINE_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Active sensors silent since before `now - offline_after_minutes`.
pub async fn find_offline_sensors(
    db: &DatabaseConnection,
    now: OffsetDateTime,
    offline_after_minutes: i64,
) -> Result<Vec<sensor::Model>, sea_orm::DbErr> {
    let cutoff =
        now.saturating_sub(time::Duration::seconds(offline_after_minutes.saturating_mul(60)));
    sensor::Entity::find()
        .filter(sensor::Column::Status.eq(SensorStatus::Active))
        .filter(
            Condition::any()
                .add(sensor::Column::LastReadingAt.lt(cutoff))
                .add(
                    Condition::all()
                        .add(sensor::Column::LastReadingAt.is_null())
                        .add(sensor::Column::CreatedAt.lt(cutoff)),
                ),
        )
        .all(db)
        .await
}

/// One pass of the offline check. Returns the number of alerts opened.
#[tracing::instrument(skip_all)]
pub async fn run_offline_check(resources: &AppResources) -> AppResult<usize> {
    let now = OffsetDateTime::now_utc();
    let offline_after = SettingsService::new(resources.db.clone())
        .get_i64_within(SENSORS_OFFLINE_AFTER_MINUTES, 30, MINUTES_SETTING_RANGE)
        .await
        .max(1);
    let silent = find_offline_sensors(resources.db.as_ref(), now, offline_after).await?;
    let alerts = StationAlertService::new(resources.clone());
    let mut opened = 0;
    for sensor in &silent {
        let since = sensor.last_reading_at.unwrap_or(sensor.created_at);
        let minutes = (now - since).whole_minutes();
        if alerts.raise_sensor_offline(sensor, minutes).await?.is_some() {
            opened += 1;
        }
    }
    if opened > 0 {
        tracing::info!(
            name = "alerts.offline_check.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            silent = silent.len(),
            opened = opened,
            message = "Reported offline sensors"
        );
    }
    Ok(opened)
}

pub fn spawn_offline_check_task(resources: Arc<AppResources>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(OFFLINE_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_offline_check(&resources).await {
                tracing::warn!(
                    name = "alerts.offline_check.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Offline sensor check failed"
                );
            }
        }
    });
}
