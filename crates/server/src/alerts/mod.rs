//! Station alerts raised from threshold violations, anomalies and silent sensors.
//!
//! An alert is `active`, `acknowledged` or `resolved`; `resolved` is terminal.
//! Each sensor has at most one open alert per alert type: new violations refresh
//! or escalate the open alert instead of stacking duplicates.
//!
//! ## Submodules
//!
//! - `checks` - Background loop reporting sensors that stopped sending readings

pub mod checks;

pub use checks::{
    OFFLINE_CHECK_INTERVAL, find_offline_sensors, run_offline_check, spawn_offline_check_task,
};

use crate::AppResources;
use crate::entity::monitoring_station;
use crate::entity::notification::NotificationType;
use crate::entity::sensor;
use crate::entity::sensor_reading;
use crate::entity::station_alert::{self, AlertStatus, AlertType};
use crate::entity::threshold::Severity;
use crate::entity::user::Role;
use crate::error::{AppError, AppResult};
use crate::notifications::{NewNotification, NotificationsService};
use crate::pagination::{Page, PageParams, paginate};
use crate::stations::stats::count_by;
use crate::thresholds::ThresholdViolation;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

/// Roles that receive alert notifications.
pub const ALERT_RECIPIENTS: [Role; 2] = [Role::Operator, Role::Admin];

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub station_id: Option<i32>,
    pub sensor_id: Option<i32>,
    pub severity: Option<Severity>,
    pub alert_type: Option<AlertType>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AlertSummary {
    pub by_status: BTreeMap<String, u64>,
    pub open_by_severity: BTreeMap<String, u64>,
    pub open_total: u64,
}

/// Alert to open for a sensor.
struct AlertDraft {
    alert_type: AlertType,
    severity: Severity,
    message: String,
    value: Option<f64>,
    reading_id: Option<i32>,
    threshold_id: Option<i32>,
}

pub struct StationAlertService {
    resources: AppResources,
}

impl StationAlertService {
    pub fn new(resources: AppResources) -> Self {
        Self { resources }
    }

    async fn open_alert_for(
        &self,
        sensor_id: i32,
        alert_type: AlertType,
    ) -> AppResult<Option<station_alert::Model>> {
        Ok(station_alert::Entity::find()
            .filter(station_alert::Column::SensorId.eq(sensor_id))
            .filter(station_alert::Column::AlertType.eq(alert_type))
            .filter(station_alert::Column::Status.is_in(AlertStatus::OPEN))
            .order_by_desc(station_alert::Column::Id)
            .one(self.resources.db.as_ref())
            .await?)
    }

    async fn station_code(&self, station_id: i32) -> String {
        match monitoring_station::Entity::find_by_id(station_id)
            .one(self.resources.db.as_ref())
            .await
        {
            Ok(Some(station)) => station.code,
            _ => format!("station {station_id}"),
        }
    }

    async fn insert(&self, sensor: &sensor::Model, draft: AlertDraft) -> AppResult<station_alert::Model> {
        let now = OffsetDateTime::now_utc();
        let alert = station_alert::ActiveModel {
            station_id: Set(sensor.station_id),
            sensor_id: Set(Some(sensor.id)),
            reading_id: Set(draft.reading_id),
            threshold_id: Set(draft.threshold_id),
            alert_type: Set(draft.alert_type),
            severity: Set(draft.severity),
            status: Set(AlertStatus::Active),
            message: Set(draft.message),
            value: Set(draft.value),
            acknowledged_by: Set(None),
            acknowledged_at: Set(None),
            resolved_by: Set(None),
            resolved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.resources.db.as_ref())
        .await?;
        tracing::info!(
            name = "alerts.raise.created",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            alert_id = alert.id,
            sensor_id = sensor.id,
            severity = alert.severity.as_str(),
            message = "Alert opened"
        );
        Ok(alert)
    }

    async fn notify(&self, alert: &station_alert::Model, headline: &str) {
        let code = self.station_code(alert.station_id).await;
        let note = NewNotification::new(
            NotificationType::Alert,
            format!("[{}] {headline} at {code}", alert.severity.as_str().to_uppercase()),
            alert.message.clone(),
        )
        .related("station_alert", alert.id)
        .with_email(alert.severity == Severity::Critical);
        if let Err(e) = NotificationsService::new(self.resources.clone())
            .notify_roles(&ALERT_RECIPIENTS, &note)
            .await
        {
            tracing::warn!(
                name = "alerts.notify.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                alert_id = alert.id,
                error = %e,
                message = "Failed to notify about alert"
            );
        }
    }

    /// Open, escalate or refresh the threshold alert of `sensor`.
    #[tracing::instrument(skip_all, fields(sensor_id = sensor.id, severity = violation.threshold.severity.as_str()))]
    pub async fn raise_threshold_violation(
        &self,
        sensor: &sensor::Model,
        reading: &sensor_reading::Model,
        violation: &ThresholdViolation,
    ) -> AppResult<station_alert::Model> {
        let severity = violation.threshold.severity;
        let message = violation.describe();

        if let Some(existing) = self
            .open_alert_for(sensor.id, AlertType::ThresholdViolation)
            .await?
        {
            let escalate = severity > existing.severity;
            let mut active: station_alert::ActiveModel = existing.into();
            active.message = Set(message);
            active.value = Set(Some(reading.value));
            active.reading_id = Set(Some(reading.id));
            active.updated_at = Set(OffsetDateTime::now_utc());
            if escalate {
                active.severity = Set(severity);
                active.threshold_id = Set(Some(violation.threshold.id));
                active.status = Set(AlertStatus::Active);
                active.acknowledged_by = Set(None);
                active.acknowledged_at = Set(None);
            }
            let updated = active.update(self.resources.db.as_ref()).await?;
            if escalate {
                tracing::info!(
                    name = "alerts.raise.escalated",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    alert_id = updated.id,
                    severity = updated.severity.as_str(),
                    message = "Alert escalated"
                );
                self.notify(&updated, "Alert escalated").await;
            }
            return Ok(updated);
        }

        let alert = self
            .insert(
                sensor,
                AlertDraft {
                    alert_type: AlertType::ThresholdViolation,
                    severity,
                    message,
                    value: Some(reading.value),
                    reading_id: Some(reading.id),
                    threshold_id: Some(violation.threshold.id),
                },
            )
            .await?;
        self.notify(&alert, "Threshold violated").await;
        Ok(alert)
    }

    async fn resolve_open(
        &self,
        sensor_id: i32,
        alert_type: AlertType,
        resolved_by: Option<i32>,
    ) -> AppResult<u64> {
        let open = station_alert::Entity::find()
            .filter(station_alert::Column::SensorId.eq(sensor_id))
            .filter(station_alert::Column::AlertType.eq(alert_type))
            .filter(station_alert::Column::Status.is_in(AlertStatus::OPEN))
            .all(self.resources.db.as_ref())
            .await?;
        let now = OffsetDateTime::now_utc();
        let mut resolved = 0;
        for alert in open {
            let mut active: station_alert::ActiveModel = alert.into();
            active.status = Set(AlertStatus::Resolved);
            active.resolved_by = Set(resolved_by);
            active.resolved_at = Set(Some(now));
            active.updated_at = Set(now);
            active.update(self.resources.db.as_ref()).await?;
            resolved += 1;
        }
        Ok(resolved)
    }

    /// Resolve open threshold alerts of a sensor whose readings are back within limits.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_recovered(&self, sensor_id: i32) -> AppResult<u64> {
        let resolved = self
            .resolve_open(sensor_id, AlertType::ThresholdViolation, None)
            .await?;
        if resolved > 0 {
            tracing::info!(
                name = "alerts.auto_resolve.completed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                sensor_id = sensor_id,
                resolved = resolved,
                message = "Threshold alerts resolved after recovery"
            );
        }
        Ok(resolved)
    }

    /// Open an offline alert unless one is already open. Returns the new alert.
    #[tracing::instrument(skip_all, fields(sensor_id = sensor.id))]
    pub async fn raise_sensor_offline(
        &self,
        sensor: &sensor::Model,
        silent_minutes: i64,
    ) -> AppResult<Option<station_alert::Model>> {
        if self
            .open_alert_for(sensor.id, AlertType::SensorOffline)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let alert = self
            .insert(
                sensor,
                AlertDraft {
                    alert_type: AlertType::SensorOffline,
                    severity: Severity::Warning,
                    message: format!(
                        "Sensor {} ({}) has not reported for {silent_minutes} minutes",
                        sensor.serial_number,
                        sensor.sensor_type.as_str()
                    ),
                    value: None,
                    reading_id: None,
                    threshold_id: None,
                },
            )
            .await?;
        self.notify(&alert, "Sensor offline").await;
        Ok(Some(alert))
    }

    pub async fn resolve_sensor_offline(&self, sensor_id: i32) -> AppResult<u64> {
        self.resolve_open(sensor_id, AlertType::SensorOffline, None)
            .await
    }

    /// Open or refresh the anomaly alert of a sensor.
    #[tracing::instrument(skip_all, fields(sensor_id = sensor.id))]
    pub async fn raise_anomaly(
        &self,
        sensor: &sensor::Model,
        reading: &sensor_reading::Model,
    ) -> AppResult<station_alert::Model> {
        let message = format!(
            "Anomalous {} reading {:.2} {} from sensor {}",
            sensor.sensor_type.as_str(),
            reading.value,
            reading.unit,
            sensor.serial_number
        );
        if let Some(existing) = self.open_alert_for(sensor.id, AlertType::Anomaly).await? {
            let mut active: station_alert::ActiveModel = existing.into();
            active.message = Set(message);
            active.value = Set(Some(reading.value));
            active.reading_id = Set(Some(reading.id));
            active.updated_at = Set(OffsetDateTime::now_utc());
            return Ok(active.update(self.resources.db.as_ref()).await?);
        }
        let alert = self
            .insert(
                sensor,
                AlertDraft {
                    alert_type: AlertType::Anomaly,
                    severity: Severity::Warning,
                    message,
                    value: Some(reading.value),
                    reading_id: Some(reading.id),
                    threshold_id: None,
                },
            )
            .await?;
        self.notify(&alert, "Anomalous reading").await;
        Ok(alert)
    }

    pub async fn get(&self, id: i32) -> AppResult<station_alert::Model> {
        station_alert::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Alert {id} not found")))
    }

    /// Only active alerts can be acknowledged.
    #[tracing::instrument(skip(self))]
    pub async fn acknowledge(&self, id: i32, user_id: i32) -> AppResult<station_alert::Model> {
        let alert = self.get(id).await?;
        if alert.status != AlertStatus::Active {
            return Err(AppError::conflict(format!(
                "Alert {id} is {} and cannot be acknowledged",
                alert.status.to_value()
            )));
        }
        let now = OffsetDateTime::now_utc();
        let mut active: station_alert::ActiveModel = alert.into();
        active.status = Set(AlertStatus::Acknowledged);
        active.acknowledged_by = Set(Some(user_id));
        active.acknowledged_at = Set(Some(now));
        active.updated_at = Set(now);
        Ok(active.update(self.resources.db.as_ref()).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: i32, user_id: i32) -> AppResult<station_alert::Model> {
        let alert = self.get(id).await?;
        if !alert.is_open() {
            return Err(AppError::conflict(format!("Alert {id} is already resolved")));
        }
        let now = OffsetDateTime::now_utc();
        let mut active: station_alert::ActiveModel = alert.into();
        active.status = Set(AlertStatus::Resolved);
        active.resolved_by = Set(Some(user_id));
        active.resolved_at = Set(Some(now));
        active.updated_at = Set(now);
        Ok(active.update(self.resources.db.as_ref()).await?)
    }

    pub async fn list(
        &self,
        filter: &AlertFilter,
        page: PageParams,
    ) -> AppResult<Page<station_alert::Model>> {
        let mut query = station_alert::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(station_alert::Column::Status.eq(status));
        }
        if let Some(station_id) = filter.station_id {
            query = query.filter(station_alert::Column::StationId.eq(station_id));
        }
        if let Some(sensor_id) = filter.sensor_id {
            query = query.filter(station_alert::Column::SensorId.eq(sensor_id));
        }
        if let Some(severity) = filter.severity {
            query = query.filter(station_alert::Column::Severity.eq(severity));
        }
        if let Some(alert_type) = filter.alert_type {
            query = query.filter(station_alert::Column::AlertType.eq(alert_type));
        }
        let query = query
            .order_by_desc(station_alert::Column::CreatedAt)
            .order_by_desc(station_alert::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    pub async fn summary(&self) -> AppResult<AlertSummary> {
        let db = self.resources.db.as_ref();
        let by_status =
            count_by(station_alert::Entity::find(), station_alert::Column::Status, db).await?;
        let open_by_severity = count_by(
            station_alert::Entity::find()
                .filter(station_alert::Column::Status.is_in(AlertStatus::OPEN)),
            station_alert::Column::Severity,
            db,
        )
        .await?;
        let open_total = open_by_severity.values().sum();
        Ok(AlertSummary {
            by_status,
            open_by_severity,
            open_total,
        })
    }
}
