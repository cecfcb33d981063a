//! Maintenance schedules for stations and their sensors.
//!
//! Lifecycle: `scheduled -> in_progress -> completed`, with `overdue` set by a
//! background sweep once a scheduled entry is past due and `cancelled`
//! reachable from any non-terminal status. Starting work puts the station into
//! `maintenance`; it returns to `active` once nothing is in progress anymore.

use crate::AppResources;
use crate::entity::maintenance_schedule::{self, MaintenanceStatus, MaintenanceType};
use crate::entity::monitoring_station::{self, StationStatus};
use crate::entity::notification::NotificationType;
use crate::entity::sensor::{self, SensorStatus};
use crate::entity::user::{self, Role};
use crate::error::{AppError, AppResult};
use crate::notifications::{NewNotification, NotificationsService};
use crate::pagination::{Page, PageParams, paginate};
use crate::settings::{MAINTENANCE_OVERDUE_GRACE_MINUTES, MINUTES_SETTING_RANGE, SettingsService};
use crate::stations::StationsService;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};

pub const OVERDUE_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewMaintenance {
    pub station_id: i32,
    pub sensor_id: Option<i32>,
    pub title: String,
    pub description: Option<String>,
    pub maintenance_type: MaintenanceType,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_for: OffsetDateTime,
    /// Repeat this many days after each scheduled date
    pub recurrence_days: Option<i32>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct MaintenanceUpdate {
    pub sensor_id: Option<i32>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub maintenance_type: Option<MaintenanceType>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scheduled_for: Option<OffsetDateTime>,
    pub recurrence_days: Option<i32>,
    pub assigned_to: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct MaintenanceFilter {
    pub station_id: Option<i32>,
    pub status: Option<MaintenanceStatus>,
    pub maintenance_type: Option<MaintenanceType>,
    pub assigned_to: Option<i32>,
    /// Scheduled at or after
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    /// Scheduled at or before
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompletedMaintenance {
    pub schedule: maintenance_schedule::Model,
    /// Next occurrence of a recurring schedule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<maintenance_schedule::Model>,
}

/// Longest supported recurrence interval (ten years).
pub const MAX_RECURRENCE_DAYS: i32 = 3650;

pub fn validate_recurrence(recurrence_days: Option<i32>) -> AppResult<()> {
    match recurrence_days {
        Some(days) if !(1..=MAX_RECURRENCE_DAYS).contains(&days) => Err(AppError::bad_request(
            format!("recurrence_days must be between 1 and {MAX_RECURRENCE_DAYS}"),
        )),
        _ => Ok(()),
    }
}

/// Scheduled date of the occurrence following `schedule`, if it recurs.
pub fn next_occurrence(schedule: &maintenance_schedule::Model) -> Option<OffsetDateTime> {
    schedule
        .recurrence_days
        .filter(|d| *d >= 1)
        .and_then(|d| {
            schedule
                .scheduled_for
                .checked_add(Duration::days(i64::from(d)))
        })
}

pub struct MaintenanceSchedulesService {
    resources: AppResources,
}

impl MaintenanceSchedulesService {
    pub fn new(resources: AppResources) -> Self {
        Self { resources }
    }

    async fn check_sensor(&self, station_id: i32, sensor_id: Option<i32>) -> AppResult<()> {
        let Some(sensor_id) = sensor_id else {
            return Ok(());
        };
        let sensor = sensor::Entity::find_by_id(sensor_id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::bad_request(format!("Sensor {sensor_id} does not exist")))?;
        if sensor.station_id != station_id {
            return Err(AppError::bad_request(format!(
                "Sensor {sensor_id} does not belong to station {station_id}"
            )));
        }
        Ok(())
    }

    async fn check_assignee(&self, assigned_to: Option<i32>) -> AppResult<()> {
        let Some(user_id) = assigned_to else {
            return Ok(());
        };
        let found = user::Entity::find_by_id(user_id)
            .one(self.resources.db.as_ref())
            .await?
            .is_some();
        if !found {
            return Err(AppError::bad_request(format!("User {user_id} does not exist")));
        }
        Ok(())
    }

    async fn notify_assignee(&self, schedule: &maintenance_schedule::Model, title: &str) {
        let note = NewNotification::new(
            NotificationType::Maintenance,
            format!("{title}: {}", schedule.title),
            format!(
                "{} maintenance for station {} scheduled for {}",
                schedule.maintenance_type.to_value(),
                schedule.station_id,
                schedule.scheduled_for
            ),
        )
        .related("maintenance_schedule", schedule.id)
        .with_email(true);
        let notifications = NotificationsService::new(self.resources.clone());
        let result = match schedule.assigned_to {
            Some(user_id) => notifications.notify_user(user_id, &note).await.map(|_| ()),
            None => notifications.notify_roles(&[Role::Admin], &note).await.map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!(
                name = "maintenance.notify.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                schedule_id = schedule.id,
                error = %e,
                message = "Failed to send maintenance notification"
            );
        }
    }

    #[tracing::instrument(skip(self, new), fields(station_id = new.station_id))]
    pub async fn create(
        &self,
        new: NewMaintenance,
        created_by: Option<i32>,
    ) -> AppResult<maintenance_schedule::Model> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::bad_request("Title cannot be empty"));
        }
        validate_recurrence(new.recurrence_days)?;
        monitoring_station::Entity::find_by_id(new.station_id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| {
                AppError::bad_request(format!("Station {} does not exist", new.station_id))
            })?;
        self.check_sensor(new.station_id, new.sensor_id).await?;
        self.check_assignee(new.assigned_to).await?;

        let now = OffsetDateTime::now_utc();
        let schedule = maintenance_schedule::ActiveModel {
            station_id: Set(new.station_id),
            sensor_id: Set(new.sensor_id),
            title: Set(title),
            description: Set(new.description),
            maintenance_type: Set(new.maintenance_type),
            status: Set(MaintenanceStatus::Scheduled),
            scheduled_for: Set(new.scheduled_for),
            recurrence_days: Set(new.recurrence_days),
            assigned_to: Set(new.assigned_to),
            started_at: Set(None),
            completed_at: Set(None),
            notes: Set(None),
            created_by: Set(created_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.resources.db.as_ref())
        .await?;

        if schedule.assigned_to.is_some() {
            self.notify_assignee(&schedule, "Maintenance assigned").await;
        }
        Ok(schedule)
    }

    pub async fn get(&self, id: i32) -> AppResult<maintenance_schedule::Model> {
        maintenance_schedule::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Maintenance schedule {id} not found")))
    }

    pub async fn list(
        &self,
        filter: &MaintenanceFilter,
        page: PageParams,
    ) -> AppResult<Page<maintenance_schedule::Model>> {
        let mut query = maintenance_schedule::Entity::find();
        if let Some(station_id) = filter.station_id {
            query = query.filter(maintenance_schedule::Column::StationId.eq(station_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(maintenance_schedule::Column::Status.eq(status));
        }
        if let Some(kind) = filter.maintenance_type {
            query = query.filter(maintenance_schedule::Column::MaintenanceType.eq(kind));
        }
        if let Some(assigned_to) = filter.assigned_to {
            query = query.filter(maintenance_schedule::Column::AssignedTo.eq(assigned_to));
        }
        if let Some(from) = filter.from {
            query = query.filter(maintenance_schedule::Column::ScheduledFor.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(maintenance_schedule::Column::ScheduledFor.lte(to));
        }
        let query = query
            .order_by_asc(maintenance_schedule::Column::ScheduledFor)
            .order_by_asc(maintenance_schedule::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    /// Only scheduled or overdue entries can be edited.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(
        &self,
        id: i32,
        update: MaintenanceUpdate,
    ) -> AppResult<maintenance_schedule::Model> {
        let existing = self.get(id).await?;
        if !matches!(
            existing.status,
            MaintenanceStatus::Scheduled | MaintenanceStatus::Overdue
        ) {
            return Err(AppError::conflict(format!(
                "Maintenance {id} is {} and can no longer be edited",
                existing.status.to_value()
            )));
        }
        validate_recurrence(update.recurrence_days)?;
        self.check_sensor(existing.station_id, update.sensor_id).await?;
        self.check_assignee(update.assigned_to).await?;

        let now = OffsetDateTime::now_utc();
        let reassigned = update.assigned_to.is_some() && update.assigned_to != existing.assigned_to;
        let was_overdue = existing.status == MaintenanceStatus::Overdue;
        let mut active: maintenance_schedule::ActiveModel = existing.into();
        if update.sensor_id.is_some() {
            active.sensor_id = Set(update.sensor_id);
        }
        if let Some(title) = update.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::bad_request("Title cannot be empty"));
            }
            active.title = Set(title);
        }
        if update.description.is_some() {
            active.description = Set(update.description);
        }
        if let Some(kind) = update.maintenance_type {
            active.maintenance_type = Set(kind);
        }
        if let Some(scheduled_for) = update.scheduled_for {
            active.scheduled_for = Set(scheduled_for);
            if was_overdue && scheduled_for > now {
                active.status = Set(MaintenanceStatus::Scheduled);
            }
        }
        if update.recurrence_days.is_some() {
            active.recurrence_days = Set(update.recurrence_days);
        }
        if update.assigned_to.is_some() {
            active.assigned_to = Set(update.assigned_to);
        }
        active.updated_at = Set(now);
        let updated = active.update(self.resources.db.as_ref()).await?;
        if reassigned {
            self.notify_assignee(&updated, "Maintenance assigned").await;
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let existing = self.get(id).await?;
        if existing.status == MaintenanceStatus::InProgress {
            return Err(AppError::conflict(format!(
                "Maintenance {id} is in progress; complete or cancel it first"
            )));
        }
        maintenance_schedule::Entity::delete_by_id(id)
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(())
    }

    async fn set_station_status(&self, station_id: i32, status: StationStatus) -> AppResult<()> {
        match StationsService::new(self.resources.db.clone())
            .set_status(station_id, status)
            .await
        {
            Err(AppError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Put the station back to active once no maintenance is in progress there.
    async fn release_station(&self, station_id: i32) -> AppResult<()> {
        let still_running = maintenance_schedule::Entity::find()
            .filter(maintenance_schedule::Column::StationId.eq(station_id))
            .filter(maintenance_schedule::Column::Status.eq(MaintenanceStatus::InProgress))
            .count(self.resources.db.as_ref())
            .await?;
        if still_running > 0 {
            return Ok(());
        }
        let station = monitoring_station::Entity::find_by_id(station_id)
            .one(self.resources.db.as_ref())
            .await?;
        if station.is_some_and(|s| s.status == StationStatus::Maintenance) {
            self.set_station_status(station_id, StationStatus::Active)
                .await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn start(&self, id: i32) -> AppResult<maintenance_schedule::Model> {
        let existing = self.get(id).await?;
        if !matches!(
            existing.status,
            MaintenanceStatus::Scheduled | MaintenanceStatus::Overdue
        ) {
            return Err(AppError::conflict(format!(
                "Maintenance {id} is {} and cannot be started",
                existing.status.to_value()
            )));
        }
        let now = OffsetDateTime::now_utc();
        let station_id = existing.station_id;
        let mut active: maintenance_schedule::ActiveModel = existing.into();
        active.status = Set(MaintenanceStatus::InProgress);
        active.started_at = Set(Some(now));
        active.updated_at = Set(now);
        let started = active.update(self.resources.db.as_ref()).await?;
        self.set_station_status(station_id, StationStatus::Maintenance)
            .await?;
        tracing::info!(
            name = "maintenance.start.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            schedule_id = id,
            station_id = station_id,
            message = "Maintenance started"
        );
        Ok(started)
    }

    /// Complete a schedule. Calibrations refresh the sensor calibration date and
    /// recurring schedules spawn their next occurrence.
    #[tracing::instrument(skip(self, notes))]
    pub async fn complete(&self, id: i32, notes: Option<String>) -> AppResult<CompletedMaintenance> {
        let existing = self.get(id).await?;
        if existing.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "Maintenance {id} is already {}",
                existing.status.to_value()
            )));
        }
        let now = OffsetDateTime::now_utc();
        let mut active: maintenance_schedule::ActiveModel = existing.clone().into();
        active.status = Set(MaintenanceStatus::Completed);
        if existing.started_at.is_none() {
            active.started_at = Set(Some(now));
        }
        active.completed_at = Set(Some(now));
        if notes.is_some() {
            active.notes = Set(notes);
        }
        active.updated_at = Set(now);
        let schedule = active.update(self.resources.db.as_ref()).await?;

        if schedule.maintenance_type == MaintenanceType::Calibration {
            if let Some(sensor_id) = schedule.sensor_id {
                self.mark_calibrated(sensor_id, now).await?;
            }
        }

        let next = match next_occurrence(&schedule) {
            Some(scheduled_for) => Some(
                maintenance_schedule::ActiveModel {
                    station_id: Set(schedule.station_id),
                    sensor_id: Set(schedule.sensor_id),
                    title: Set(schedule.title.clone()),
                    description: Set(schedule.description.clone()),
                    maintenance_type: Set(schedule.maintenance_type),
                    status: Set(MaintenanceStatus::Scheduled),
                    scheduled_for: Set(scheduled_for),
                    recurrence_days: Set(schedule.recurrence_days),
                    assigned_to: Set(schedule.assigned_to),
                    started_at: Set(None),
                    completed_at: Set(None),
                    notes: Set(None),
                    created_by: Set(schedule.created_by),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(self.resources.db.as_ref())
                .await?,
            ),
            None => None,
        };

        self.release_station(schedule.station_id).await?;
        tracing::info!(
            name = "maintenance.complete.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            schedule_id = id,
            next_id = next.as_ref().map(|n| n.id),
            message = "Maintenance completed"
        );
        Ok(CompletedMaintenance { schedule, next })
    }

    async fn mark_calibrated(&self, sensor_id: i32, at: OffsetDateTime) -> AppResult<()> {
        let Some(sensor) = sensor::Entity::find_by_id(sensor_id)
            .one(self.resources.db.as_ref())
            .await?
        else {
            return Ok(());
        };
        let was_calibrating = sensor.status == SensorStatus::Calibrating;
        let mut active: sensor::ActiveModel = sensor.into();
        active.calibrated_at = Set(Some(at));
        if was_calibrating {
            active.status = Set(SensorStatus::Active);
        }
        active.updated_at = Set(at);
        active.update(self.resources.db.as_ref()).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: i32) -> AppResult<maintenance_schedule::Model> {
        let existing = self.get(id).await?;
        if existing.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "Maintenance {id} is already {}",
                existing.status.to_value()
            )));
        }
        let was_in_progress = existing.status == MaintenanceStatus::InProgress;
        let mut active: maintenance_schedule::ActiveModel = existing.into();
        active.status = Set(MaintenanceStatus::Cancelled);
        active.updated_at = Set(OffsetDateTime::now_utc());
        let cancelled = active.update(self.resources.db.as_ref()).await?;
        if was_in_progress {
            self.release_station(cancelled.station_id).await?;
        }
        Ok(cancelled)
    }

    /// Scheduled entries due within the next `days` days.
    pub async fn upcoming(&self, days: u32) -> AppResult<Vec<maintenance_schedule::Model>> {
        let now = OffsetDateTime::now_utc();
        Ok(maintenance_schedule::Entity::find()
            .filter(maintenance_schedule::Column::Status.eq(MaintenanceStatus::Scheduled))
            .filter(maintenance_schedule::Column::ScheduledFor.gte(now))
            .filter(
                maintenance_schedule::Column::ScheduledFor
                    .lte(now.saturating_add(Duration::days(i64::from(days)))),
            )
            .order_by_asc(maintenance_schedule::Column::ScheduledFor)
            .all(self.resources.db.as_ref())
            .await?)
    }

    /// Flag scheduled entries past their date (plus grace period) as overdue and
    /// notify the assignee, or the admins when nobody is assigned.
    #[tracing::instrument(skip(self))]
    pub async fn mark_overdue(&self) -> AppResult<u64> {
        let grace = SettingsService::new(self.resources.db.clone())
            .get_i64_within(MAINTENANCE_OVERDUE_GRACE_MINUTES, 60, MINUTES_SETTING_RANGE)
            .await;
        let now = OffsetDateTime::now_utc();
        let due = maintenance_schedule::Entity::find()
            .filter(maintenance_schedule::Column::Status.eq(MaintenanceStatus::Scheduled))
            .filter(maintenance_schedule::Column::ScheduledFor.lt(now - Duration::minutes(grace)))
            .all(self.resources.db.as_ref())
            .await?;
        let mut flagged = 0;
        for schedule in due {
            let mut active: maintenance_schedule::ActiveModel = schedule.into();
            active.status = Set(MaintenanceStatus::Overdue);
            active.updated_at = Set(now);
            let overdue = active.update(self.resources.db.as_ref()).await?;
            self.notify_assignee(&overdue, "Maintenance overdue").await;
            flagged += 1;
        }
        if flagged > 0 {
            tracing::info!(
                name = "maintenance.overdue_sweep.completed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                flagged = flagged,
                message = "Flagged overdue maintenance"
            );
        }
        Ok(flagged)
    }
}

pub fn spawn_overdue_task(resources: Arc<AppResources>) {
    tokio::spawn(async move {
        let service = MaintenanceSchedulesService::new((*resources).clone());
        let mut interval = tokio::time::interval(OVERDUE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = service.mark_overdue().await {
                tracing::warn!(
                    name = "maintenance.overdue_sweep.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Overdue maintenance sweep failed"
                );
            }
        }
    });
}
