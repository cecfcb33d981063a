//! Asynchronous data exports.
//!
//! A request stores a pending row and hands the work to a background task,
//! which queries the data, renders it and writes the file next to the other
//! exports. The requester gets a notification once the file is ready or the
//! export failed. Files expire after the configured retention and are removed
//! by an hourly cleanup.

pub mod format;

use crate::AppResources;
use crate::entity::data_export::{self, ExportFormat, ExportStatus, ExportType};
use crate::entity::notification::NotificationType;
use crate::entity::sensor::SensorType;
use crate::entity::station_alert::{self, AlertStatus};
use crate::entity::system_event::EventSeverity;
use crate::entity::threshold::Severity;
use crate::entity::user::{self, Role};
use crate::error::{AppError, AppResult};
use crate::exports::format::{ExportError, ExportTable};
use crate::notifications::{NewNotification, NotificationsService};
use crate::pagination::{Page, PageParams, paginate};
use crate::readings::analysis::Bucket;
use crate::readings::{ReadingFilter, SensorReadingsService};
use crate::system::SystemService;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

pub const MAX_EXPORT_ROWS: u64 = 100_000;
pub const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Selection applied to the exported data. Stored as JSON on the export row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ExportFilters {
    pub station_id: Option<i32>,
    pub sensor_id: Option<i32>,
    pub sensor_type: Option<SensorType>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    /// Alerts only
    pub status: Option<AlertStatus>,
    /// Alerts only
    pub severity: Option<Severity>,
    /// Aggregates only; defaults to hourly
    pub bucket: Option<Bucket>,
}

impl ExportFilters {
    pub fn validate(&self) -> AppResult<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::bad_request("'from' must not be after 'to'"));
            }
        }
        Ok(())
    }

    fn reading_filter(&self) -> ReadingFilter {
        ReadingFilter {
            station_id: self.station_id,
            sensor_id: self.sensor_id,
            sensor_type: self.sensor_type,
            from: self.from,
            to: self.to,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExportRequest {
    pub export_type: ExportType,
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: ExportFilters,
}

/// A finished export file ready to be streamed to the client.
#[derive(Debug)]
pub struct ExportDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

pub fn file_name(export: &data_export::Model) -> String {
    format!("export-{}.{}", export.id, export.format.extension())
}

pub struct DataExportService {
    resources: AppResources,
}

impl DataExportService {
    pub fn new(resources: AppResources) -> Self {
        Self { resources }
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from(&self.resources.config.exports.directory)
    }

    /// Store a pending export and start processing it in the background.
    #[tracing::instrument(skip(self, requester, filters), fields(user_id = requester.id))]
    pub async fn request(
        &self,
        requester: &user::Model,
        export_type: ExportType,
        format: ExportFormat,
        filters: ExportFilters,
    ) -> AppResult<data_export::Model> {
        let export = self
            .enqueue(requester, export_type, format, filters)
            .await?;
        let resources = self.resources.clone();
        let id = export.id;
        tokio::spawn(async move {
            if let Err(e) = DataExportService::new(resources).process(id).await {
                tracing::error!(
                    name = "exports.process.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    export_id = id,
                    error = %e,
                    message = "Export task could not record its outcome"
                );
            }
        });
        Ok(export)
    }

    /// Store a pending export without starting it.
    pub async fn enqueue(
        &self,
        requester: &user::Model,
        export_type: ExportType,
        format: ExportFormat,
        filters: ExportFilters,
    ) -> AppResult<data_export::Model> {
        filters.validate()?;
        let filters = serde_json::to_string(&filters)
            .map_err(|e| AppError::Internal(format!("Failed to serialize filters: {e}")))?;
        Ok(data_export::ActiveModel {
            requested_by: Set(requester.id),
            export_type: Set(export_type),
            format: Set(format),
            filters: Set(filters),
            status: Set(ExportStatus::Pending),
            file_path: Set(None),
            file_size: Set(None),
            row_count: Set(None),
            error_message: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
            completed_at: Set(None),
            expires_at: Set(None),
            ..Default::default()
        }
        .insert(self.resources.db.as_ref())
        .await?)
    }

    /// Run a pending export to completion. Rendering failures are stored on the
    /// row; only failures to update the row itself are returned.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, id: i32) -> AppResult<data_export::Model> {
        let export = data_export::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Export {id} not found")))?;
        let mut active: data_export::ActiveModel = export.clone().into();
        active.status = Set(ExportStatus::Processing);
        let export = active.update(self.resources.db.as_ref()).await?;

        let outcome = self.render_to_file(&export).await;
        let now = OffsetDateTime::now_utc();
        let mut active: data_export::ActiveModel = export.clone().into();
        active.completed_at = Set(Some(now));
        let finished = match outcome {
            Ok((path, size, rows)) => {
                let retention = Duration::hours(i64::from(self.resources.config.exports.retention_hours));
                active.status = Set(ExportStatus::Completed);
                active.file_path = Set(Some(path.to_string_lossy().into_owned()));
                active.file_size = Set(Some(size));
                active.row_count = Set(Some(rows));
                active.expires_at = Set(Some(now + retention));
                let finished = active.update(self.resources.db.as_ref()).await?;
                tracing::info!(
                    name = "exports.process.completed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    export_id = id,
                    rows = rows,
                    size = size,
                    message = "Export completed"
                );
                finished
            }
            Err(e) => {
                tracing::warn!(
                    name = "exports.process.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    export_id = id,
                    error = %e,
                    message = "Export failed"
                );
                active.status = Set(ExportStatus::Failed);
                active.error_message = Set(Some(e.to_string()));
                let finished = active.update(self.resources.db.as_ref()).await?;
                SystemService::new(self.resources.db.clone())
                    .record(
                        "export.failed",
                        EventSeverity::Error,
                        "exports",
                        &format!("Export {id} failed: {e}"),
                        Some(serde_json::json!({ "export_id": id })),
                    )
                    .await;
                finished
            }
        };
        self.notify_requester(&finished).await;
        Ok(finished)
    }

    async fn notify_requester(&self, export: &data_export::Model) {
        let kind = export.export_type.to_value();
        let note = match export.status {
            ExportStatus::Completed => NewNotification::new(
                NotificationType::Export,
                "Export ready",
                format!(
                    "Your {kind} export ({} rows) is ready for download",
                    export.row_count.unwrap_or(0)
                ),
            ),
            _ => NewNotification::new(
                NotificationType::Export,
                "Export failed",
                format!(
                    "Your {kind} export failed: {}",
                    export.error_message.as_deref().unwrap_or("unknown error")
                ),
            ),
        }
        .related("data_export", export.id);
        if let Err(e) = NotificationsService::new(self.resources.clone())
            .notify_user(export.requested_by, &note)
            .await
        {
            tracing::warn!(
                name = "exports.notify.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                export_id = export.id,
                error = %e,
                message = "Failed to notify export requester"
            );
        }
    }

    async fn render_to_file(
        &self,
        export: &data_export::Model,
    ) -> Result<(PathBuf, i64, i32), ExportError> {
        let filters: ExportFilters = serde_json::from_str(&export.filters)?;
        let table = self.build_table(export.export_type, &filters).await?;
        let bytes = table.render(export.format)?;
        let directory = self.directory();
        tokio::fs::create_dir_all(&directory).await?;
        let path = directory.join(file_name(export));
        tokio::fs::write(&path, &bytes).await?;
        Ok((path, bytes.len() as i64, table.len() as i32))
    }

    async fn build_table(
        &self,
        export_type: ExportType,
        filters: &ExportFilters,
    ) -> Result<ExportTable, ExportError> {
        match export_type {
            ExportType::Readings => self.readings_table(filters).await,
            ExportType::Alerts => self.alerts_table(filters).await,
            ExportType::Aggregates => self.aggregates_table(filters).await,
        }
    }

    async fn readings_table(&self, filters: &ExportFilters) -> Result<ExportTable, ExportError> {
        let readings = SensorReadingsService::new(self.resources.clone())
            .fetch(&filters.reading_filter(), MAX_EXPORT_ROWS + 1)
            .await
            .map_err(|e| ExportError::Query(e.to_string()))?;
        check_row_limit(readings.len())?;
        let mut table = ExportTable::new(
            "readings",
            vec![
                "id",
                "station_id",
                "sensor_id",
                "recorded_at",
                "value",
                "unit",
                "quality_score",
                "is_anomaly",
            ],
        );
        for r in readings {
            table.push(vec![
                r.id.into(),
                r.station_id.into(),
                r.sensor_id.into(),
                timestamp(r.recorded_at).into(),
                r.value.into(),
                r.unit.into(),
                r.quality_score.into(),
                r.is_anomaly.into(),
            ]);
        }
        Ok(table)
    }

    async fn alerts_table(&self, filters: &ExportFilters) -> Result<ExportTable, ExportError> {
        let mut query = station_alert::Entity::find();
        if let Some(station_id) = filters.station_id {
            query = query.filter(station_alert::Column::StationId.eq(station_id));
        }
        if let Some(sensor_id) = filters.sensor_id {
            query = query.filter(station_alert::Column::SensorId.eq(sensor_id));
        }
        if let Some(status) = filters.status {
            query = query.filter(station_alert::Column::Status.eq(status));
        }
        if let Some(severity) = filters.severity {
            query = query.filter(station_alert::Column::Severity.eq(severity));
        }
        if let Some(from) = filters.from {
            query = query.filter(station_alert::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filters.to {
            query = query.filter(station_alert::Column::CreatedAt.lte(to));
        }
        let alerts = query
            .order_by_asc(station_alert::Column::CreatedAt)
            .order_by_asc(station_alert::Column::Id)
            .limit(MAX_EXPORT_ROWS + 1)
            .all(self.resources.db.as_ref())
            .await
            .map_err(|e| ExportError::Query(e.to_string()))?;
        check_row_limit(alerts.len())?;
        let mut table = ExportTable::new(
            "alerts",
            vec![
                "id",
                "station_id",
                "sensor_id",
                "alert_type",
                "severity",
                "status",
                "message",
                "value",
                "created_at",
                "acknowledged_at",
                "resolved_at",
            ],
        );
        for a in alerts {
            table.push(vec![
                a.id.into(),
                a.station_id.into(),
                a.sensor_id.into(),
                a.alert_type.to_value().into(),
                a.severity.as_str().into(),
                a.status.to_value().into(),
                a.message.into(),
                a.value.into(),
                timestamp(a.created_at).into(),
                a.acknowledged_at.map(timestamp).into(),
                a.resolved_at.map(timestamp).into(),
            ]);
        }
        Ok(table)
    }

    async fn aggregates_table(&self, filters: &ExportFilters) -> Result<ExportTable, ExportError> {
        let aggregator = SensorReadingsService::new(self.resources.clone())
            .aggregator(&filters.reading_filter(), filters.bucket.unwrap_or(Bucket::Hour))
            .await
            .map_err(|e| ExportError::Query(e.to_string()))?;
        check_row_limit(aggregator.len())?;
        let rows = aggregator.finish();
        let mut table = ExportTable::new(
            "aggregates",
            vec!["sensor_id", "bucket_start", "count", "min", "max", "avg"],
        );
        for row in rows {
            table.push(vec![
                row.sensor_id.into(),
                timestamp(row.bucket_start).into(),
                row.count.into(),
                row.min.into(),
                row.max.into(),
                row.avg.into(),
            ]);
        }
        Ok(table)
    }

    /// Exports visible to `viewer`: their own, or all of them for admins.
    pub async fn list(
        &self,
        viewer: &user::Model,
        page: PageParams,
    ) -> AppResult<Page<data_export::Model>> {
        let mut query = data_export::Entity::find();
        if !viewer.has_role(Role::Admin) {
            query = query.filter(data_export::Column::RequestedBy.eq(viewer.id));
        }
        let query = query
            .order_by_desc(data_export::Column::CreatedAt)
            .order_by_desc(data_export::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    pub async fn get(&self, viewer: &user::Model, id: i32) -> AppResult<data_export::Model> {
        let export = data_export::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Export {id} not found")))?;
        // Other users' exports are reported as missing
        if export.requested_by != viewer.id && !viewer.has_role(Role::Admin) {
            return Err(AppError::not_found(format!("Export {id} not found")));
        }
        Ok(export)
    }

    pub async fn download(&self, viewer: &user::Model, id: i32) -> AppResult<ExportDownload> {
        let export = self.get(viewer, id).await?;
        if export.status != ExportStatus::Completed {
            return Err(AppError::conflict(format!(
                "Export {id} is {} and cannot be downloaded",
                export.status.to_value()
            )));
        }
        if export
            .expires_at
            .is_some_and(|at| at <= OffsetDateTime::now_utc())
        {
            return Err(AppError::conflict(format!("Export {id} has expired")));
        }
        let path = export
            .file_path
            .as_deref()
            .ok_or_else(|| AppError::not_found(format!("Export {id} has no file")))?;
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::not_found(format!("Export file for {id} is missing"))
            }
            _ => AppError::Internal(format!("Failed to read export {id}: {e}")),
        })?;
        Ok(ExportDownload {
            file_name: file_name(&export),
            content_type: export.format.content_type(),
            bytes,
        })
    }

    pub async fn delete(&self, viewer: &user::Model, id: i32) -> AppResult<()> {
        let export = self.get(viewer, id).await?;
        if let Some(path) = &export.file_path {
            remove_file(Path::new(path)).await;
        }
        data_export::Entity::delete_by_id(id)
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete expired exports together with their files.
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        let expired = data_export::Entity::find()
            .filter(data_export::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .all(self.resources.db.as_ref())
            .await?;
        let mut removed = 0;
        for export in expired {
            if let Some(path) = &export.file_path {
                remove_file(Path::new(path)).await;
            }
            data_export::Entity::delete_by_id(export.id)
                .exec(self.resources.db.as_ref())
                .await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(
                name = "exports.cleanup.completed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                removed = removed,
                message = "Removed expired exports"
            );
        }
        Ok(removed)
    }
}

fn check_row_limit(rows: usize) -> Result<(), ExportError> {
    if rows as u64 > MAX_EXPORT_ROWS {
        return Err(ExportError::TooManyRows {
            limit: MAX_EXPORT_ROWS,
        });
    }
    Ok(())
}

async fn remove_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                name = "exports.remove_file.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                path = %path.display(),
                error = %e,
                message = "Failed to remove export file"
            );
        }
    }
}

pub fn spawn_cleanup_task(resources: Arc<AppResources>) {
    tokio::spawn(async move {
        let service = DataExportService::new((*resources).clone());
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = service.cleanup_expired().await {
                tracing::warn!(
                    name = "exports.cleanup.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Export cleanup failed"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn filters_roundtrip_through_storage() {
        let filters = ExportFilters {
            station_id: Some(3),
            from: Some(datetime!(2026-10-01 00:00 UTC)),
            bucket: Some(Bucket::Day),
            ..Default::default()
        };
        let stored = serde_json::to_string(&filters).unwrap();
        assert_eq!(serde_json::from_str::<ExportFilters>(&stored).unwrap(), filters);
        assert_eq!(serde_json::from_str::<ExportFilters>("{}").unwrap(), ExportFilters::default());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let filters = ExportFilters {
            from: Some(datetime!(2026-10-02 00:00 UTC)),
            to: Some(datetime!(2026-10-01 00:00 UTC)),
            ..Default::default()
        };
        assert!(filters.validate().is_err());
    }

    #[test]
    fn row_limit() {
        assert!(check_row_limit(MAX_EXPORT_ROWS as usize).is_ok());
        assert!(matches!(
            check_row_limit(MAX_EXPORT_ROWS as usize + 1),
            Err(ExportError::TooManyRows { .. })
        ));
    }
}
