//! System events (audit trail of background jobs and administrative actions)
//! and service health.

use crate::entity::system_event::{self, EventSeverity};
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use once_cell::sync::Lazy;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

/// Pin the uptime origin. Called once at startup.
pub fn mark_started() {
    Lazy::force(&STARTED_AT);
}

pub fn uptime_seconds() -> u64 {
    STARTED_AT.elapsed().as_secs()
}

#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
pub struct EventFilter {
    pub severity: Option<EventSeverity>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[param(value_type = Option<String>, format = DateTime)]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[param(value_type = Option<String>, format = DateTime)]
    pub to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    /// "ok" or "degraded"
    pub status: String,
    pub database: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

pub struct SystemService {
    db: Arc<DatabaseConnection>,
}

impl SystemService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an event. Failures are logged and swallowed so callers never fail
    /// because the audit trail could not be written.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn record(
        &self,
        event_type: &str,
        severity: EventSeverity,
        source: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) {
        let model = system_event::ActiveModel {
            event_type: Set(event_type.to_string()),
            severity: Set(severity),
            source: Set(source.to_string()),
            message: Set(message.to_string()),
            metadata: Set(metadata.map(|m| m.to_string())),
            created_at: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        if let Err(e) = model.insert(self.db.as_ref()).await {
            tracing::warn!(
                name = "system.record_event.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                event_type = %event_type,
                error = %e,
                message = "Failed to record system event"
            );
        }
    }

    pub async fn list_events(
        &self,
        filter: &EventFilter,
        page: PageParams,
    ) -> AppResult<Page<system_event::Model>> {
        let mut query = system_event::Entity::find();
        if let Some(severity) = filter.severity {
            query = query.filter(system_event::Column::Severity.eq(severity));
        }
        if let Some(event_type) = &filter.event_type {
            query = query.filter(system_event::Column::EventType.eq(event_type.as_str()));
        }
        if let Some(source) = &filter.source {
            query = query.filter(system_event::Column::Source.eq(source.as_str()));
        }
        if let Some(from) = filter.from {
            query = query.filter(system_event::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(system_event::Column::CreatedAt.lte(to));
        }
        let query = query
            .order_by_desc(system_event::Column::CreatedAt)
            .order_by_desc(system_event::Column::Id);
        Ok(paginate(query, self.db.as_ref(), page).await?)
    }

    pub async fn health(&self) -> HealthReport {
        let database = match self.db.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    name = "system.health.database_unreachable",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Database ping failed"
                );
                false
            }
        };
        HealthReport {
            status: if database { "ok" } else { "degraded" }.to_string(),
            database,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime_seconds(),
        }
    }

    /// Delete events older than the given number of days.
    #[tracing::instrument(skip(self))]
    pub async fn purge_events(&self, older_than_days: u32) -> AppResult<u64> {
        let cutoff = OffsetDateTime::now_utc()
            .checked_sub(time::Duration::days(i64::from(older_than_days)))
            .ok_or_else(|| {
                AppError::bad_request(format!("older_than_days={older_than_days} is out of range"))
            })?;
        let result = system_event::Entity::delete_many()
            .filter(system_event::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
