//! System events and detailed health.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::system_event;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use crate::system::{EventFilter, HealthReport, SystemService};
use axum::{
    Extension, Json,
    extract::Query,
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const SYSTEM_TAG: &str = "System";

#[derive(Debug, Deserialize, IntoParams)]
pub struct PurgeParams {
    /// Delete events older than this many days
    pub older_than_days: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurgeResponse {
    pub deleted: u64,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_events, purge_events))
        .routes(routes!(system_health))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    get,
    path = "/events",
    tag = SYSTEM_TAG,
    operation_id = "List System Events",
    params(EventFilter, PageParams),
    responses(
        (status = 200, description = "Page of events, newest first"),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn list_events(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(filter): Query<EventFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<system_event::Model>>> {
    auth.require(Role::Admin)?;
    let events = SystemService::new(resources.db.clone())
        .list_events(&filter, page)
        .await?;
    Ok(Json(events))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/events",
    tag = SYSTEM_TAG,
    operation_id = "Purge System Events",
    params(PurgeParams),
    responses(
        (status = 200, description = "Number of deleted events", body = PurgeResponse),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn purge_events(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(params): Query<PurgeParams>,
) -> AppResult<Json<PurgeResponse>> {
    auth.require(Role::Admin)?;
    let deleted = SystemService::new(resources.db.clone())
        .purge_events(params.older_than_days)
        .await?;
    Ok(Json(PurgeResponse { deleted }))
}

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/health",
    tag = SYSTEM_TAG,
    operation_id = "System Health",
    description = "Database reachability, build version and process uptime. No authentication required.",
    responses(
        (status = 200, description = "Service healthy", body = HealthReport),
        (status = 503, description = "Database unreachable", body = HealthReport),
    )
)]
async fn system_health(
    Extension(resources): Extension<AppResources>,
) -> (StatusCode, Json<HealthReport>) {
    let report = SystemService::new(resources.db.clone()).health().await;
    let status = if report.database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
