//! Station alert endpoints.

use crate::AppResources;
use crate::alerts::{AlertFilter, AlertSummary, StationAlertService};
use crate::api::auth::SessionAuth;
use crate::entity::station_alert;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query},
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const ALERTS_TAG: &str = "Alerts";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_alerts))
        .routes(routes!(alert_summary))
        .routes(routes!(get_alert))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = ALERTS_TAG,
    operation_id = "List Alerts",
    params(AlertFilter, PageParams),
    responses((status = 200, description = "Page of alerts, newest first"))
)]
async fn list_alerts(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<AlertFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<station_alert::Model>>> {
    let alerts = StationAlertService::new(resources)
        .list(&filter, page)
        .await?;
    Ok(Json(alerts))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/summary",
    tag = ALERTS_TAG,
    operation_id = "Alert Summary",
    responses((status = 200, description = "Counts by status and open counts by severity", body = AlertSummary))
)]
async fn alert_summary(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
) -> AppResult<Json<AlertSummary>> {
    Ok(Json(StationAlertService::new(resources).summary().await?))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = ALERTS_TAG,
    operation_id = "Get Alert",
    params(("id" = i32, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert", body = station_alert::Model),
        (status = 404, description = "Alert not found", body = ErrorBody),
    )
)]
async fn get_alert(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<station_alert::Model>> {
    Ok(Json(StationAlertService::new(resources).get(id).await?))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/{id}/acknowledge",
    tag = ALERTS_TAG,
    operation_id = "Acknowledge Alert",
    params(("id" = i32, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert acknowledged", body = station_alert::Model),
        (status = 404, description = "Alert not found", body = ErrorBody),
        (status = 409, description = "Alert is not active", body = ErrorBody),
    )
)]
async fn acknowledge_alert(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<station_alert::Model>> {
    auth.require(Role::Operator)?;
    let alert = StationAlertService::new(resources)
        .acknowledge(id, auth.id())
        .await?;
    Ok(Json(alert))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/{id}/resolve",
    tag = ALERTS_TAG,
    operation_id = "Resolve Alert",
    params(("id" = i32, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert resolved", body = station_alert::Model),
        (status = 404, description = "Alert not found", body = ErrorBody),
        (status = 409, description = "Alert already resolved", body = ErrorBody),
    )
)]
async fn resolve_alert(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<station_alert::Model>> {
    auth.require(Role::Operator)?;
    let alert = StationAlertService::new(resources)
        .resolve(id, auth.id())
        .await?;
    Ok(Json(alert))
}
