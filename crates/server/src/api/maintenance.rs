//! Maintenance schedule endpoints.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::maintenance_schedule;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::maintenance::{
    CompletedMaintenance, MaintenanceFilter, MaintenanceSchedulesService, MaintenanceUpdate,
    NewMaintenance,
};
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const MAINTENANCE_TAG: &str = "Maintenance";

#[derive(Debug, Deserialize, IntoParams)]
pub struct UpcomingParams {
    /// Look-ahead window in days (default 7, max 365)
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CompleteRequest {
    pub notes: Option<String>,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_maintenance, create_maintenance))
        .routes(routes!(upcoming_maintenance))
        .routes(routes!(get_maintenance, update_maintenance, delete_maintenance))
        .routes(routes!(start_maintenance))
        .routes(routes!(complete_maintenance))
        .routes(routes!(cancel_maintenance))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = MAINTENANCE_TAG,
    operation_id = "List Maintenance",
    params(MaintenanceFilter, PageParams),
    responses((status = 200, description = "Page of maintenance schedules ordered by date"))
)]
async fn list_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<MaintenanceFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<maintenance_schedule::Model>>> {
    let schedules = MaintenanceSchedulesService::new(resources)
        .list(&filter, page)
        .await?;
    Ok(Json(schedules))
}

#[tracing::instrument(skip(resources, auth, payload), fields(station_id = payload.station_id))]
#[utoipa::path(
    post,
    path = "",
    tag = MAINTENANCE_TAG,
    operation_id = "Create Maintenance",
    request_body = NewMaintenance,
    responses(
        (status = 201, description = "Maintenance scheduled", body = maintenance_schedule::Model),
        (status = 400, description = "Unknown station, foreign sensor or invalid recurrence", body = ErrorBody),
    )
)]
async fn create_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewMaintenance>,
) -> AppResult<(StatusCode, Json<maintenance_schedule::Model>)> {
    auth.require(Role::Operator)?;
    let schedule = MaintenanceSchedulesService::new(resources)
        .create(payload, Some(auth.id()))
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/upcoming",
    tag = MAINTENANCE_TAG,
    operation_id = "Upcoming Maintenance",
    params(UpcomingParams),
    responses((status = 200, description = "Scheduled entries due in the window", body = [maintenance_schedule::Model]))
)]
async fn upcoming_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(params): Query<UpcomingParams>,
) -> AppResult<Json<Vec<maintenance_schedule::Model>>> {
    let days = params.days.unwrap_or(7).min(365);
    Ok(Json(
        MaintenanceSchedulesService::new(resources)
            .upcoming(days)
            .await?,
    ))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = MAINTENANCE_TAG,
    operation_id = "Get Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Maintenance schedule", body = maintenance_schedule::Model),
        (status = 404, description = "Schedule not found", body = ErrorBody),
    )
)]
async fn get_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<maintenance_schedule::Model>> {
    Ok(Json(MaintenanceSchedulesService::new(resources).get(id).await?))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    patch,
    path = "/{id}",
    tag = MAINTENANCE_TAG,
    operation_id = "Update Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    request_body = MaintenanceUpdate,
    responses(
        (status = 200, description = "Updated schedule", body = maintenance_schedule::Model),
        (status = 404, description = "Schedule not found", body = ErrorBody),
        (status = 409, description = "Schedule already started or finished", body = ErrorBody),
    )
)]
async fn update_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    Json(payload): Json<MaintenanceUpdate>,
) -> AppResult<Json<maintenance_schedule::Model>> {
    auth.require(Role::Operator)?;
    Ok(Json(
        MaintenanceSchedulesService::new(resources)
            .update(id, payload)
            .await?,
    ))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = MAINTENANCE_TAG,
    operation_id = "Delete Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 404, description = "Schedule not found", body = ErrorBody),
        (status = 409, description = "Schedule is in progress", body = ErrorBody),
    )
)]
async fn delete_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Operator)?;
    MaintenanceSchedulesService::new(resources).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    post,
    path = "/{id}/start",
    tag = MAINTENANCE_TAG,
    operation_id = "Start Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Maintenance in progress; station set to maintenance", body = maintenance_schedule::Model),
        (status = 409, description = "Schedule is not scheduled or overdue", body = ErrorBody),
    )
)]
async fn start_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<maintenance_schedule::Model>> {
    auth.require(Role::Operator)?;
    Ok(Json(MaintenanceSchedulesService::new(resources).start(id).await?))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    post,
    path = "/{id}/complete",
    tag = MAINTENANCE_TAG,
    operation_id = "Complete Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    request_body = CompleteRequest,
    responses(
        (status = 200, description = "Completed schedule and the next occurrence of recurring ones", body = CompletedMaintenance),
        (status = 409, description = "Schedule already completed or cancelled", body = ErrorBody),
    )
)]
async fn complete_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    payload: Option<Json<CompleteRequest>>,
) -> AppResult<Json<CompletedMaintenance>> {
    auth.require(Role::Operator)?;
    let notes = payload.and_then(|Json(p)| p.notes);
    Ok(Json(
        MaintenanceSchedulesService::new(resources)
            .complete(id, notes)
            .await?,
    ))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tag = MAINTENANCE_TAG,
    operation_id = "Cancel Maintenance",
    params(("id" = i32, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Schedule cancelled", body = maintenance_schedule::Model),
        (status = 409, description = "Schedule already completed or cancelled", body = ErrorBody),
    )
)]
async fn cancel_maintenance(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<maintenance_schedule::Model>> {
    auth.require(Role::Operator)?;
    Ok(Json(MaintenanceSchedulesService::new(resources).cancel(id).await?))
}
