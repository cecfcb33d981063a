//! Sensor endpoints.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::sensor;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use crate::sensors::{NewSensor, SensorFilter, SensorUpdate, SensorsService};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const SENSORS_TAG: &str = "Sensors";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_sensors, create_sensor))
        .routes(routes!(get_sensor, update_sensor, delete_sensor))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = SENSORS_TAG,
    operation_id = "List Sensors",
    params(SensorFilter, PageParams),
    responses((status = 200, description = "Page of sensors"))
)]
async fn list_sensors(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<SensorFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<sensor::Model>>> {
    let sensors = SensorsService::new(resources.db.clone())
        .list(&filter, page)
        .await?;
    Ok(Json(sensors))
}

#[tracing::instrument(skip(resources, auth, payload), fields(station_id = payload.station_id))]
#[utoipa::path(
    post,
    path = "",
    tag = SENSORS_TAG,
    operation_id = "Create Sensor",
    request_body = NewSensor,
    responses(
        (status = 201, description = "Sensor created", body = sensor::Model),
        (status = 400, description = "Unknown station, incompatible unit or invalid range", body = ErrorBody),
        (status = 409, description = "Serial number already registered", body = ErrorBody),
    )
)]
async fn create_sensor(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewSensor>,
) -> AppResult<(StatusCode, Json<sensor::Model>)> {
    auth.require(Role::Operator)?;
    let sensor = SensorsService::new(resources.db.clone())
        .create(payload)
        .await?;
    Ok((StatusCode::CREATED, Json(sensor)))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = SENSORS_TAG,
    operation_id = "Get Sensor",
    params(("id" = i32, Path, description = "Sensor ID")),
    responses(
        (status = 200, description = "Sensor", body = sensor::Model),
        (status = 404, description = "Sensor not found", body = ErrorBody),
    )
)]
async fn get_sensor(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<sensor::Model>> {
    Ok(Json(SensorsService::new(resources.db.clone()).get(id).await?))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    patch,
    path = "/{id}",
    tag = SENSORS_TAG,
    operation_id = "Update Sensor",
    params(("id" = i32, Path, description = "Sensor ID")),
    request_body = SensorUpdate,
    responses(
        (status = 200, description = "Updated sensor", body = sensor::Model),
        (status = 404, description = "Sensor not found", body = ErrorBody),
    )
)]
async fn update_sensor(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    Json(payload): Json<SensorUpdate>,
) -> AppResult<Json<sensor::Model>> {
    auth.require(Role::Operator)?;
    let sensor = SensorsService::new(resources.db.clone())
        .update(id, payload)
        .await?;
    Ok(Json(sensor))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = SENSORS_TAG,
    operation_id = "Delete Sensor",
    params(("id" = i32, Path, description = "Sensor ID")),
    responses(
        (status = 204, description = "Sensor and its readings deleted"),
        (status = 404, description = "Sensor not found", body = ErrorBody),
    )
)]
async fn delete_sensor(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Operator)?;
    SensorsService::new(resources.db.clone()).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
