//! Monitoring station endpoints, including per-station and fleet statistics.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::monitoring_station;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use crate::readings::SensorReadingsService;
use crate::entity::sensor_reading;
use crate::stations::stats::{MonitoringStationStatsService, StationStats, StationsOverview};
use crate::stations::{NewStation, StationFilter, StationUpdate, StationsService};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const STATIONS_TAG: &str = "Stations";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_stations, create_station))
        .routes(routes!(overview))
        .routes(routes!(get_station, update_station, delete_station))
        .routes(routes!(station_stats))
        .routes(routes!(latest_readings))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = STATIONS_TAG,
    operation_id = "List Stations",
    params(StationFilter, PageParams),
    responses((status = 200, description = "Page of stations"))
)]
async fn list_stations(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<StationFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<monitoring_station::Model>>> {
    let stations = StationsService::new(resources.db.clone())
        .list(&filter, page)
        .await?;
    Ok(Json(stations))
}

#[tracing::instrument(skip(resources, auth, payload), fields(code = %payload.code))]
#[utoipa::path(
    post,
    path = "",
    tag = STATIONS_TAG,
    operation_id = "Create Station",
    request_body = NewStation,
    responses(
        (status = 201, description = "Station created", body = monitoring_station::Model),
        (status = 400, description = "Invalid coordinates or empty fields", body = ErrorBody),
        (status = 409, description = "Station code already in use", body = ErrorBody),
    )
)]
async fn create_station(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewStation>,
) -> AppResult<(StatusCode, Json<monitoring_station::Model>)> {
    auth.require(Role::Operator)?;
    let station = StationsService::new(resources.db.clone())
        .create(payload)
        .await?;
    Ok((StatusCode::CREATED, Json(station)))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/overview",
    tag = STATIONS_TAG,
    operation_id = "Stations Overview",
    responses((status = 200, description = "Fleet-wide counts", body = StationsOverview))
)]
async fn overview(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
) -> AppResult<Json<StationsOverview>> {
    let overview = MonitoringStationStatsService::new(resources.db.clone())
        .overview()
        .await?;
    Ok(Json(overview))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = STATIONS_TAG,
    operation_id = "Get Station",
    params(("id" = i32, Path, description = "Station ID")),
    responses(
        (status = 200, description = "Station", body = monitoring_station::Model),
        (status = 404, description = "Station not found", body = ErrorBody),
    )
)]
async fn get_station(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<monitoring_station::Model>> {
    Ok(Json(StationsService::new(resources.db.clone()).get(id).await?))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    patch,
    path = "/{id}",
    tag = STATIONS_TAG,
    operation_id = "Update Station",
    params(("id" = i32, Path, description = "Station ID")),
    request_body = StationUpdate,
    responses(
        (status = 200, description = "Updated station", body = monitoring_station::Model),
        (status = 404, description = "Station not found", body = ErrorBody),
        (status = 409, description = "Station code already in use", body = ErrorBody),
    )
)]
async fn update_station(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    Json(payload): Json<StationUpdate>,
) -> AppResult<Json<monitoring_station::Model>> {
    auth.require(Role::Operator)?;
    let station = StationsService::new(resources.db.clone())
        .update(id, payload)
        .await?;
    Ok(Json(station))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = STATIONS_TAG,
    operation_id = "Delete Station",
    description = "Deletes the station together with its sensors, readings, alerts and maintenance entries.",
    params(("id" = i32, Path, description = "Station ID")),
    responses(
        (status = 204, description = "Station deleted"),
        (status = 404, description = "Station not found", body = ErrorBody),
    )
)]
async fn delete_station(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Operator)?;
    StationsService::new(resources.db.clone()).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}/stats",
    tag = STATIONS_TAG,
    operation_id = "Station Statistics",
    params(("id" = i32, Path, description = "Station ID")),
    responses(
        (status = 200, description = "Station statistics", body = StationStats),
        (status = 404, description = "Station not found", body = ErrorBody),
    )
)]
async fn station_stats(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<StationStats>> {
    let stats = MonitoringStationStatsService::new(resources.db.clone())
        .station_stats(id)
        .await?;
    Ok(Json(stats))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}/latest",
    tag = STATIONS_TAG,
    operation_id = "Latest Station Readings",
    params(("id" = i32, Path, description = "Station ID")),
    responses(
        (status = 200, description = "Most recent reading of each sensor", body = [sensor_reading::Model]),
        (status = 404, description = "Station not found", body = ErrorBody),
    )
)]
async fn latest_readings(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<sensor_reading::Model>>> {
    StationsService::new(resources.db.clone()).get(id).await?;
    let latest = SensorReadingsService::new(resources).latest(id).await?;
    Ok(Json(latest))
}
