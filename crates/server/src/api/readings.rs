//! Reading ingestion and query endpoints.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::sensor_reading;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use crate::readings::analysis::{AggregateRow, Bucket, GapReport, ReadingStatistics};
use crate::readings::{
    BatchResult, GapQuery, IngestedReading, NewReading, ReadingFilter, SensorReadingsService,
};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const READINGS_TAG: &str = "Readings";

#[derive(Debug, Deserialize, IntoParams)]
pub struct AggregateParams {
    /// "hour" (default) or "day"
    pub bucket: Option<Bucket>,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_readings, ingest_reading))
        .routes(routes!(ingest_batch))
        .routes(routes!(reading_statistics))
        .routes(routes!(aggregate_readings))
        .routes(routes!(sensor_gaps))
        .routes(routes!(get_reading))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = READINGS_TAG,
    operation_id = "List Readings",
    params(ReadingFilter, PageParams),
    responses((status = 200, description = "Page of readings, newest first"))
)]
async fn list_readings(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<ReadingFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<sensor_reading::Model>>> {
    let readings = SensorReadingsService::new(resources)
        .list(&filter, page)
        .await?;
    Ok(Json(readings))
}

#[tracing::instrument(skip(resources, auth, payload), fields(sensor_id = payload.sensor_id))]
#[utoipa::path(
    post,
    path = "",
    tag = READINGS_TAG,
    operation_id = "Ingest Reading",
    description = "Stores a reading, scores its quality and evaluates thresholds. \
                   Returned violations are ordered by severity, most severe first.",
    request_body = NewReading,
    responses(
        (status = 201, description = "Reading stored", body = IngestedReading),
        (status = 400, description = "Unknown unit, inactive sensor or future timestamp", body = ErrorBody),
        (status = 404, description = "Sensor not found", body = ErrorBody),
    )
)]
async fn ingest_reading(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewReading>,
) -> AppResult<(StatusCode, Json<IngestedReading>)> {
    auth.require(Role::Operator)?;
    let ingested = SensorReadingsService::new(resources).ingest(payload).await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

#[tracing::instrument(skip(resources, auth, payload), fields(count = payload.len()))]
#[utoipa::path(
    post,
    path = "/batch",
    tag = READINGS_TAG,
    operation_id = "Ingest Reading Batch",
    description = "Ingests up to 1000 readings. Each item succeeds or fails on its own.",
    request_body = Vec<NewReading>,
    responses(
        (status = 200, description = "Per-item results", body = BatchResult),
        (status = 400, description = "Empty or oversized batch", body = ErrorBody),
    )
)]
async fn ingest_batch(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<Vec<NewReading>>,
) -> AppResult<Json<BatchResult>> {
    auth.require(Role::Operator)?;
    let result = SensorReadingsService::new(resources)
        .ingest_batch(payload)
        .await?;
    Ok(Json(result))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/statistics",
    tag = READINGS_TAG,
    operation_id = "Reading Statistics",
    params(ReadingFilter),
    responses((status = 200, description = "Summary statistics", body = ReadingStatistics))
)]
async fn reading_statistics(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<ReadingFilter>,
) -> AppResult<Json<ReadingStatistics>> {
    let stats = SensorReadingsService::new(resources)
        .statistics(&filter)
        .await?;
    Ok(Json(stats))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/aggregate",
    tag = READINGS_TAG,
    operation_id = "Aggregate Readings",
    params(ReadingFilter, AggregateParams),
    responses((status = 200, description = "Hourly or daily aggregates per sensor", body = [AggregateRow]))
)]
async fn aggregate_readings(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<ReadingFilter>,
    Query(params): Query<AggregateParams>,
) -> AppResult<Json<Vec<AggregateRow>>> {
    let rows = SensorReadingsService::new(resources)
        .aggregate(&filter, params.bucket.unwrap_or(Bucket::Hour))
        .await?;
    Ok(Json(rows))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/gaps/{sensor_id}",
    tag = READINGS_TAG,
    operation_id = "Reading Gaps",
    params(("sensor_id" = i32, Path, description = "Sensor ID"), GapQuery),
    responses(
        (status = 200, description = "Intervals without readings", body = GapReport),
        (status = 404, description = "Sensor not found", body = ErrorBody),
    )
)]
async fn sensor_gaps(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(sensor_id): Path<i32>,
    Query(query): Query<GapQuery>,
) -> AppResult<Json<GapReport>> {
    let report = SensorReadingsService::new(resources)
        .gaps(sensor_id, &query)
        .await?;
    Ok(Json(report))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = READINGS_TAG,
    operation_id = "Get Reading",
    params(("id" = i32, Path, description = "Reading ID")),
    responses(
        (status = 200, description = "Reading", body = sensor_reading::Model),
        (status = 404, description = "Reading not found", body = ErrorBody),
    )
)]
async fn get_reading(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<sensor_reading::Model>> {
    Ok(Json(SensorReadingsService::new(resources).get(id).await?))
}
