//! Threshold endpoints. Reads are open to every user, changes need admin.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::threshold;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::sensors::resolve_unit;
use crate::thresholds::{
    EvaluateRequest, NewThreshold, ThresholdFilter, ThresholdService, ThresholdUpdate,
    ThresholdViolation,
};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const THRESHOLDS_TAG: &str = "Thresholds";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_thresholds, create_threshold))
        .routes(routes!(evaluate))
        .routes(routes!(get_threshold, update_threshold, delete_threshold))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = THRESHOLDS_TAG,
    operation_id = "List Thresholds",
    params(ThresholdFilter),
    responses((status = 200, description = "Thresholds", body = [threshold::Model]))
)]
async fn list_thresholds(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Query(filter): Query<ThresholdFilter>,
) -> AppResult<Json<Vec<threshold::Model>>> {
    Ok(Json(
        ThresholdService::new(resources.db.clone())
            .list(&filter)
            .await?,
    ))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    post,
    path = "",
    tag = THRESHOLDS_TAG,
    operation_id = "Create Threshold",
    request_body = NewThreshold,
    responses(
        (status = 201, description = "Threshold created", body = threshold::Model),
        (status = 400, description = "Invalid bounds or unit", body = ErrorBody),
        (status = 409, description = "A threshold for this sensor type and severity exists", body = ErrorBody),
    )
)]
async fn create_threshold(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewThreshold>,
) -> AppResult<(StatusCode, Json<threshold::Model>)> {
    auth.require(Role::Admin)?;
    let threshold = ThresholdService::new(resources.db.clone())
        .create(payload)
        .await?;
    Ok((StatusCode::CREATED, Json(threshold)))
}

#[tracing::instrument(skip(resources, _auth, payload))]
#[utoipa::path(
    post,
    path = "/evaluate",
    tag = THRESHOLDS_TAG,
    operation_id = "Evaluate Value",
    description = "Checks a value against the active thresholds of a sensor type without storing anything.",
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Violated thresholds, most severe first", body = [ThresholdViolation]),
        (status = 400, description = "Unknown or incompatible unit", body = ErrorBody),
    )
)]
async fn evaluate(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Json(payload): Json<EvaluateRequest>,
) -> AppResult<Json<Vec<ThresholdViolation>>> {
    let unit = resolve_unit(payload.sensor_type, payload.unit.as_deref())?;
    let violations = ThresholdService::new(resources.db.clone())
        .evaluate(payload.sensor_type, payload.value, unit)
        .await?;
    Ok(Json(violations))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = THRESHOLDS_TAG,
    operation_id = "Get Threshold",
    params(("id" = i32, Path, description = "Threshold ID")),
    responses(
        (status = 200, description = "Threshold", body = threshold::Model),
        (status = 404, description = "Threshold not found", body = ErrorBody),
    )
)]
async fn get_threshold(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<threshold::Model>> {
    Ok(Json(ThresholdService::new(resources.db.clone()).get(id).await?))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    patch,
    path = "/{id}",
    tag = THRESHOLDS_TAG,
    operation_id = "Update Threshold",
    params(("id" = i32, Path, description = "Threshold ID")),
    request_body = ThresholdUpdate,
    responses(
        (status = 200, description = "Updated threshold", body = threshold::Model),
        (status = 404, description = "Threshold not found", body = ErrorBody),
    )
)]
async fn update_threshold(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    Json(payload): Json<ThresholdUpdate>,
) -> AppResult<Json<threshold::Model>> {
    auth.require(Role::Admin)?;
    let threshold = ThresholdService::new(resources.db.clone())
        .update(id, payload)
        .await?;
    Ok(Json(threshold))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = THRESHOLDS_TAG,
    operation_id = "Delete Threshold",
    params(("id" = i32, Path, description = "Threshold ID")),
    responses(
        (status = 204, description = "Threshold deleted"),
        (status = 404, description = "Threshold not found", body = ErrorBody),
    )
)]
async fn delete_threshold(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Admin)?;
    ThresholdService::new(resources.db.clone()).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
