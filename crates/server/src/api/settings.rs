//! Runtime settings endpoints.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::settings::{SettingDto, SettingsService};
use axum::{Extension, Json, extract::Path, http::StatusCode};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const SETTINGS_TAG: &str = "Settings";

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetSettingRequest {
    #[schema(value_type = Object)]
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_settings))
        .routes(routes!(get_setting, put_setting, delete_setting))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "",
    tag = SETTINGS_TAG,
    operation_id = "List Settings",
    responses((status = 200, description = "All settings ordered by key", body = [SettingDto]))
)]
async fn list_settings(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
) -> AppResult<Json<Vec<SettingDto>>> {
    Ok(Json(SettingsService::new(resources.db.clone()).list().await?))
}

#[tracing::instrument(skip(resources, _auth))]
#[utoipa::path(
    get,
    path = "/{key}",
    tag = SETTINGS_TAG,
    operation_id = "Get Setting",
    params(("key" = String, Path, description = "Setting key, e.g. `alerts.auto_resolve`")),
    responses(
        (status = 200, description = "Setting", body = SettingDto),
        (status = 404, description = "Setting not found", body = ErrorBody),
    )
)]
async fn get_setting(
    Extension(resources): Extension<AppResources>,
    SessionAuth(_auth): SessionAuth,
    Path(key): Path<String>,
) -> AppResult<Json<SettingDto>> {
    Ok(Json(
        SettingsService::new(resources.db.clone()).get(&key).await?,
    ))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    put,
    path = "/{key}",
    tag = SETTINGS_TAG,
    operation_id = "Set Setting",
    description = "Creates or replaces a setting. The description is kept when omitted.",
    params(("key" = String, Path, description = "Setting key")),
    request_body = SetSettingRequest,
    responses(
        (status = 200, description = "Stored setting", body = SettingDto),
        (status = 400, description = "Invalid key", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn put_setting(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(key): Path<String>,
    Json(payload): Json<SetSettingRequest>,
) -> AppResult<Json<SettingDto>> {
    auth.require(Role::Admin)?;
    let setting = SettingsService::new(resources.db.clone())
        .set(&key, payload.value, payload.description, Some(auth.id()))
        .await?;
    Ok(Json(setting))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{key}",
    tag = SETTINGS_TAG,
    operation_id = "Delete Setting",
    params(("key" = String, Path, description = "Setting key")),
    responses(
        (status = 204, description = "Setting deleted"),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "Setting not found", body = ErrorBody),
    )
)]
async fn delete_setting(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(key): Path<String>,
) -> AppResult<StatusCode> {
    auth.require(Role::Admin)?;
    SettingsService::new(resources.db.clone())
        .delete(&key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
