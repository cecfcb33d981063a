//! Backup endpoints (admin only).

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::backups::{BackupService, BackupTaskManager};
use crate::entity::system_backup::{self, BackupType};
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const BACKUPS_TAG: &str = "Backups";

/// Shared state for backup endpoints.
#[derive(Clone)]
pub struct BackupAppState {
    pub task_manager: Arc<BackupTaskManager>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBackupRequest {
    #[serde(default = "default_backup_type")]
    pub backup_type: BackupType,
}

fn default_backup_type() -> BackupType {
    BackupType::Database
}

pub fn router(state: BackupAppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_backups, create_backup))
        .routes(routes!(get_backup, delete_backup))
        .routes(routes!(cancel_backup))
        .routes(routes!(download_backup))
        .with_state(state)
}

fn service(resources: AppResources, state: &BackupAppState) -> BackupService {
    BackupService::new(resources, state.task_manager.clone())
}

#[tracing::instrument(skip(resources, state, auth))]
#[utoipa::path(
    get,
    path = "",
    tag = BACKUPS_TAG,
    operation_id = "List Backups",
    params(PageParams),
    responses(
        (status = 200, description = "Page of backups, newest first"),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn list_backups(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<system_backup::Model>>> {
    auth.require(Role::Admin)?;
    Ok(Json(service(resources, &state).list(page).await?))
}

#[tracing::instrument(skip(resources, state, auth, payload))]
#[utoipa::path(
    post,
    path = "",
    tag = BACKUPS_TAG,
    operation_id = "Create Backup",
    description = "Starts `pg_dump` in the background. `full` backups also bundle the uploads directory into a ZIP archive.",
    request_body = CreateBackupRequest,
    responses(
        (status = 202, description = "Backup started", body = system_backup::Model),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn create_backup(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<CreateBackupRequest>,
) -> AppResult<(StatusCode, Json<system_backup::Model>)> {
    auth.require(Role::Admin)?;
    let backup = service(resources, &state)
        .create(payload.backup_type, Some(auth.id()))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(backup)))
}

#[tracing::instrument(skip(resources, state, auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = BACKUPS_TAG,
    operation_id = "Get Backup",
    params(("id" = i32, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Backup", body = system_backup::Model),
        (status = 404, description = "Backup not found", body = ErrorBody),
    )
)]
async fn get_backup(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<system_backup::Model>> {
    auth.require(Role::Admin)?;
    Ok(Json(service(resources, &state).get(id).await?))
}

#[tracing::instrument(skip(resources, state, auth))]
#[utoipa::path(
    post,
    path = "/{id}/cancel",
    tag = BACKUPS_TAG,
    operation_id = "Cancel Backup",
    params(("id" = i32, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Backup cancelled", body = system_backup::Model),
        (status = 404, description = "Backup not found", body = ErrorBody),
        (status = 409, description = "Backup is not pending or running", body = ErrorBody),
    )
)]
async fn cancel_backup(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<system_backup::Model>> {
    auth.require(Role::Admin)?;
    Ok(Json(service(resources, &state).cancel(id).await?))
}

#[tracing::instrument(skip(resources, state, auth))]
#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = BACKUPS_TAG,
    operation_id = "Download Backup",
    params(("id" = i32, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "SQL dump or ZIP archive", content_type = "application/octet-stream"),
        (status = 404, description = "Backup not found", body = ErrorBody),
        (status = 409, description = "Backup not completed", body = ErrorBody),
    )
)]
async fn download_backup(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    auth.require(Role::Admin)?;
    let download = service(resources, &state).download(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            ),
        ],
        download.bytes,
    ))
}

#[tracing::instrument(skip(resources, state, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = BACKUPS_TAG,
    operation_id = "Delete Backup",
    params(("id" = i32, Path, description = "Backup ID")),
    responses(
        (status = 204, description = "Backup and its file deleted"),
        (status = 404, description = "Backup not found", body = ErrorBody),
        (status = 409, description = "Backup is still running", body = ErrorBody),
    )
)]
async fn delete_backup(
    State(state): State<BackupAppState>,
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Admin)?;
    service(resources, &state).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
