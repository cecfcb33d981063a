//! Data export endpoints.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::data_export;
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::exports::{DataExportService, ExportRequest};
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::{StatusCode, header},
    response::IntoResponse,
};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const EXPORTS_TAG: &str = "Exports";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_exports, request_export))
        .routes(routes!(get_export, delete_export))
        .routes(routes!(download_export))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    get,
    path = "",
    tag = EXPORTS_TAG,
    operation_id = "List Exports",
    description = "Lists the caller's exports. Admins see every export.",
    params(PageParams),
    responses((status = 200, description = "Page of exports, newest first"))
)]
async fn list_exports(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<data_export::Model>>> {
    let exports = DataExportService::new(resources)
        .list(&auth.user, page)
        .await?;
    Ok(Json(exports))
}

#[tracing::instrument(skip(resources, auth, payload), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "",
    tag = EXPORTS_TAG,
    operation_id = "Request Export",
    description = "Queues an export. The file is produced in the background; poll the export \
                   or wait for the notification, then download it.",
    request_body = ExportRequest,
    responses(
        (status = 202, description = "Export queued", body = data_export::Model),
        (status = 400, description = "Invalid filters", body = ErrorBody),
    )
)]
async fn request_export(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<ExportRequest>,
) -> AppResult<(StatusCode, Json<data_export::Model>)> {
    auth.require(Role::Operator)?;
    let export = DataExportService::new(resources)
        .request(&auth.user, payload.export_type, payload.format, payload.filters)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(export)))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = EXPORTS_TAG,
    operation_id = "Get Export",
    params(("id" = i32, Path, description = "Export ID")),
    responses(
        (status = 200, description = "Export", body = data_export::Model),
        (status = 404, description = "Export not found", body = ErrorBody),
    )
)]
async fn get_export(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<data_export::Model>> {
    Ok(Json(DataExportService::new(resources).get(&auth.user, id).await?))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = EXPORTS_TAG,
    operation_id = "Download Export",
    params(("id" = i32, Path, description = "Export ID")),
    responses(
        (status = 200, description = "Export file", content_type = "application/octet-stream"),
        (status = 404, description = "Export not found", body = ErrorBody),
        (status = 409, description = "Export not completed or expired", body = ErrorBody),
    )
)]
async fn download_export(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    let download = DataExportService::new(resources)
        .download(&auth.user, id)
        .await?;
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

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = EXPORTS_TAG,
    operation_id = "Delete Export",
    params(("id" = i32, Path, description = "Export ID")),
    responses(
        (status = 204, description = "Export and its file deleted"),
        (status = 404, description = "Export not found", body = ErrorBody),
    )
)]
async fn delete_export(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    DataExportService::new(resources)
        .delete(&auth.user, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
