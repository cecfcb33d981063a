//! Notification inbox of the authenticated user.

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::entity::notification;
use crate::error::{AppResult, ErrorBody};
use crate::notifications::NotificationsService;
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const NOTIFICATIONS_TAG: &str = "Notifications";

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InboxParams {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_notifications))
        .routes(routes!(unread_count))
        .routes(routes!(mark_all_read))
        .routes(routes!(mark_read))
        .routes(routes!(delete_notification))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    get,
    path = "",
    tag = NOTIFICATIONS_TAG,
    operation_id = "List Notifications",
    params(InboxParams, PageParams),
    responses((status = 200, description = "Page of notifications, newest first"))
)]
async fn list_notifications(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(params): Query<InboxParams>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<notification::Model>>> {
    let notifications = NotificationsService::new(resources)
        .list_for_user(auth.id(), params.unread_only, page)
        .await?;
    Ok(Json(notifications))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    get,
    path = "/unread-count",
    tag = NOTIFICATIONS_TAG,
    operation_id = "Unread Notification Count",
    responses((status = 200, description = "Number of unread notifications", body = CountResponse))
)]
async fn unread_count(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
) -> AppResult<Json<CountResponse>> {
    let count = NotificationsService::new(resources)
        .unread_count(auth.id())
        .await?;
    Ok(Json(CountResponse { count }))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/read-all",
    tag = NOTIFICATIONS_TAG,
    operation_id = "Mark All Notifications Read",
    responses((status = 200, description = "Number of notifications marked read", body = CountResponse))
)]
async fn mark_all_read(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
) -> AppResult<Json<CountResponse>> {
    let count = NotificationsService::new(resources)
        .mark_all_read(auth.id())
        .await?;
    Ok(Json(CountResponse { count }))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/{id}/read",
    tag = NOTIFICATIONS_TAG,
    operation_id = "Mark Notification Read",
    params(("id" = i32, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification marked read", body = notification::Model),
        (status = 404, description = "No such notification for this user", body = ErrorBody),
    )
)]
async fn mark_read(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<notification::Model>> {
    Ok(Json(
        NotificationsService::new(resources)
            .mark_read(auth.id(), id)
            .await?,
    ))
}

#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = NOTIFICATIONS_TAG,
    operation_id = "Delete Notification",
    params(("id" = i32, Path, description = "Notification ID")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 404, description = "No such notification for this user", body = ErrorBody),
    )
)]
async fn delete_notification(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    NotificationsService::new(resources)
        .delete(auth.id(), id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
