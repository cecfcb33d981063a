//! User administration (admin only).

use crate::AppResources;
use crate::api::auth::SessionAuth;
use crate::auth::{NewUser, SessionService, UserDto, UserUpdate, UsersService};
use crate::entity::user::Role;
use crate::error::{AppResult, ErrorBody};
use crate::pagination::{Page, PageParams};
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const USERS_TAG: &str = "Users";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(list_users, create_user))
        .routes(routes!(get_user, update_user, delete_user))
        .routes(routes!(revoke_user_sessions))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedSessions {
    pub revoked: u64,
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    get,
    path = "",
    tag = USERS_TAG,
    operation_id = "List Users",
    params(PageParams),
    responses(
        (status = 200, description = "Page of users"),
        (status = 403, description = "Admin role required", body = ErrorBody),
    )
)]
async fn list_users(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Page<UserDto>>> {
    auth.require(Role::Admin)?;
    let users = UsersService::new(resources.db.clone()).list(page).await?;
    Ok(Json(users.map(UserDto::from)))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    post,
    path = "",
    tag = USERS_TAG,
    operation_id = "Create User",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = UserDto),
        (status = 400, description = "Invalid email or weak password", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    )
)]
async fn create_user(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<NewUser>,
) -> AppResult<(StatusCode, Json<UserDto>)> {
    auth.require(Role::Admin)?;
    let user = UsersService::new(resources.db.clone()).create(payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    get,
    path = "/{id}",
    tag = USERS_TAG,
    operation_id = "Get User",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = UserDto),
        (status = 404, description = "User not found", body = ErrorBody),
    )
)]
async fn get_user(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<UserDto>> {
    if auth.id() != id {
        auth.require(Role::Admin)?;
    }
    let user = UsersService::new(resources.db.clone()).get(id).await?;
    Ok(Json(user.into()))
}

#[tracing::instrument(skip(resources, auth, payload))]
#[utoipa::path(
    patch,
    path = "/{id}",
    tag = USERS_TAG,
    operation_id = "Update User",
    params(("id" = i32, Path, description = "User ID")),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserDto),
        (status = 404, description = "User not found", body = ErrorBody),
    )
)]
async fn update_user(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
    Json(payload): Json<UserUpdate>,
) -> AppResult<Json<UserDto>> {
    auth.require(Role::Admin)?;
    let user = UsersService::new(resources.db.clone())
        .update(id, payload)
        .await?;
    Ok(Json(user.into()))
}

#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}",
    tag = USERS_TAG,
    operation_id = "Delete User",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 403, description = "Admin role required or deleting yourself", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    )
)]
async fn delete_user(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require(Role::Admin)?;
    UsersService::new(resources.db.clone())
        .delete(id, auth.id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Force a user to sign in again everywhere.
#[tracing::instrument(skip(resources, auth))]
#[utoipa::path(
    delete,
    path = "/{id}/sessions",
    tag = USERS_TAG,
    operation_id = "Revoke User Sessions",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokedSessions),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody),
    )
)]
async fn revoke_user_sessions(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Path(id): Path<i32>,
) -> AppResult<Json<RevokedSessions>> {
    auth.require(Role::Admin)?;
    UsersService::new(resources.db.clone()).get(id).await?;
    let revoked = SessionService::new(resources.db.clone(), resources.config.session.ttl())
        .revoke_all_for_user(id)
        .await?;
    tracing::info!(
        name = "users.sessions.revoked",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        user_id = id,
        revoked,
        admin_id = auth.id(),
        message = "Revoked all sessions of user"
    );
    Ok(Json(RevokedSessions { revoked }))
}
