//! Session authentication: the request extractor and the login endpoints.
//!
//! A session token is accepted from the session cookie or from an
//! `Authorization: Bearer <token>` header. Handlers check roles explicitly
//! through [`CurrentUser::require`].

use crate::AppResources;
use crate::auth::{SessionService, UserDto, UsersService};
use crate::entity::session;
use crate::entity::user::{self, Role};
use crate::error::{AppError, AppResult, ErrorBody};
use axum::{
    Extension, Json,
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use sea_orm::ActiveEnum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub const AUTH_TAG: &str = "Authentication";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: user::Model,
    pub session: session::Model,
}

impl CurrentUser {
    pub fn id(&self) -> i32 {
        self.user.id
    }

    /// Fails with 403 unless the user holds at least `role`.
    pub fn require(&self, role: Role) -> AppResult<()> {
        if self.user.has_role(role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "This action requires the {} role",
                role.to_value()
            )))
        }
    }
}

/// Token from the bearer header, falling back to the session cookie.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Axum extractor resolving the session of the request.
///
/// ```ignore
/// async fn handler(SessionAuth(auth): SessionAuth) -> AppResult<Json<UserDto>> {
///     Ok(Json(auth.user.into()))
/// }
/// ```
pub struct SessionAuth(pub CurrentUser);

impl<S> FromRequestParts<S> for SessionAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let resources = parts
            .extensions
            .get::<AppResources>()
            .cloned()
            .ok_or_else(|| AppError::Internal("AppResources not found in extensions".into()))?;

        let token = session_token(&parts.headers, &resources.config.session.cookie_name)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

        let (session, user) = SessionService::new(resources.db.clone(), resources.config.session.ttl())
            .validate(&token)
            .await?;
        Ok(SessionAuth(CurrentUser { user, session }))
    }
}

fn session_cookie(resources: &AppResources, token: &str, max_age: i64) -> Option<HeaderValue> {
    let session = &resources.config.session;
    let mut cookie = format!(
        "{}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}",
        session.cookie_name
    );
    if session.secure_cookie {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Session token; also set as an HttpOnly cookie
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: UserDto,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(logout))
        .routes(routes!(me))
        .routes(routes!(change_password))
}

/// Exchange credentials for a session.
#[tracing::instrument(skip(resources, headers, payload))]
#[utoipa::path(
    post,
    path = "/login",
    tag = AUTH_TAG,
    operation_id = "Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    )
)]
async fn login(
    Extension(resources): Extension<AppResources>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Response> {
    let user = UsersService::new(resources.db.clone())
        .authenticate(&payload.email, &payload.password)
        .await?;
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let ttl = resources.config.session.ttl();
    let session = SessionService::new(resources.db.clone(), ttl)
        .create(user.id, ip_address, user_agent)
        .await?;
    tracing::info!(
        name = "auth.login.completed",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        user_id = user.id,
        message = "User logged in"
    );
    let cookie = session_cookie(&resources, &session.id, ttl.whole_seconds());
    let body = LoginResponse {
        token: session.id,
        expires_at: session.expires_at,
        user: user.into(),
    };
    Ok(with_cookie(Json(body).into_response(), cookie))
}

/// End the current session.
#[tracing::instrument(skip(resources, auth), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/logout",
    tag = AUTH_TAG,
    operation_id = "Logout",
    responses(
        (status = 204, description = "Session revoked; cookie cleared"),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    )
)]
async fn logout(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
) -> AppResult<Response> {
    SessionService::new(resources.db.clone(), resources.config.session.ttl())
        .revoke(&auth.session.id)
        .await?;
    let cookie = session_cookie(&resources, "", 0);
    Ok(with_cookie(StatusCode::NO_CONTENT.into_response(), cookie))
}

/// The authenticated user.
#[tracing::instrument(skip(auth))]
#[utoipa::path(
    get,
    path = "/me",
    tag = AUTH_TAG,
    operation_id = "Current User",
    responses(
        (status = 200, description = "Current user", body = UserDto),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    )
)]
async fn me(SessionAuth(auth): SessionAuth) -> Json<UserDto> {
    Json(auth.user.into())
}

/// Change the password of the authenticated user. Other sessions are revoked.
#[tracing::instrument(skip(resources, auth, payload), fields(user_id = auth.id()))]
#[utoipa::path(
    post,
    path = "/password",
    tag = AUTH_TAG,
    operation_id = "Change Password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Wrong current password or weak new password", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    )
)]
async fn change_password(
    Extension(resources): Extension<AppResources>,
    SessionAuth(auth): SessionAuth,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    UsersService::new(resources.db.clone())
        .change_password(auth.id(), &payload.current_password, &payload.new_password)
        .await?;
    SessionService::new(resources.db.clone(), resources.config.session.ttl())
        .revoke_others(auth.id(), &auth.session.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("envmon_session=def"));
        assert_eq!(session_token(&headers, "envmon_session").as_deref(), Some("abc"));
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; envmon_session=tok123; lang=en"),
        );
        assert_eq!(session_token(&headers, "envmon_session").as_deref(), Some("tok123"));
        assert_eq!(session_token(&headers, "other"), None);
    }

    #[test]
    fn missing_or_empty_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers, "envmon_session"), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        headers.insert(header::COOKIE, HeaderValue::from_static("envmon_session="));
        assert_eq!(session_token(&headers, "envmon_session"), None);
    }
}
