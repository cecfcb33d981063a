//! Server side sessions identified by opaque random tokens.
//!
//! A session is valid until `expires_at`. Every successful validation bumps
//! `last_seen_at`; once less than half of the TTL remains the expiry is pushed
//! out to a full TTL again.

use crate::auth::password::generate_session_token;
use crate::entity::{session, user};
use crate::error::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// New expiry for a session seen at `now`, or `None` when no renewal is due.
pub fn renewed_expiry(
    expires_at: OffsetDateTime,
    now: OffsetDateTime,
    ttl: Duration,
) -> Option<OffsetDateTime> {
    if expires_at - now < ttl / 2 {
        Some(now + ttl)
    } else {
        None
    }
}

pub struct SessionService {
    db: Arc<DatabaseConnection>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(db: Arc<DatabaseConnection>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    #[tracing::instrument(skip(self, user_agent))]
    pub async fn create(
        &self,
        user_id: i32,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> AppResult<session::Model> {
        let token = generate_session_token().map_err(|e| AppError::Internal(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let model = session::ActiveModel {
            id: Set(token),
            user_id: Set(user_id),
            created_at: Set(now),
            expires_at: Set(now + self.ttl),
            last_seen_at: Set(now),
            ip_address: Set(ip_address),
            user_agent: Set(user_agent.map(|ua| ua.chars().take(255).collect())),
        };
        Ok(model.insert(self.db.as_ref()).await?)
    }

    /// Resolve a token to its session and user, applying the sliding window.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> AppResult<(session::Model, user::Model)> {
        let now = OffsetDateTime::now_utc();
        let session = session::Entity::find_by_id(token)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;

        if session.is_expired(now) {
            session::Entity::delete_by_id(session.id.clone())
                .exec(self.db.as_ref())
                .await?;
            return Err(AppError::Unauthorized("Session expired".into()));
        }

        let user = user::Entity::find_by_id(session.user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;
        if !user.is_active {
            return Err(AppError::Unauthorized("Account is disabled".into()));
        }

        let renewal = renewed_expiry(session.expires_at, now, self.ttl);
        let mut active: session::ActiveModel = session.into();
        active.last_seen_at = Set(now);
        if let Some(expires_at) = renewal {
            active.expires_at = Set(expires_at);
        }
        let session = active.update(self.db.as_ref()).await?;
        Ok((session, user))
    }

    /// Returns whether a session was removed.
    pub async fn revoke(&self, token: &str) -> AppResult<bool> {
        let result = session::Entity::delete_by_id(token)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_all_for_user(&self, user_id: i32) -> AppResult<u64> {
        let result = session::Entity::delete_many()
            .filter(session::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Revoke every session of the user except `keep`.
    #[tracing::instrument(skip(self, keep))]
    pub async fn revoke_others(&self, user_id: i32, keep: &str) -> AppResult<u64> {
        let result = session::Entity::delete_many()
            .filter(session::Column::UserId.eq(user_id))
            .filter(session::Column::Id.ne(keep))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn purge_expired(&self) -> AppResult<u64> {
        let result = session::Entity::delete_many()
            .filter(session::Column::ExpiresAt.lte(OffsetDateTime::now_utc()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

/// Hourly purge of expired sessions.
pub fn spawn_cleanup_task(db: Arc<DatabaseConnection>, ttl: Duration) {
    tokio::spawn(async move {
        let service = SessionService::new(db, ttl);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match service.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(
                    name = "auth.session_cleanup.completed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    purged = purged,
                    message = "Purged expired sessions"
                ),
                Err(e) => tracing::warn!(
                    name = "auth.session_cleanup.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Failed to purge expired sessions"
                ),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn renews_only_in_second_half_of_ttl() {
        let ttl = Duration::hours(24);
        let now = datetime!(2026-10-01 12:00 UTC);

        assert_eq!(renewed_expiry(now + Duration::hours(20), now, ttl), None);
        assert_eq!(renewed_expiry(now + Duration::hours(12), now, ttl), None);
        assert_eq!(
            renewed_expiry(now + Duration::hours(11), now, ttl),
            Some(now + ttl)
        );
    }
}
