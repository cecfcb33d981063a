//! In-app notifications with optional email delivery.

pub mod email;

use crate::AppResources;
use crate::auth::UsersService;
use crate::entity::notification::{self, NotificationType};
use crate::entity::user::{self, Role};
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use crate::settings::{EMAIL_ENABLED, SettingsService};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, sea_query::Expr,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Read notifications older than this are purged.
pub const READ_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_entity: Option<String>,
    pub related_id: Option<i32>,
    /// Also deliver by email when SMTP and the email setting allow it.
    pub send_email: bool,
}

impl NewNotification {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            title: title.into(),
            message: message.into(),
            related_entity: None,
            related_id: None,
            send_email: false,
        }
    }

    pub fn related(mut self, entity: &str, id: i32) -> Self {
        self.related_entity = Some(entity.to_string());
        self.related_id = Some(id);
        self
    }

    pub fn with_email(mut self, send_email: bool) -> Self {
        self.send_email = send_email;
        self
    }
}

pub struct NotificationsService {
    resources: AppResources,
}

impl NotificationsService {
    pub fn new(resources: AppResources) -> Self {
        Self { resources }
    }

    #[tracing::instrument(skip(self, new), fields(kind = ?new.notification_type))]
    pub async fn notify_user(
        &self,
        user_id: i32,
        new: &NewNotification,
    ) -> AppResult<notification::Model> {
        let db = self.resources.db.as_ref();
        let recipient = user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| AppError::not_found(format!("User {user_id} not found")))?;

        let stored = notification::ActiveModel {
            user_id: Set(user_id),
            notification_type: Set(new.notification_type),
            title: Set(new.title.clone()),
            message: Set(new.message.clone()),
            related_entity: Set(new.related_entity.clone()),
            related_id: Set(new.related_id),
            is_read: Set(false),
            read_at: Set(None),
            email_sent: Set(false),
            created_at: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        if !new.send_email || !self.email_allowed().await {
            return Ok(stored);
        }

        let body = email::render_body(&new.title, &new.message, &self.resources.config.frontend_url);
        match email::send_plain(&self.resources, &recipient.email, &new.title, body).await {
            Ok(()) => {
                let mut active: notification::ActiveModel = stored.into();
                active.email_sent = Set(true);
                Ok(active.update(db).await?)
            }
            Err(e) => {
                tracing::warn!(
                    name = "notifications.email.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    user_id = user_id,
                    error = %e,
                    message = "Failed to deliver notification email"
                );
                Ok(stored)
            }
        }
    }

    async fn email_allowed(&self) -> bool {
        self.resources.config.smtp.enabled
            && SettingsService::new(self.resources.db.clone())
                .get_bool(EMAIL_ENABLED, true)
                .await
    }

    /// Fan out to every active user holding one of `roles`. Individual failures
    /// are logged and skipped.
    #[tracing::instrument(skip(self, new))]
    pub async fn notify_roles(
        &self,
        roles: &[Role],
        new: &NewNotification,
    ) -> AppResult<Vec<notification::Model>> {
        let recipients = UsersService::new(self.resources.db.clone())
            .ids_with_roles(roles)
            .await?;
        let mut sent = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self.notify_user(recipient, new).await {
                Ok(n) => sent.push(n),
                Err(e) => tracing::warn!(
                    name = "notifications.fan_out.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    user_id = recipient,
                    error = %e,
                    message = "Failed to notify user"
                ),
            }
        }
        Ok(sent)
    }

    pub async fn list_for_user(
        &self,
        user_id: i32,
        unread_only: bool,
        page: PageParams,
    ) -> AppResult<Page<notification::Model>> {
        let mut query =
            notification::Entity::find().filter(notification::Column::UserId.eq(user_id));
        if unread_only {
            query = query.filter(notification::Column::IsRead.eq(false));
        }
        let query = query
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    pub async fn unread_count(&self, user_id: i32) -> AppResult<u64> {
        Ok(notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .count(self.resources.db.as_ref())
            .await?)
    }

    async fn find_own(&self, user_id: i32, id: i32) -> AppResult<notification::Model> {
        notification::Entity::find_by_id(id)
            .filter(notification::Column::UserId.eq(user_id))
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Notification {id} not found")))
    }

    /// Only the owner can mark a notification; anyone else gets `NotFound`.
    pub async fn mark_read(&self, user_id: i32, id: i32) -> AppResult<notification::Model> {
        let existing = self.find_own(user_id, id).await?;
        if existing.is_read {
            return Ok(existing);
        }
        let mut active: notification::ActiveModel = existing.into();
        active.is_read = Set(true);
        active.read_at = Set(Some(OffsetDateTime::now_utc()));
        Ok(active.update(self.resources.db.as_ref()).await?)
    }

    pub async fn mark_all_read(&self, user_id: i32) -> AppResult<u64> {
        let result = notification::Entity::update_many()
            .col_expr(notification::Column::IsRead, Expr::value(true))
            .col_expr(
                notification::Column::ReadAt,
                Expr::value(Some(OffsetDateTime::now_utc())),
            )
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete(&self, user_id: i32, id: i32) -> AppResult<()> {
        let existing = self.find_own(user_id, id).await?;
        notification::Entity::delete_by_id(existing.id)
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(())
    }

    /// Remove read notifications created more than `days` ago.
    pub async fn purge_read_older_than(&self, days: i64) -> AppResult<u64> {
        let cutoff = OffsetDateTime::now_utc()
            .saturating_sub(time::Duration::seconds(days.saturating_mul(86_400)));
        let result = notification::Entity::delete_many()
            .filter(notification::Column::IsRead.eq(true))
            .filter(notification::Column::CreatedAt.lt(cutoff))
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

/// Daily purge of old read notifications.
pub fn spawn_purge_task(resources: Arc<AppResources>) {
    tokio::spawn(async move {
        let service = NotificationsService::new((*resources).clone());
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        loop {
            interval.tick().await;
            match service.purge_read_older_than(READ_RETENTION_DAYS).await {
                Ok(purged) => tracing::info!(
                    name = "notifications.purge.completed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    purged = purged,
                    message = "Purged old read notifications"
                ),
                Err(e) => tracing::warn!(
                    name = "notifications.purge.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Failed to purge notifications"
                ),
            }
        }
    });
}
