//! User accounts: creation, updates and credential checks.

use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::config::AdminBootstrap;
use crate::entity::session;
use crate::entity::user::{self, Role};
use crate::error::{AppError, AppResult};
use crate::pagination::{Page, PageParams, paginate};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Public view of a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
}

impl From<user::Model> for UserDto {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Viewer
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(AppError::bad_request(format!("Invalid email address '{email}'")));
    }
    Ok(email)
}

pub struct UsersService {
    db: Arc<DatabaseConnection>,
}

impl UsersService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip(self, new_user), fields(email = %new_user.email))]
    pub async fn create(&self, new_user: NewUser) -> AppResult<user::Model> {
        let email = normalize_email(&new_user.email)?;
        let name = new_user.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("Name cannot be empty"));
        }
        validate_password(&new_user.password).map_err(|e| AppError::bad_request(e.to_string()))?;

        if user::Entity::find()
            .filter(user::Column::Email.eq(&email))
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Err(AppError::conflict(format!("A user with email '{email}' already exists")));
        }

        let password_hash =
            hash_password(&new_user.password).map_err(|e| AppError::Internal(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let model = user::ActiveModel {
            email: Set(email),
            name: Set(name),
            password_hash: Set(password_hash),
            role: Set(new_user.role),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            last_login_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            name = "users.create.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            user_id = model.id,
            role = ?model.role,
            message = "User created"
        );
        Ok(model)
    }

    pub async fn list(&self, page: PageParams) -> AppResult<Page<user::Model>> {
        let query = user::Entity::find().order_by_asc(user::Column::Id);
        Ok(paginate(query, self.db.as_ref(), page).await?)
    }

    pub async fn get(&self, id: i32) -> AppResult<user::Model> {
        user::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("User {id} not found")))
    }

    /// Deactivating a user also revokes all of their sessions.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, id: i32, update: UserUpdate) -> AppResult<user::Model> {
        let existing = self.get(id).await?;
        let deactivated = existing.is_active && update.is_active == Some(false);

        let mut active: user::ActiveModel = existing.into();
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::bad_request("Name cannot be empty"));
            }
            active.name = Set(name);
        }
        if let Some(role) = update.role {
            active.role = Set(role);
        }
        if let Some(is_active) = update.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(OffsetDateTime::now_utc());
        let model = active.update(self.db.as_ref()).await?;

        if deactivated {
            let revoked = session::Entity::delete_many()
                .filter(session::Column::UserId.eq(id))
                .exec(self.db.as_ref())
                .await?;
            tracing::info!(
                name = "users.deactivate.sessions_revoked",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                user_id = id,
                revoked = revoked.rows_affected,
                message = "Revoked sessions of deactivated user"
            );
        }
        Ok(model)
    }

    /// Admins cannot delete their own account.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: i32, acting_user_id: i32) -> AppResult<()> {
        if id == acting_user_id {
            return Err(AppError::Forbidden("You cannot delete your own account".into()));
        }
        let result = user::Entity::delete_by_id(id).exec(self.db.as_ref()).await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found(format!("User {id} not found")));
        }
        Ok(())
    }

    /// Check credentials and record the login time.
    ///
    /// Unknown emails, wrong passwords and disabled accounts all produce the
    /// same `Unauthorized` error.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<user::Model> {
        let invalid = || AppError::Unauthorized("Invalid email or password".into());
        let email = email.trim().to_lowercase();
        let user = user::Entity::find()
            .filter(user::Column::Email.eq(&email))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(invalid)?;

        if !user.is_active || !verify_password(password, &user.password_hash) {
            tracing::info!(
                name = "users.authenticate.rejected",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                user_id = user.id,
                message = "Login rejected"
            );
            return Err(invalid());
        }

        let mut active: user::ActiveModel = user.into();
        active.last_login_at = Set(Some(OffsetDateTime::now_utc()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    #[tracing::instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self.get(user_id).await?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(AppError::bad_request("Current password is incorrect"));
        }
        validate_password(new_password).map_err(|e| AppError::bad_request(e.to_string()))?;
        let password_hash =
            hash_password(new_password).map_err(|e| AppError::Internal(e.to_string()))?;

        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(password_hash);
        active.updated_at = Set(OffsetDateTime::now_utc());
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    pub async fn ids_with_roles(&self, roles: &[Role]) -> AppResult<Vec<i32>> {
        let users = user::Entity::find()
            .filter(user::Column::Role.is_in(roles.iter().copied()))
            .filter(user::Column::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?;
        Ok(users.into_iter().map(|u| u.id).collect())
    }

    /// Create the configured administrator when no user exists yet.
    #[tracing::instrument(skip_all)]
    pub async fn ensure_bootstrap_admin(
        &self,
        admin: Option<&AdminBootstrap>,
    ) -> AppResult<Option<user::Model>> {
        if user::Entity::find().count(self.db.as_ref()).await? > 0 {
            return Ok(None);
        }
        let Some(admin) = admin else {
            tracing::warn!(
                name = "users.bootstrap.skipped",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                message = "No users exist and no admin is configured; nobody can log in"
            );
            return Ok(None);
        };
        let created = self
            .create(NewUser {
                email: admin.email.clone(),
                name: admin.name.clone(),
                password: admin.password.clone(),
                role: Role::Admin,
            })
            .await?;
        tracing::info!(
            name = "users.bootstrap.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            user_id = created.id,
            message = "Created bootstrap administrator"
        );
        Ok(Some(created))
    }
}
