//! Database backups through `pg_dump`.
//!
//! `database` backups are a plain SQL dump; `full` backups zip the dump together
//! with the uploads directory. Each job runs as a spawned task registered in the
//! [`BackupTaskManager`] so it can be cancelled while `pg_dump` is running.
//!
//! ## Submodules
//!
//! - `task_manager` - Cancel signals of running jobs
//! - `archive` - ZIP bundling for full backups

pub mod archive;
pub mod task_manager;

pub use task_manager::BackupTaskManager;

use crate::AppResources;
use crate::entity::notification::NotificationType;
use crate::entity::system_backup::{self, BackupStatus, BackupType};
use crate::entity::system_event::EventSeverity;
use crate::error::{AppError, AppResult};
use crate::notifications::{NewNotification, NotificationsService};
use crate::pagination::{Page, PageParams, paginate};
use crate::system::SystemService;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
    QueryOrder,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::process::Command;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("pg_dump exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Backup was cancelled")]
    Cancelled,
}

/// A finished backup file ready to be streamed to the client.
#[derive(Debug)]
pub struct BackupDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn stem(id: i32, at: OffsetDateTime) -> String {
    let stamp = at
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("backup-{id}-{stamp}")
}

fn content_type(backup_type: BackupType) -> &'static str {
    match backup_type {
        BackupType::Database => "application/sql",
        BackupType::Full => "application/zip",
    }
}

/// Hex encoded SHA-256 of a file.
pub async fn sha256_file(path: &Path) -> Result<String, BackupError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok::<_, BackupError>(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| BackupError::Io(std::io::Error::other(e)))?
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                name = "backups.remove_file.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                path = %path.display(),
                error = %e,
                message = "Failed to remove backup file"
            );
        }
    }
}

pub struct BackupService {
    resources: AppResources,
    tasks: Arc<BackupTaskManager>,
}

impl BackupService {
    pub fn new(resources: AppResources, tasks: Arc<BackupTaskManager>) -> Self {
        Self { resources, tasks }
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from(&self.resources.config.backups.directory)
    }

    /// Store a pending backup and start it in the background.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        backup_type: BackupType,
        requested_by: Option<i32>,
    ) -> AppResult<system_backup::Model> {
        let backup = self.enqueue(backup_type, requested_by).await?;
        let cancel = self.tasks.register(backup.id).await;
        let service = BackupService::new(self.resources.clone(), self.tasks.clone());
        let id = backup.id;
        tokio::spawn(async move {
            if let Err(e) = service.run(id, cancel).await {
                tracing::error!(
                    name = "backups.run.failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    backup_id = id,
                    error = %e,
                    message = "Backup task could not record its outcome"
                );
            }
        });
        Ok(backup)
    }

    /// Store a pending backup without starting it.
    pub async fn enqueue(
        &self,
        backup_type: BackupType,
        requested_by: Option<i32>,
    ) -> AppResult<system_backup::Model> {
        Ok(system_backup::ActiveModel {
            backup_type: Set(backup_type),
            status: Set(BackupStatus::Pending),
            file_path: Set(None),
            file_size: Set(None),
            checksum: Set(None),
            requested_by: Set(requested_by),
            error_message: Set(None),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        }
        .insert(self.resources.db.as_ref())
        .await?)
    }

    /// Apply `changes` to backup `id` only while its status is one of `from`.
    /// Returns whether the row was updated.
    async fn transition(
        &self,
        id: i32,
        from: &[BackupStatus],
        changes: system_backup::ActiveModel,
    ) -> AppResult<bool> {
        let result = system_backup::Entity::update_many()
            .set(changes)
            .filter(system_backup::Column::Id.eq(id))
            .filter(system_backup::Column::Status.is_in(from.iter().copied()))
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Run a registered backup job to completion and record the outcome.
    ///
    /// Every status change is conditional on the previous status, so a
    /// concurrent [`cancel`](Self::cancel) always wins.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        id: i32,
        mut cancel: oneshot::Receiver<()>,
    ) -> AppResult<system_backup::Model> {
        let backup = self.get(id).await?;
        if backup.status != BackupStatus::Pending || cancel.try_recv().is_ok() {
            self.tasks.finish(id).await;
            return Ok(backup);
        }
        let started_at = OffsetDateTime::now_utc();
        let claimed = self
            .transition(
                id,
                &[BackupStatus::Pending],
                system_backup::ActiveModel {
                    status: Set(BackupStatus::Running),
                    started_at: Set(Some(started_at)),
                    ..Default::default()
                },
            )
            .await?;
        if !claimed {
            self.tasks.finish(id).await;
            return self.get(id).await;
        }
        let backup = self.get(id).await?;

        let outcome = self.execute(&backup, started_at, &mut cancel).await;
        self.tasks.finish(id).await;
        match outcome {
            Ok(path) => self.record_success(backup, &path).await,
            Err(BackupError::Cancelled) => self.record_stopped(id).await,
            Err(e) => self.record_failure(backup, &e).await,
        }
    }

    async fn execute(
        &self,
        backup: &system_backup::Model,
        started_at: OffsetDateTime,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<PathBuf, BackupError> {
        let directory = self.directory();
        tokio::fs::create_dir_all(&directory).await?;
        let stem = stem(backup.id, started_at);
        let dump = directory.join(format!("{stem}.sql"));

        if let Err(e) = self.dump(&dump, cancel).await {
            remove_quietly(&dump).await;
            return Err(e);
        }
        match backup.backup_type {
            BackupType::Database => Ok(dump),
            BackupType::Full => {
                let zip = directory.join(format!("{stem}.zip"));
                let uploads = self
                    .resources
                    .config
                    .backups
                    .uploads_directory
                    .as_ref()
                    .map(PathBuf::from);
                let (dump_path, zip_path) = (dump.clone(), zip.clone());
                let bundled = tokio::task::spawn_blocking(move || {
                    archive::create_archive(&dump_path, uploads.as_deref(), &zip_path)
                })
                .await
                .map_err(|e| BackupError::Io(std::io::Error::other(e)))?;
                remove_quietly(&dump).await;
                if let Err(e) = bundled {
                    remove_quietly(&zip).await;
                    return Err(e);
                }
                Ok(zip)
            }
        }
    }

    /// Runs `pg_dump` into `path`, killing it when `cancel` fires.
    async fn dump(
        &self,
        path: &Path,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(), BackupError> {
        let program = &self.resources.config.backups.pg_dump_path;
        let child = Command::new(program)
            .arg("--dbname")
            .arg(&self.resources.config.database_url)
            .arg("--format=plain")
            .arg("--no-owner")
            .arg("--file")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackupError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the wait future drops the child, which kills pg_dump.
        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(BackupError::Exit {
                        status: output.status.to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    })
                }
            }
            Ok(()) = cancel => Err(BackupError::Cancelled),
        }
    }

    async fn record_success(
        &self,
        backup: system_backup::Model,
        path: &Path,
    ) -> AppResult<system_backup::Model> {
        let id = backup.id;
        let (size, checksum) = match (tokio::fs::metadata(path).await, sha256_file(path).await) {
            (Ok(meta), Ok(checksum)) => (meta.len() as i64, checksum),
            (Err(e), _) => return self.record_failure(backup, &BackupError::Io(e)).await,
            (_, Err(e)) => return self.record_failure(backup, &e).await,
        };
        let recorded = self
            .transition(
                id,
                &[BackupStatus::Running],
                system_backup::ActiveModel {
                    status: Set(BackupStatus::Completed),
                    file_path: Set(Some(path.to_string_lossy().into_owned())),
                    file_size: Set(Some(size)),
                    checksum: Set(Some(checksum)),
                    completed_at: Set(Some(OffsetDateTime::now_utc())),
                    ..Default::default()
                },
            )
            .await?;
        if !recorded {
            // Cancelled after the dump finished.
            remove_quietly(path).await;
            return self.get(id).await;
        }
        let completed = self.get(id).await?;

        tracing::info!(
            name = "backups.run.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            backup_id = id,
            size = size,
            message = "Backup completed"
        );
        SystemService::new(self.resources.db.clone())
            .record(
                "backup.completed",
                EventSeverity::Info,
                "backups",
                &format!("Backup {id} completed ({size} bytes)"),
                Some(serde_json::json!({ "backup_id": id, "size": size })),
            )
            .await;
        self.notify_requester(&completed).await;
        if let Err(e) = self.enforce_retention().await {
            tracing::warn!(
                name = "backups.retention.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to prune old backups"
            );
        }
        Ok(completed)
    }

    async fn record_failure(
        &self,
        backup: system_backup::Model,
        error: &BackupError,
    ) -> AppResult<system_backup::Model> {
        let id = backup.id;
        tracing::warn!(
            name = "backups.run.failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            backup_id = id,
            error = %error,
            message = "Backup failed"
        );
        let recorded = self
            .transition(
                id,
                &[BackupStatus::Running],
                system_backup::ActiveModel {
                    status: Set(BackupStatus::Failed),
                    error_message: Set(Some(error.to_string())),
                    completed_at: Set(Some(OffsetDateTime::now_utc())),
                    ..Default::default()
                },
            )
            .await?;
        if !recorded {
            return self.get(id).await;
        }
        let failed = self.get(id).await?;
        SystemService::new(self.resources.db.clone())
            .record(
                "backup.failed",
                EventSeverity::Error,
                "backups",
                &format!("Backup {id} failed: {error}"),
                Some(serde_json::json!({ "backup_id": id })),
            )
            .await;
        self.notify_requester(&failed).await;
        Ok(failed)
    }

    /// The job saw its cancel signal. A user cancel has already written the
    /// row; a shutdown has not, so the row is closed here.
    async fn record_stopped(&self, id: i32) -> AppResult<system_backup::Model> {
        self.transition(
            id,
            &[BackupStatus::Pending, BackupStatus::Running],
            system_backup::ActiveModel {
                status: Set(BackupStatus::Cancelled),
                error_message: Set(Some("Stopped during server shutdown".to_string())),
                completed_at: Set(Some(OffsetDateTime::now_utc())),
                ..Default::default()
            },
        )
        .await?;
        self.get(id).await
    }

    /// Mark jobs left pending or running by a previous process as failed.
    /// Called once at startup, before any new job is registered.
    #[tracing::instrument(skip(self))]
    pub async fn fail_interrupted(&self) -> AppResult<u64> {
        let result = system_backup::Entity::update_many()
            .set(system_backup::ActiveModel {
                status: Set(BackupStatus::Failed),
                error_message: Set(Some("Interrupted by server restart".to_string())),
                completed_at: Set(Some(OffsetDateTime::now_utc())),
                ..Default::default()
            })
            .filter(
                system_backup::Column::Status
                    .is_in([BackupStatus::Pending, BackupStatus::Running]),
            )
            .exec(self.resources.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            tracing::warn!(
                name = "backups.recover.interrupted",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                count = result.rows_affected,
                message = "Marked interrupted backups as failed"
            );
        }
        Ok(result.rows_affected)
    }

    async fn notify_requester(&self, backup: &system_backup::Model) {
        let Some(user_id) = backup.requested_by else {
            return;
        };
        let note = match backup.status {
            BackupStatus::Completed => NewNotification::new(
                NotificationType::Backup,
                "Backup completed",
                format!("Backup {} finished successfully", backup.id),
            ),
            _ => NewNotification::new(
                NotificationType::Backup,
                "Backup failed",
                format!(
                    "Backup {} failed: {}",
                    backup.id,
                    backup.error_message.as_deref().unwrap_or("unknown error")
                ),
            ),
        }
        .related("system_backup", backup.id);
        if let Err(e) = NotificationsService::new(self.resources.clone())
            .notify_user(user_id, &note)
            .await
        {
            tracing::warn!(
                name = "backups.notify.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                backup_id = backup.id,
                error = %e,
                message = "Failed to notify backup requester"
            );
        }
    }

    /// Keep the newest `keep_last` completed backups, deleting the rest.
    pub async fn enforce_retention(&self) -> AppResult<u64> {
        let keep = self.resources.config.backups.keep_last as usize;
        let completed = system_backup::Entity::find()
            .filter(system_backup::Column::Status.eq(BackupStatus::Completed))
            .order_by_desc(system_backup::Column::CreatedAt)
            .order_by_desc(system_backup::Column::Id)
            .all(self.resources.db.as_ref())
            .await?;
        let mut removed = 0;
        for old in completed.into_iter().skip(keep) {
            if let Some(path) = &old.file_path {
                remove_quietly(Path::new(path)).await;
            }
            system_backup::Entity::delete_by_id(old.id)
                .exec(self.resources.db.as_ref())
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Stop a pending or running backup.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: i32) -> AppResult<system_backup::Model> {
        let flipped = self
            .transition(
                id,
                &[BackupStatus::Pending, BackupStatus::Running],
                system_backup::ActiveModel {
                    status: Set(BackupStatus::Cancelled),
                    error_message: Set(Some("Cancelled by user".to_string())),
                    completed_at: Set(Some(OffsetDateTime::now_utc())),
                    ..Default::default()
                },
            )
            .await?;
        if !flipped {
            let backup = self.get(id).await?;
            return Err(AppError::conflict(format!(
                "Backup {id} is {} and cannot be cancelled",
                backup.status.to_value()
            )));
        }
        let signalled = self.tasks.cancel(id).await;
        let cancelled = self.get(id).await?;
        tracing::info!(
            name = "backups.cancel.completed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            backup_id = id,
            signalled = signalled,
            message = "Backup cancelled"
        );
        SystemService::new(self.resources.db.clone())
            .record(
                "backup.cancelled",
                EventSeverity::Warning,
                "backups",
                &format!("Backup {id} cancelled"),
                None,
            )
            .await;
        Ok(cancelled)
    }

    pub async fn list(&self, page: PageParams) -> AppResult<Page<system_backup::Model>> {
        let query = system_backup::Entity::find()
            .order_by_desc(system_backup::Column::CreatedAt)
            .order_by_desc(system_backup::Column::Id);
        Ok(paginate(query, self.resources.db.as_ref(), page).await?)
    }

    pub async fn get(&self, id: i32) -> AppResult<system_backup::Model> {
        system_backup::Entity::find_by_id(id)
            .one(self.resources.db.as_ref())
            .await?
            .ok_or_else(|| AppError::not_found(format!("Backup {id} not found")))
    }

    pub async fn download(&self, id: i32) -> AppResult<BackupDownload> {
        let backup = self.get(id).await?;
        if backup.status != BackupStatus::Completed {
            return Err(AppError::conflict(format!(
                "Backup {id} is {} and cannot be downloaded",
                backup.status.to_value()
            )));
        }
        let path = backup
            .file_path
            .as_deref()
            .ok_or_else(|| AppError::not_found(format!("Backup {id} has no file")))?;
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::not_found(format!("Backup file for {id} is missing"))
            }
            _ => AppError::Internal(format!("Failed to read backup {id}: {e}")),
        })?;
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("backup-{id}"));
        Ok(BackupDownload {
            file_name,
            content_type: content_type(backup.backup_type),
            bytes,
        })
    }

    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let backup = self.get(id).await?;
        if matches!(
            backup.status,
            BackupStatus::Pending | BackupStatus::Running
        ) {
            return Err(AppError::conflict(format!(
                "Backup {id} is still {}; cancel it first",
                backup.status.to_value()
            )));
        }
        if let Some(path) = &backup.file_path {
            remove_quietly(Path::new(path)).await;
        }
        system_backup::Entity::delete_by_id(id)
            .exec(self.resources.db.as_ref())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn file_stem_contains_id_and_timestamp() {
        assert_eq!(
            stem(12, datetime!(2026-10-16 08:05:09 UTC)),
            "backup-12-20261016T080509"
        );
    }

    #[tokio::test]
    async fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
