//! Backup jobs against stand-in `pg_dump` scripts: success, failure,
//! retention and cancellation at every stage.

mod common;

use common::{create_test_resources, create_user};
use envmon::AppResources;
use envmon::backups::{BackupService, BackupTaskManager};
use envmon::entity::system_backup::{self, BackupStatus, BackupType};
use envmon::entity::system_event::EventSeverity;
use envmon::entity::user::Role;
use envmon::error::AppError;
use envmon::notifications::NotificationsService;
use envmon::pagination::PageParams;
use envmon::system::{EventFilter, SystemService};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DUMP_SHA256: &str = "b4e0497804e46e0a0b0b8c31975b062152d551bac49c3c2e80932567b4085dcd";

/// Install an executable stand-in for `pg_dump` that writes `SELECT 1;` to the
/// `--file` argument, sleeping `sleep_before` seconds before and `sleep_after`
/// seconds after writing.
#[cfg(unix)]
fn fake_pg_dump(resources: &mut AppResources, dir: &Path, sleep_before: u32, sleep_after: u32) {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(format!("pg_dump-{sleep_before}-{sleep_after}.sh"));
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
             if [ \"$1\" = \"--file\" ]; then shift; out=\"$1\"; fi\n\
             shift\n\
             done\n\
             sleep {sleep_before}\n\
             printf 'SELECT 1;\\n' > \"$out\"\n\
             sleep {sleep_after}\n"
        ),
    )
    .expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    let mut config = (*resources.config).clone();
    config.backups.pg_dump_path = script.to_string_lossy().into_owned();
    resources.config = Arc::new(config);
}

async fn wait_for_status(backups: &BackupService, id: i32, status: BackupStatus) {
    for _ in 0..200 {
        if backups.get(id).await.expect("get").status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("backup {id} never reached {status:?}");
}

#[tokio::test]
async fn test_missing_pg_dump_marks_backup_failed() {
    let (resources, _dir) = create_test_resources().await;
    let admin = create_user(&resources, "admin@example.org", Role::Admin).await;
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups
        .enqueue(BackupType::Database, Some(admin.id))
        .await
        .expect("enqueue");
    let cancel = tasks.register(backup.id).await;
    let finished = backups.run(backup.id, cancel).await.expect("run");

    assert_eq!(finished.status, BackupStatus::Failed);
    assert!(finished.error_message.is_some());
    assert!(finished.file_path.is_none());
    assert!(!tasks.is_running(backup.id).await);

    let events = SystemService::new(resources.db.clone())
        .list_events(
            &EventFilter {
                event_type: Some("backup.failed".into()),
                ..Default::default()
            },
            PageParams::default(),
        )
        .await
        .expect("events");
    assert_eq!(events.total, 1);
    assert_eq!(events.items[0].severity, EventSeverity::Error);

    let unread = NotificationsService::new(resources.clone())
        .unread_count(admin.id)
        .await
        .expect("count");
    assert_eq!(unread, 1);

    let err = backups.download(backup.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_cancel_pending_backup() {
    let (resources, _dir) = create_test_resources().await;
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups.enqueue(BackupType::Full, None).await.expect("enqueue");
    let cancel = tasks.register(backup.id).await;

    let err = backups.delete(backup.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let cancelled = backups.cancel(backup.id).await.expect("cancel");
    assert_eq!(cancelled.status, BackupStatus::Cancelled);
    assert!(!tasks.is_running(backup.id).await);

    // The job notices the cancellation and leaves the row alone.
    let after_run = backups.run(backup.id, cancel).await.expect("run");
    assert_eq!(after_run.status, BackupStatus::Cancelled);

    let err = backups.cancel(backup.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    backups.delete(backup.id).await.expect("delete");
    let err = backups.get(backup.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_list_newest_first() {
    let (resources, _dir) = create_test_resources().await;
    let backups = BackupService::new(resources.clone(), Arc::new(BackupTaskManager::new()));
    let first = backups.enqueue(BackupType::Database, None).await.expect("first");
    let second = backups.enqueue(BackupType::Database, None).await.expect("second");

    let page = backups.list(PageParams::default()).await.expect("list");
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].id, second.id);
    assert_eq!(page.items[1].id, first.id);
}

#[cfg(unix)]
#[tokio::test]
async fn test_successful_backup_is_recorded_and_pruned() {
    let (mut resources, dir) = create_test_resources().await;
    fake_pg_dump(&mut resources, dir.path(), 0, 0);
    let admin = create_user(&resources, "admin@example.org", Role::Admin).await;
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let mut completed = Vec::new();
    for _ in 0..4 {
        let backup = backups
            .enqueue(BackupType::Database, Some(admin.id))
            .await
            .expect("enqueue");
        let cancel = tasks.register(backup.id).await;
        let done = backups.run(backup.id, cancel).await.expect("run");
        assert_eq!(done.status, BackupStatus::Completed);
        assert_eq!(done.checksum.as_deref(), Some(DUMP_SHA256));
        assert_eq!(done.file_size, Some(10));
        assert!(done.completed_at.is_some());
        completed.push(done);
    }

    let newest = completed.last().expect("newest");
    let download = backups.download(newest.id).await.expect("download");
    assert_eq!(download.bytes, b"SELECT 1;\n");
    assert_eq!(download.content_type, "application/sql");
    assert!(download.file_name.ends_with(".sql"));

    // keep_last is 3 in the test config
    let page = backups.list(PageParams::default()).await.expect("list");
    assert_eq!(page.total, 3);
    let oldest = &completed[0];
    assert!(matches!(
        backups.get(oldest.id).await,
        Err(AppError::NotFound(_))
    ));
    let oldest_path = oldest.file_path.as_deref().expect("path");
    assert!(!Path::new(oldest_path).exists());

    let events = SystemService::new(resources.db.clone())
        .list_events(
            &EventFilter {
                event_type: Some("backup.completed".into()),
                ..Default::default()
            },
            PageParams::default(),
        )
        .await
        .expect("events");
    assert_eq!(events.total, 4);
    let unread = NotificationsService::new(resources.clone())
        .unread_count(admin.id)
        .await
        .expect("count");
    assert_eq!(unread, 4);
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_backup_is_a_zip_archive() {
    let (mut resources, dir) = create_test_resources().await;
    fake_pg_dump(&mut resources, dir.path(), 0, 0);
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups.enqueue(BackupType::Full, None).await.expect("enqueue");
    let cancel = tasks.register(backup.id).await;
    let done = backups.run(backup.id, cancel).await.expect("run");
    assert_eq!(done.status, BackupStatus::Completed);

    let download = backups.download(done.id).await.expect("download");
    assert_eq!(download.content_type, "application/zip");
    assert_eq!(&download.bytes[..2], b"PK");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_running_backup() {
    let (mut resources, dir) = create_test_resources().await;
    fake_pg_dump(&mut resources, dir.path(), 30, 0);
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups.enqueue(BackupType::Database, None).await.expect("enqueue");
    let cancel = tasks.register(backup.id).await;
    let job = {
        let service = BackupService::new(resources.clone(), tasks.clone());
        tokio::spawn(async move { service.run(backup.id, cancel).await })
    };
    wait_for_status(&backups, backup.id, BackupStatus::Running).await;

    let cancelled = backups.cancel(backup.id).await.expect("cancel");
    assert_eq!(cancelled.status, BackupStatus::Cancelled);

    let finished = tokio::time::timeout(Duration::from_secs(10), job)
        .await
        .expect("job stops promptly")
        .expect("join")
        .expect("run");
    assert_eq!(finished.status, BackupStatus::Cancelled);
    assert_eq!(finished.error_message.as_deref(), Some("Cancelled by user"));
    assert!(finished.file_path.is_none());
    assert!(!tasks.is_running(backup.id).await);
    backups.delete(backup.id).await.expect("delete");
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_stops_running_backup() {
    let (mut resources, dir) = create_test_resources().await;
    fake_pg_dump(&mut resources, dir.path(), 30, 0);
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups.enqueue(BackupType::Database, None).await.expect("enqueue");
    let cancel = tasks.register(backup.id).await;
    let job = {
        let service = BackupService::new(resources.clone(), tasks.clone());
        tokio::spawn(async move { service.run(backup.id, cancel).await })
    };
    wait_for_status(&backups, backup.id, BackupStatus::Running).await;

    tasks.cancel_all().await;
    let finished = tokio::time::timeout(Duration::from_secs(10), job)
        .await
        .expect("job stops promptly")
        .expect("join")
        .expect("run");
    assert_eq!(finished.status, BackupStatus::Cancelled);
    assert!(finished.completed_at.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_late_cancel_is_not_overwritten_by_completion() {
    let (mut resources, dir) = create_test_resources().await;
    // The dump is written immediately, but pg_dump only exits two seconds later.
    fake_pg_dump(&mut resources, dir.path(), 0, 2);
    let tasks = Arc::new(BackupTaskManager::new());
    let backups = BackupService::new(resources.clone(), tasks.clone());

    let backup = backups.enqueue(BackupType::Database, None).await.expect("enqueue");
    let cancel = tasks.register(backup.id).await;
    let job = {
        let service = BackupService::new(resources.clone(), tasks.clone());
        tokio::spawn(async move { service.run(backup.id, cancel).await })
    };
    wait_for_status(&backups, backup.id, BackupStatus::Running).await;

    // The row changes under the job without its signal firing.
    let running = backups.get(backup.id).await.expect("get");
    let mut active: system_backup::ActiveModel = running.into();
    active.status = Set(BackupStatus::Cancelled);
    active.update(resources.db.as_ref()).await.expect("flip");

    let finished = tokio::time::timeout(Duration::from_secs(10), job)
        .await
        .expect("job finishes")
        .expect("join")
        .expect("run");
    assert_eq!(finished.status, BackupStatus::Cancelled);
    assert!(finished.file_path.is_none());
    assert!(finished.checksum.is_none());
    let leftovers = std::fs::read_dir(dir.path().join("backups"))
        .expect("backup dir")
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_interrupted_backups_fail_on_startup() {
    let (resources, _dir) = create_test_resources().await;
    let backups = BackupService::new(resources.clone(), Arc::new(BackupTaskManager::new()));
    let pending = backups.enqueue(BackupType::Database, None).await.expect("pending");
    let done = backups.enqueue(BackupType::Database, None).await.expect("done");
    backups.cancel(done.id).await.expect("cancel");

    assert_eq!(backups.fail_interrupted().await.expect("recover"), 1);
    let recovered = backups.get(pending.id).await.expect("get");
    assert_eq!(recovered.status, BackupStatus::Failed);
    assert!(recovered.error_message.is_some());
    assert_eq!(
        backups.get(done.id).await.expect("get").status,
        BackupStatus::Cancelled
    );
    backups.delete(pending.id).await.expect("delete");
}
