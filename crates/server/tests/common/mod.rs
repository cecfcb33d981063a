//! Shared fixtures for integration tests: an in-memory SQLite schema built from
//! the entities, a config with email disabled and a few record builders.

#![allow(dead_code)]

use envmon::AppResources;
use envmon::auth::users::{NewUser, UsersService};
use envmon::config::{
    AppConfig, BackupConfig, ExportConfig, MetricsConfig, SessionConfig, SmtpConfig,
};
use envmon::entity::monitoring_station::{self, StationStatus};
use envmon::entity::sensor::{self, SensorStatus, SensorType};
use envmon::entity::user::{self, Role};
use envmon::entity::*;
use envmon::sensors::{NewSensor, SensorsService};
use envmon::stations::{NewStation, StationsService};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery";

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    db.execute(backend.build(&schema.create_table_from_entity(entity)))
        .await
        .expect("create table");
}

pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    create_table(&db, user::Entity).await;
    create_table(&db, session::Entity).await;
    create_table(&db, monitoring_station::Entity).await;
    create_table(&db, sensor::Entity).await;
    create_table(&db, sensor_reading::Entity).await;
    create_table(&db, threshold::Entity).await;
    create_table(&db, station_alert::Entity).await;
    create_table(&db, maintenance_schedule::Entity).await;
    create_table(&db, notification::Entity).await;
    create_table(&db, data_export::Entity).await;
    create_table(&db, system_backup::Entity).await;
    create_table(&db, settings::Entity).await;
    create_table(&db, system_event::Entity).await;
    db
}

pub fn create_test_config(dir: &Path) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        bind_address: "127.0.0.1:0".into(),
        frontend_url: "http://localhost:3000".into(),
        smtp: SmtpConfig {
            enabled: false,
            server: "localhost".into(),
            port: 25,
            username: "test".into(),
            password: "test".into(),
            from: "noreply@test.example.org".into(),
        },
        session: SessionConfig::default(),
        exports: ExportConfig {
            directory: dir.join("exports").to_string_lossy().into_owned(),
            retention_hours: 72,
        },
        backups: BackupConfig {
            directory: dir.join("backups").to_string_lossy().into_owned(),
            pg_dump_path: dir
                .join("no-such-pg_dump")
                .to_string_lossy()
                .into_owned(),
            uploads_directory: None,
            keep_last: 3,
        },
        admin: None,
        metrics: MetricsConfig::default(),
    }
}

/// Resources backed by a fresh database. Keep the returned directory alive for
/// as long as export or backup files are needed.
pub async fn create_test_resources() -> (AppResources, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = create_test_db().await;
    let config = Arc::new(create_test_config(dir.path()));
    let mailer = Arc::new(
        lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous("localhost")
            .build(),
    );
    (
        AppResources {
            db: Arc::new(db),
            mailer,
            config,
        },
        dir,
    )
}

pub async fn create_user(resources: &AppResources, email: &str, role: Role) -> user::Model {
    UsersService::new(resources.db.clone())
        .create(NewUser {
            email: email.into(),
            name: email.split('@').next().unwrap_or("user").into(),
            password: PASSWORD.into(),
            role,
        })
        .await
        .expect("create user")
}

pub async fn create_station(resources: &AppResources, code: &str) -> monitoring_station::Model {
    StationsService::new(resources.db.clone())
        .create(NewStation {
            code: code.into(),
            name: format!("Station {code}"),
            latitude: 52.52,
            longitude: 13.405,
            elevation: Some(34.0),
            description: None,
            status: StationStatus::Active,
            installed_at: None,
        })
        .await
        .expect("create station")
}

pub async fn create_sensor(
    resources: &AppResources,
    station_id: i32,
    sensor_type: SensorType,
    serial: &str,
) -> sensor::Model {
    SensorsService::new(resources.db.clone())
        .create(NewSensor {
            station_id,
            sensor_type,
            serial_number: serial.into(),
            model: None,
            unit: None,
            status: SensorStatus::Active,
            min_range: Some(-50.0),
            max_range: Some(60.0),
            calibrated_at: None,
        })
        .await
        .expect("create sensor")
}
