pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_users_and_sessions;
mod m20261001_000002_create_stations_and_sensors;
mod m20261001_000003_create_readings;
mod m20261001_000004_create_thresholds_and_alerts;
mod m20261001_000005_create_maintenance;
mod m20261001_000006_create_notifications;
mod m20261001_000007_create_exports_and_backups;
mod m20261001_000008_create_settings_and_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_users_and_sessions::Migration),
            Box::new(m20261001_000002_create_stations_and_sensors::Migration),
            Box::new(m20261001_000003_create_readings::Migration),
            Box::new(m20261001_000004_create_thresholds_and_alerts::Migration),
            Box::new(m20261001_000005_create_maintenance::Migration),
            Box::new(m20261001_000006_create_notifications::Migration),
            Box::new(m20261001_000007_create_exports_and_backups::Migration),
            Box::new(m20261001_000008_create_settings_and_events::Migration),
        ]
    }
}
