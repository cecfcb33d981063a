use sea_orm_migration::prelude::*;

use crate::m20261001_000001_create_users_and_sessions::User;
use crate::m20261001_000002_create_stations_and_sensors::{MonitoringStation, Sensor};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MaintenanceSchedule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MaintenanceSchedule::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::StationId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MaintenanceSchedule::SensorId).integer().null())
                    .col(ColumnDef::new(MaintenanceSchedule::Title).string().not_null())
                    .col(ColumnDef::new(MaintenanceSchedule::Description).text().null())
                    .col(
                        ColumnDef::new(MaintenanceSchedule::MaintenanceType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::Status)
                            .string()
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::ScheduledFor)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::RecurrenceDays)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(MaintenanceSchedule::AssignedTo).integer().null())
                    .col(
                        ColumnDef::new(MaintenanceSchedule::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(MaintenanceSchedule::Notes).text().null())
                    .col(ColumnDef::new(MaintenanceSchedule::CreatedBy).integer().null())
                    .col(
                        ColumnDef::new(MaintenanceSchedule::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaintenanceSchedule::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_maintenance_station")
                            .from(MaintenanceSchedule::Table, MaintenanceSchedule::StationId)
                            .to(MonitoringStation::Table, MonitoringStation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_maintenance_sensor")
                            .from(MaintenanceSchedule::Table, MaintenanceSchedule::SensorId)
                            .to(Sensor::Table, Sensor::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_maintenance_assignee")
                            .from(MaintenanceSchedule::Table, MaintenanceSchedule::AssignedTo)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_maintenance_status_scheduled")
                    .table(MaintenanceSchedule::Table)
                    .col(MaintenanceSchedule::Status)
                    .col(MaintenanceSchedule::ScheduledFor)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MaintenanceSchedule::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MaintenanceSchedule {
    Table,
    Id,
    StationId,
    SensorId,
    Title,
    Description,
    MaintenanceType,
    Status,
    ScheduledFor,
    RecurrenceDays,
    AssignedTo,
    StartedAt,
    CompletedAt,
    Notes,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
