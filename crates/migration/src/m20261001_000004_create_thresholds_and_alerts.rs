use sea_orm_migration::prelude::*;

use crate::m20261001_000002_create_stations_and_sensors::{MonitoringStation, Sensor};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Threshold::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Threshold::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Threshold::SensorType).string().not_null())
                    .col(ColumnDef::new(Threshold::Severity).string().not_null())
                    .col(ColumnDef::new(Threshold::MinValue).double().null())
                    .col(ColumnDef::new(Threshold::MaxValue).double().null())
                    .col(ColumnDef::new(Threshold::Unit).string().not_null())
                    .col(
                        ColumnDef::new(Threshold::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Threshold::Description).text().null())
                    .col(
                        ColumnDef::new(Threshold::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Threshold::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_threshold_type_severity_unique")
                    .table(Threshold::Table)
                    .col(Threshold::SensorType)
                    .col(Threshold::Severity)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StationAlert::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StationAlert::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StationAlert::StationId).integer().not_null())
                    .col(ColumnDef::new(StationAlert::SensorId).integer().null())
                    .col(ColumnDef::new(StationAlert::ReadingId).integer().null())
                    .col(ColumnDef::new(StationAlert::ThresholdId).integer().null())
                    .col(ColumnDef::new(StationAlert::AlertType).string().not_null())
                    .col(ColumnDef::new(StationAlert::Severity).string().not_null())
                    .col(
                        ColumnDef::new(StationAlert::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(StationAlert::Message).text().not_null())
                    .col(ColumnDef::new(StationAlert::Value).double().null())
                    .col(ColumnDef::new(StationAlert::AcknowledgedBy).integer().null())
                    .col(
                        ColumnDef::new(StationAlert::AcknowledgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(StationAlert::ResolvedBy).integer().null())
                    .col(
                        ColumnDef::new(StationAlert::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StationAlert::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StationAlert::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_station_alert_station")
                            .from(StationAlert::Table, StationAlert::StationId)
                            .to(MonitoringStation::Table, MonitoringStation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_station_alert_sensor")
                            .from(StationAlert::Table, StationAlert::SensorId)
                            .to(Sensor::Table, Sensor::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_station_alert_threshold")
                            .from(StationAlert::Table, StationAlert::ThresholdId)
                            .to(Threshold::Table, Threshold::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_station_alert_status")
                    .table(StationAlert::Table)
                    .col(StationAlert::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_station_alert_sensor_status")
                    .table(StationAlert::Table)
                    .col(StationAlert::SensorId)
                    .col(StationAlert::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StationAlert::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Threshold::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Threshold {
    Table,
    Id,
    SensorType,
    Severity,
    MinValue,
    MaxValue,
    Unit,
    IsActive,
    Description,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum StationAlert {
    Table,
    Id,
    StationId,
    SensorId,
    ReadingId,
    ThresholdId,
    AlertType,
    Severity,
    Status,
    Message,
    Value,
    AcknowledgedBy,
    AcknowledgedAt,
    ResolvedBy,
    ResolvedAt,
    CreatedAt,
    UpdatedAt,
}
