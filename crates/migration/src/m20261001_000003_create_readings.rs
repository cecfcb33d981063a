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
                    .table(SensorReading::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SensorReading::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SensorReading::SensorId).integer().not_null())
                    .col(ColumnDef::new(SensorReading::StationId).integer().not_null())
                    .col(ColumnDef::new(SensorReading::Value).double().not_null())
                    .col(ColumnDef::new(SensorReading::Unit).string().not_null())
                    .col(
                        ColumnDef::new(SensorReading::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SensorReading::QualityScore)
                            .double()
                            .not_null()
                            .default(1.0),
                    )
                    .col(
                        ColumnDef::new(SensorReading::IsAnomaly)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SensorReading::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sensor_reading_sensor")
                            .from(SensorReading::Table, SensorReading::SensorId)
                            .to(Sensor::Table, Sensor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sensor_reading_station")
                            .from(SensorReading::Table, SensorReading::StationId)
                            .to(MonitoringStation::Table, MonitoringStation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Time range scans per sensor and per station dominate the read path.
        manager
            .create_index(
                Index::create()
                    .name("idx_sensor_reading_sensor_recorded")
                    .table(SensorReading::Table)
                    .col(SensorReading::SensorId)
                    .col(SensorReading::RecordedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_sensor_reading_station_recorded")
                    .table(SensorReading::Table)
                    .col(SensorReading::StationId)
                    .col(SensorReading::RecordedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SensorReading::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SensorReading {
    Table,
    Id,
    SensorId,
    StationId,
    Value,
    Unit,
    RecordedAt,
    QualityScore,
    IsAnomaly,
    CreatedAt,
}
