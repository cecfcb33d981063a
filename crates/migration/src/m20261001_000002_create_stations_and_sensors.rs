use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MonitoringStation::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MonitoringStation::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MonitoringStation::Code)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(MonitoringStation::Name).string().not_null())
                    .col(ColumnDef::new(MonitoringStation::Latitude).double().not_null())
                    .col(ColumnDef::new(MonitoringStation::Longitude).double().not_null())
                    .col(ColumnDef::new(MonitoringStation::Elevation).double().null())
                    .col(ColumnDef::new(MonitoringStation::Description).text().null())
                    .col(
                        ColumnDef::new(MonitoringStation::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(MonitoringStation::InstalledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MonitoringStation::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MonitoringStation::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Sensor::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sensor::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Sensor::StationId).integer().not_null())
                    .col(ColumnDef::new(Sensor::SensorType).string().not_null())
                    .col(
                        ColumnDef::new(Sensor::SerialNumber)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Sensor::Model).string().null())
                    .col(ColumnDef::new(Sensor::Unit).string().not_null())
                    .col(
                        ColumnDef::new(Sensor::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Sensor::MinRange).double().null())
                    .col(ColumnDef::new(Sensor::MaxRange).double().null())
                    .col(
                        ColumnDef::new(Sensor::CalibratedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Sensor::LastReadingAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Sensor::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sensor::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sensor_station")
                            .from(Sensor::Table, Sensor::StationId)
                            .to(MonitoringStation::Table, MonitoringStation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sensor_station_id")
                    .table(Sensor::Table)
                    .col(Sensor::StationId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sensor::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MonitoringStation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum MonitoringStation {
    Table,
    Id,
    Code,
    Name,
    Latitude,
    Longitude,
    Elevation,
    Description,
    Status,
    InstalledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum Sensor {
    Table,
    Id,
    StationId,
    SensorType,
    SerialNumber,
    Model,
    Unit,
    Status,
    MinRange,
    MaxRange,
    CalibratedAt,
    LastReadingAt,
    CreatedAt,
    UpdatedAt,
}
