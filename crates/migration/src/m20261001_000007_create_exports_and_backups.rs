//! Background job tables: data exports requested by users and database backups.

use sea_orm_migration::prelude::*;

use crate::m20261001_000001_create_users_and_sessions::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataExport::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataExport::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DataExport::RequestedBy).integer().not_null())
                    .col(ColumnDef::new(DataExport::ExportType).string().not_null())
                    .col(ColumnDef::new(DataExport::Format).string().not_null())
                    .col(ColumnDef::new(DataExport::Filters).text().not_null())
                    .col(
                        ColumnDef::new(DataExport::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(DataExport::FilePath).string().null())
                    .col(ColumnDef::new(DataExport::FileSize).big_integer().null())
                    .col(ColumnDef::new(DataExport::RowCount).integer().null())
                    .col(ColumnDef::new(DataExport::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(DataExport::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DataExport::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DataExport::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_export_user")
                            .from(DataExport::Table, DataExport::RequestedBy)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SystemBackup::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SystemBackup::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SystemBackup::BackupType).string().not_null())
                    .col(
                        ColumnDef::new(SystemBackup::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SystemBackup::FilePath).string().null())
                    .col(ColumnDef::new(SystemBackup::FileSize).big_integer().null())
                    .col(ColumnDef::new(SystemBackup::Checksum).string().null())
                    .col(ColumnDef::new(SystemBackup::RequestedBy).integer().null())
                    .col(ColumnDef::new(SystemBackup::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SystemBackup::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SystemBackup::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SystemBackup::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_system_backup_user")
                            .from(SystemBackup::Table, SystemBackup::RequestedBy)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemBackup::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DataExport::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DataExport {
    Table,
    Id,
    RequestedBy,
    ExportType,
    Format,
    Filters,
    Status,
    FilePath,
    FileSize,
    RowCount,
    ErrorMessage,
    CreatedAt,
    CompletedAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum SystemBackup {
    Table,
    Id,
    BackupType,
    Status,
    FilePath,
    FileSize,
    Checksum,
    RequestedBy,
    ErrorMessage,
    StartedAt,
    CompletedAt,
    CreatedAt,
}
