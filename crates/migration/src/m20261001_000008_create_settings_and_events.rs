use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Settings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Settings::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Settings::Value).text().not_null())
                    .col(ColumnDef::new(Settings::Description).text().null())
                    .col(ColumnDef::new(Settings::UpdatedBy).integer().null())
                    .col(
                        ColumnDef::new(Settings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SystemEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SystemEvent::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SystemEvent::EventType).string().not_null())
                    .col(ColumnDef::new(SystemEvent::Severity).string().not_null())
                    .col(ColumnDef::new(SystemEvent::Source).string().not_null())
                    .col(ColumnDef::new(SystemEvent::Message).text().not_null())
                    .col(ColumnDef::new(SystemEvent::Metadata).text().null())
                    .col(
                        ColumnDef::new(SystemEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_system_event_created_at")
                    .table(SystemEvent::Table)
                    .col(SystemEvent::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemEvent::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Settings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Settings {
    Table,
    Key,
    Value,
    Description,
    UpdatedBy,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SystemEvent {
    Table,
    Id,
    EventType,
    Severity,
    Source,
    Message,
    Metadata,
    CreatedAt,
}
