//! Creates the external identity table.
//!
//! One row per `(service_id, external_id)` pair, pointing at a row of the
//! user directory's `users` table. The directory itself is not managed here.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserAccount::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserAccount::ServiceId).string_len(50).not_null())
                    .col(
                        ColumnDef::new(UserAccount::ExternalId)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserAccount::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(UserAccount::UsedForReg)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(UserAccount::Name).string().not_null())
                    .col(
                        ColumnDef::new(UserAccount::Link)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .primary_key(
                        Index::create()
                            .col(UserAccount::ServiceId)
                            .col(UserAccount::ExternalId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_account_user_id")
                    .table(UserAccount::Table)
                    .col(UserAccount::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserAccount::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserAccount {
    Table,
    ServiceId,
    ExternalId,
    UserId,
    UsedForReg,
    Name,
    Link,
}
