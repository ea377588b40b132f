//! Creates the token table.
//!
//! Rows are keyed by the access token value; the refresh token value carries
//! its own unique index so that a refresh lookup never matches two rows.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(token_table()).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth_token_refresh_token")
                    .table(OAuthToken::Table)
                    .col(OAuthToken::RefreshToken)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // The sweep filters on both expiry columns.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth_token_expiry")
                    .table(OAuthToken::Table)
                    .col(OAuthToken::AccessExpiresAt)
                    .col(OAuthToken::RefreshExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuthToken::Table).to_owned())
            .await
    }
}

/// Values are at most 512 characters so the key stays within MySQL's utf8mb4 index limit.
fn token_table() -> TableCreateStatement {
    Table::create()
        .table(OAuthToken::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(OAuthToken::AccessToken)
                .string_len(512)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(OAuthToken::RefreshToken)
                .string_len(255)
                .null(),
        )
        .col(ColumnDef::new(OAuthToken::ClientId).string().not_null())
        .col(ColumnDef::new(OAuthToken::UserId).big_integer().not_null())
        .col(
            ColumnDef::new(OAuthToken::Scope)
                .text()
                .not_null()
                .default(""),
        )
        .col(
            ColumnDef::new(OAuthToken::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(OAuthToken::AccessExpiresAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(OAuthToken::RefreshExpiresAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned()
}

#[derive(DeriveIden)]
enum OAuthToken {
    #[sea_orm(iden = "oauth_token")]
    Table,
    AccessToken,
    RefreshToken,
    ClientId,
    UserId,
    Scope,
    CreatedAt,
    AccessExpiresAt,
    RefreshExpiresAt,
}
