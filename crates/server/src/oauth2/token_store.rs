//! Durable storage of issued token pairs.
//!
//! Every operation is a single statement, so atomicity comes from the
//! database. Inserts never overwrite: a value collision surfaces as
//! [`StoreError::Duplicate`].

use crate::entity::oauth_token;
use crate::error::StoreError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, SqlErr,
};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone, Debug)]
pub struct TokenStore {
    db: Arc<DatabaseConnection>,
}

impl TokenStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip_all, fields(client_id = %token.client_id, user_id = token.user_id))]
    pub async fn create(&self, token: oauth_token::Model) -> Result<oauth_token::Model, StoreError> {
        let active = oauth_token::ActiveModel {
            access_token: Set(token.access_token),
            refresh_token: Set(token.refresh_token),
            client_id: Set(token.client_id),
            user_id: Set(token.user_id),
            scope: Set(token.scope),
            created_at: Set(token.created_at),
            access_expires_at: Set(token.access_expires_at),
            refresh_expires_at: Set(token.refresh_expires_at),
        };

        active.insert(self.db.as_ref()).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                StoreError::Duplicate
            } else {
                StoreError::Database(e)
            }
        })
    }

    #[tracing::instrument(skip_all)]
    pub async fn get_by_access(&self, access: &str) -> Result<Option<oauth_token::Model>, DbErr> {
        oauth_token::Entity::find_by_id(access)
            .one(self.db.as_ref())
            .await
    }

    #[tracing::instrument(skip_all)]
    pub async fn get_by_refresh(&self, refresh: &str) -> Result<Option<oauth_token::Model>, DbErr> {
        oauth_token::Entity::find()
            .filter(oauth_token::Column::RefreshToken.eq(refresh))
            .one(self.db.as_ref())
            .await
    }

    /// Returns whether a row was removed.
    #[tracing::instrument(skip_all)]
    pub async fn delete_by_access(&self, access: &str) -> Result<bool, DbErr> {
        let result = oauth_token::Entity::delete_by_id(access)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Returns whether a row was removed.
    #[tracing::instrument(skip_all)]
    pub async fn delete_by_refresh(&self, refresh: &str) -> Result<bool, DbErr> {
        let result = oauth_token::Entity::delete_many()
            .filter(oauth_token::Column::RefreshToken.eq(refresh))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Delete every pair whose access expiry, and refresh expiry if any, has passed.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, DbErr> {
        let result = oauth_token::Entity::delete_many()
            .filter(oauth_token::Column::AccessExpiresAt.lte(now))
            .filter(
                Condition::any()
                    .add(oauth_token::Column::RefreshExpiresAt.is_null())
                    .add(oauth_token::Column::RefreshExpiresAt.lte(now)),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// One sweep pass. Failures are logged, never propagated.
    pub async fn sweep(&self) {
        match self.purge_expired(OffsetDateTime::now_utc()).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "purged expired tokens"),
            Err(e) => tracing::error!(error = %e, "token sweep failed"),
        }
    }
}
