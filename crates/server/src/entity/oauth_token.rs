//! Issued access/refresh token pairs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_token")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub access_token: String,
    #[sea_orm(unique)]
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub user_id: i64,
    pub scope: String,
    pub created_at: OffsetDateTime,
    pub access_expires_at: OffsetDateTime,
    pub refresh_expires_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_access_token_expired_at(&self, now: OffsetDateTime) -> bool {
        self.access_expires_at <= now
    }

    /// A pair without a refresh value counts as having an expired refresh token.
    pub fn is_refresh_token_expired_at(&self, now: OffsetDateTime) -> bool {
        match (&self.refresh_token, self.refresh_expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= now,
            _ => true,
        }
    }

    pub fn is_access_token_expired(&self) -> bool {
        self.is_access_token_expired_at(OffsetDateTime::now_utc())
    }

    pub fn is_refresh_token_expired(&self) -> bool {
        self.is_refresh_token_expired_at(OffsetDateTime::now_utc())
    }

    /// Remaining access token lifetime in whole seconds, never negative.
    pub fn expires_in(&self) -> i64 {
        (self.access_expires_at - OffsetDateTime::now_utc())
            .whole_seconds()
            .max(0)
    }

    pub fn scopes_list(&self) -> Vec<String> {
        self.scope.split_whitespace().map(String::from).collect()
    }
}
