//! Rows of the user directory's `users` table.
//!
//! The table is owned by the directory. This server reads credentials from it
//! and inserts minimal profiles for first-time social logins.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub login: Option<String>,
    pub e_mail: Option<String>,
    /// Hex digest of salt + password; empty for accounts created via social login.
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub deleted: bool,
    pub reg_date: OffsetDateTime,
    pub last_online: OffsetDateTime,
    pub timezone: String,
    pub last_ip: Option<String>,
    pub language: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_account::Entity")]
    Accounts,
}

impl Related<super::user_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
