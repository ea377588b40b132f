//! External identities linked to local users.
//!
//! `(service_id, external_id)` is the key, so an external account maps to at
//! most one local user.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_account")]
pub struct Model {
    /// Provider name, e.g. "google", "facebook", "vk"
    #[sea_orm(primary_key, auto_increment = false)]
    pub service_id: String,
    /// Provider-specific user identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_id: String,
    pub user_id: i64,
    /// Whether this identity created the local account
    pub used_for_reg: bool,
    pub name: String,
    pub link: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
