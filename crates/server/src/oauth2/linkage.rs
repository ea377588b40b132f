//! Resolves an external identity to a local user id.
//!
//! A pre-authenticated user always wins and (re)links the identity to itself.
//! Otherwise an existing link is followed, and failing that a minimal local
//! profile is registered; if a concurrent login linked the identity first, the
//! new profile is dropped in favour of that link. In every case the `user_account` row is upserted so
//! display name and profile link stay current.

use crate::entity::{user, user_account};
use crate::error::LinkageError;
use crate::oauth2::provider::ExternalIdentity;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
    sea_query::OnConflict,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Request context recorded on a freshly registered user.
#[derive(Debug, Clone, Default)]
pub struct RegistrationContext {
    pub language: String,
    pub timezone: String,
    pub ip: Option<String>,
}

#[derive(Clone)]
pub struct AccountLinkageResolver {
    users_db: Arc<DatabaseConnection>,
}

impl AccountLinkageResolver {
    pub fn new(users_db: Arc<DatabaseConnection>) -> Self {
        Self { users_db }
    }

    #[tracing::instrument(
        skip(self, identity, context),
        fields(service = %identity.service, external_id = %identity.external_id)
    )]
    pub async fn resolve(
        &self,
        identity: &ExternalIdentity,
        pre_authenticated: Option<i64>,
        context: &RegistrationContext,
    ) -> Result<i64, LinkageError> {
        if identity.external_id.is_empty() {
            return Err(LinkageError::MissingExternalId);
        }
        if identity.display_name.is_empty() {
            return Err(LinkageError::MissingName);
        }

        let txn = self.users_db.begin().await?;

        let user_id = match pre_authenticated {
            Some(user_id) => {
                let exists = user::Entity::find_by_id(user_id)
                    .filter(user::Column::Deleted.eq(false))
                    .one(&txn)
                    .await?
                    .is_some();
                if !exists {
                    return Err(LinkageError::AccountNotFound);
                }
                user_id
            }
            None => match find_linked_user(&txn, identity).await? {
                Some(user_id) => user_id,
                None => {
                    let registered = register_user(&txn, identity, context).await?;
                    if link_new_account(&txn, identity, registered).await? {
                        tracing::info!(user_id = registered, "registered user from social login");
                        registered
                    } else {
                        // A concurrent first login linked this identity after our lookup.
                        user::Entity::delete_by_id(registered).exec(&txn).await?;
                        find_linked_user_locked(&txn, identity)
                            .await?
                            .ok_or(LinkageError::AccountNotFound)?
                    }
                }
            },
        };

        upsert_account(&txn, identity, user_id, pre_authenticated.is_none()).await?;
        txn.commit().await?;
        Ok(user_id)
    }
}

async fn find_linked_user<C: ConnectionTrait>(
    conn: &C,
    identity: &ExternalIdentity,
) -> Result<Option<i64>, LinkageError> {
    Ok(user_account::Entity::find_by_id((
        identity.service.as_str().to_string(),
        identity.external_id.clone(),
    ))
    .one(conn)
    .await?
    .map(|account| account.user_id))
}

/// Locking read, so it sees links committed by transactions that started after ours.
async fn find_linked_user_locked<C: ConnectionTrait>(
    conn: &C,
    identity: &ExternalIdentity,
) -> Result<Option<i64>, LinkageError> {
    Ok(user_account::Entity::find_by_id((
        identity.service.as_str().to_string(),
        identity.external_id.clone(),
    ))
    .lock_exclusive()
    .one(conn)
    .await?
    .map(|account| account.user_id))
}

async fn register_user<C: ConnectionTrait>(
    conn: &C,
    identity: &ExternalIdentity,
    context: &RegistrationContext,
) -> Result<i64, LinkageError> {
    let now = OffsetDateTime::now_utc();
    let created = user::ActiveModel {
        id: NotSet,
        login: Set(None),
        e_mail: Set(None),
        password: Set(String::new()),
        name: Set(identity.display_name.clone()),
        deleted: Set(false),
        reg_date: Set(now),
        last_online: Set(now),
        timezone: Set(context.timezone.clone()),
        last_ip: Set(context.ip.clone()),
        language: Set(context.language.clone()),
    }
    .insert(conn)
    .await?;
    Ok(created.id)
}

fn account_row(
    identity: &ExternalIdentity,
    user_id: i64,
    used_for_reg: bool,
) -> user_account::ActiveModel {
    user_account::ActiveModel {
        service_id: Set(identity.service.as_str().to_string()),
        external_id: Set(identity.external_id.clone()),
        user_id: Set(user_id),
        used_for_reg: Set(used_for_reg),
        name: Set(identity.display_name.clone()),
        link: Set(identity.profile_url.clone()),
    }
}

fn account_key() -> OnConflict {
    OnConflict::columns([
        user_account::Column::ServiceId,
        user_account::Column::ExternalId,
    ])
}

/// Link a freshly registered user. Returns `false` if the identity is already linked.
async fn link_new_account<C: ConnectionTrait>(
    conn: &C,
    identity: &ExternalIdentity,
    user_id: i64,
) -> Result<bool, LinkageError> {
    let inserted = user_account::Entity::insert(account_row(identity, user_id, true))
        .on_conflict(account_key().do_nothing().to_owned())
        .exec_without_returning(conn)
        .await?;
    Ok(inserted > 0)
}

async fn upsert_account<C: ConnectionTrait>(
    conn: &C,
    identity: &ExternalIdentity,
    user_id: i64,
    used_for_reg: bool,
) -> Result<(), LinkageError> {
    user_account::Entity::insert(account_row(identity, user_id, used_for_reg))
        .on_conflict(
            account_key()
                .update_columns([
                    user_account::Column::UserId,
                    user_account::Column::Name,
                    user_account::Column::Link,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}
