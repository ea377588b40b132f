//! An OAuth2 authorization server.
//!
//! Issues access and refresh tokens for password logins and for social logins
//! through google, facebook and vk, linking external accounts to local users.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{Database, DatabaseConnection, DbErr};

use crate::config::AppConfig;
use crate::error::ProviderError;
use crate::oauth2::linkage::AccountLinkageResolver;
use crate::oauth2::password::{DbUserDirectory, PasswordVerifier};
use crate::oauth2::provider::ProviderRegistry;
use crate::oauth2::state_store::StateStore;
use crate::oauth2::token_store::TokenStore;
use crate::oauth2::{GrantDispatcher, OAuth2State};

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
pub mod tasks;

/// Pause between database connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct AppResources {
    /// Token storage.
    pub db: Arc<DatabaseConnection>,
    /// User directory. May be the same connection as `db`.
    pub users_db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}

/// The stores that need periodic sweeping, alongside the HTTP state using them.
pub struct Components {
    pub oauth: OAuth2State,
    pub tokens: TokenStore,
    pub states: StateStore,
}

impl AppResources {
    /// Wire every component from configuration, with the production identity providers.
    pub fn components(&self) -> Result<Components, ProviderError> {
        let providers = ProviderRegistry::from_config(&self.config.services)?;
        Ok(self.components_with(providers))
    }

    pub fn components_with(&self, providers: ProviderRegistry) -> Components {
        let tokens = TokenStore::new(self.db.clone());
        let states = StateStore::new(Duration::from_secs(self.config.state_store.ttl_secs));
        let passwords = PasswordVerifier::new(
            Arc::new(DbUserDirectory::new(self.users_db.clone())),
            self.config.user_store.salt.clone(),
        );
        let linkage = AccountLinkageResolver::new(self.users_db.clone());

        let dispatcher = GrantDispatcher::new(
            &self.config,
            tokens.clone(),
            passwords,
            states.clone(),
            providers.clone(),
            linkage,
        );
        let oauth = OAuth2State::new(self.config.clone(), dispatcher, states.clone(), providers);

        Components {
            oauth,
            tokens,
            states,
        }
    }
}

/// Connect, retrying until `max_wait` has elapsed.
#[tracing::instrument(skip(url))]
pub async fn connect_with_retry(
    url: &str,
    max_wait: Duration,
) -> Result<DatabaseConnection, DbErr> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        match Database::connect(url).await {
            Ok(db) => return Ok(db),
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(error = %e, "database not reachable yet, retrying");
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}
