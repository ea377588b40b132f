//! Shared state of the OAuth2 HTTP endpoints.

use crate::config::{AppConfig, HostConfig};
use crate::oauth2::dispatcher::GrantDispatcher;
use crate::oauth2::provider::ProviderRegistry;
use crate::oauth2::state_store::StateStore;
use std::sync::Arc;

/// Credentials injected into token requests that arrive over HTTP.
#[derive(Clone, Debug, Default)]
pub struct FirstPartyClient {
    pub id: String,
    pub secret: String,
}

#[derive(Clone)]
pub struct OAuth2State {
    pub dispatcher: GrantDispatcher,
    pub states: StateStore,
    pub providers: ProviderRegistry,
    pub first_party: FirstPartyClient,
    pub config: Arc<AppConfig>,
}

impl OAuth2State {
    pub fn new(
        config: Arc<AppConfig>,
        dispatcher: GrantDispatcher,
        states: StateStore,
        providers: ProviderRegistry,
    ) -> Self {
        let first_party = config
            .first_party_client()
            .map(|c| FirstPartyClient {
                id: c.id.clone(),
                secret: c.secret.clone(),
            })
            .unwrap_or_default();
        Self {
            dispatcher,
            states,
            providers,
            first_party,
            config,
        }
    }

    /// UI language for a request, chosen by its `Host` header.
    pub fn language_for_host(&self, host: Option<&str>) -> String {
        let hostname = host.map(|h| h.split(':').next().unwrap_or(h));
        self.config
            .host_for(hostname)
            .map(|h: &HostConfig| h.language.clone())
            .unwrap_or_else(|| "en".to_string())
    }
}
