//! In-memory client registry.
//!
//! Loaded once from configuration and never mutated afterwards.

use crate::config::ClientConfig;
use crate::error::OAuthError;
use crate::oauth2::dispatcher::GrantType;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub secret: String,
    pub allowed_scopes: Vec<String>,
    pub allowed_grant_types: Vec<GrantType>,
}

impl Client {
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant_type)
    }

    /// Narrow a requested scope to what this client may receive.
    ///
    /// Unknown scopes are dropped; if nothing valid remains the client's full
    /// scope set is granted.
    pub fn negotiate_scope(&self, requested: Option<&str>) -> String {
        let validated: Vec<&str> = requested
            .unwrap_or_default()
            .split_whitespace()
            .filter(|s| self.allowed_scopes.iter().any(|a| a == s))
            .collect();
        if validated.is_empty() {
            self.allowed_scopes.join(" ")
        } else {
            validated.join(" ")
        }
    }
}

impl From<&ClientConfig> for Client {
    fn from(config: &ClientConfig) -> Self {
        let allowed_grant_types = config
            .grant_types
            .iter()
            .filter_map(|g| match g.parse::<GrantType>() {
                Ok(grant_type) => Some(grant_type),
                Err(_) => {
                    tracing::warn!(client_id = %config.id, grant_type = %g, "ignoring unknown grant type");
                    None
                }
            })
            .collect();
        Client {
            id: config.id.clone(),
            secret: config.secret.clone(),
            allowed_scopes: config.scopes.clone(),
            allowed_grant_types,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
}

impl ClientRegistry {
    pub fn from_config(clients: &[ClientConfig]) -> Self {
        Self {
            clients: clients
                .iter()
                .map(|c| (c.id.clone(), Client::from(c)))
                .collect(),
        }
    }

    pub fn lookup(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Resolve a client and check its secret.
    pub fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<&Client, OAuthError> {
        let client = self.lookup(client_id).ok_or(OAuthError::InvalidClient)?;
        if secrets_match(&client.secret, client_secret) {
            Ok(client)
        } else {
            Err(OAuthError::InvalidClient)
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// Length is not secret.
fn secrets_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::from_config(&[
            ClientConfig {
                id: "default".into(),
                secret: "s3cret".into(),
                scopes: vec!["read".into(), "write".into()],
                grant_types: vec!["password".into(), "refresh_token".into()],
            },
            ClientConfig {
                id: "limited".into(),
                secret: "other".into(),
                scopes: vec![],
                grant_types: vec!["refresh_token".into(), "bogus".into()],
            },
        ])
    }

    #[test]
    fn authenticate_checks_secret() {
        let registry = registry();
        assert_eq!(registry.authenticate("default", "s3cret").unwrap().id, "default");
        assert_eq!(
            registry.authenticate("default", "wrong"),
            Err(OAuthError::InvalidClient)
        );
        assert_eq!(
            registry.authenticate("missing", "s3cret"),
            Err(OAuthError::InvalidClient)
        );
    }

    #[test]
    fn unknown_grant_types_are_dropped() {
        let registry = registry();
        let limited = registry.lookup("limited").unwrap();
        assert_eq!(limited.allowed_grant_types, vec![GrantType::RefreshToken]);
        assert!(!limited.is_grant_type_allowed(GrantType::Password));
    }

    #[test]
    fn scope_negotiation_filters_to_allowed() {
        let registry = registry();
        let client = registry.lookup("default").unwrap();
        assert_eq!(client.negotiate_scope(Some("read admin")), "read");
        assert_eq!(client.negotiate_scope(Some("admin")), "read write");
        assert_eq!(client.negotiate_scope(None), "read write");
    }

    #[test]
    fn secret_comparison_behaves_like_eq() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "ab"));
        assert!(!secrets_match("abc", ""));
    }
}
