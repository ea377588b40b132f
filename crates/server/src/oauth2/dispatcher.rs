//! Token request dispatch.
//!
//! Every request authenticates its client first, then resolves a user id in
//! the grant-specific way and finally mints and persists a fresh token pair.
//! The outcome is either an issued token or an [`OAuthError`].

use crate::config::{AppConfig, HostConfig};
use crate::entity::oauth_token;
use crate::error::{LinkageError, OAuthError, StoreError};
use crate::oauth2::client::{Client, ClientRegistry};
use crate::oauth2::generate::{CredentialGenerator, GenerateBasic};
use crate::oauth2::linkage::{AccountLinkageResolver, RegistrationContext};
use crate::oauth2::password::PasswordVerifier;
use crate::oauth2::provider::ProviderRegistry;
use crate::oauth2::state_store::{SocialState, StateStore};
use crate::oauth2::token_store::TokenStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    Password,
    RefreshToken,
    SocialAuthorizationCode,
    /// Recognised but not served.
    AuthorizationCode,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
            GrantType::SocialAuthorizationCode => "social_authorization_code",
            GrantType::AuthorizationCode => "authorization_code",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "social_authorization_code" => Ok(GrantType::SocialAuthorizationCode),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            _ => Err(OAuthError::UnsupportedGrantType),
        }
    }
}

/// Parameters of a token request, as posted to the token endpoint.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// `password`, `refresh_token` or `social_authorization_code`
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Space-separated list of requested scopes
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: TokenResponse,
    /// Where the social flow asked to be sent back to. `None` for other grants.
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

#[derive(Clone)]
pub struct GrantDispatcher {
    clients: Arc<ClientRegistry>,
    generator: CredentialGenerator,
    tokens: TokenStore,
    passwords: PasswordVerifier,
    states: StateStore,
    providers: ProviderRegistry,
    linkage: AccountLinkageResolver,
    lifetimes: TokenLifetimes,
    hosts: Arc<Vec<HostConfig>>,
}

impl GrantDispatcher {
    pub fn new(
        config: &AppConfig,
        tokens: TokenStore,
        passwords: PasswordVerifier,
        states: StateStore,
        providers: ProviderRegistry,
        linkage: AccountLinkageResolver,
    ) -> Self {
        Self {
            clients: Arc::new(ClientRegistry::from_config(&config.oauth.clients)),
            generator: CredentialGenerator::new(
                config.oauth.access_token_format,
                &config.oauth.secret,
            ),
            tokens,
            passwords,
            states,
            providers,
            linkage,
            lifetimes: TokenLifetimes {
                access: Duration::minutes(config.oauth.access_token_expires_in.into()),
                refresh: Duration::minutes(config.oauth.refresh_token_expires_in.into()),
            },
            hosts: Arc::new(config.hosts.clone()),
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    #[tracing::instrument(
        skip_all,
        fields(grant_type = %request.grant_type, client_id = request.client_id.as_deref())
    )]
    pub async fn dispatch(
        &self,
        request: &TokenRequest,
        client_ip: Option<&str>,
    ) -> Result<IssuedToken, OAuthError> {
        let client_id = required(&request.client_id, "client_id")?;
        let client_secret = request.client_secret.as_deref().unwrap_or_default();
        let client = self.clients.authenticate(client_id, client_secret)?;

        if request.grant_type.is_empty() {
            return Err(OAuthError::invalid_request("grant_type is required"));
        }
        let grant_type: GrantType = request.grant_type.parse()?;
        if !client.is_grant_type_allowed(grant_type) {
            return Err(OAuthError::UnauthorizedClient);
        }

        let result = match grant_type {
            GrantType::Password => self.password_grant(client, request).await,
            GrantType::RefreshToken => self.refresh_grant(client, request).await,
            GrantType::SocialAuthorizationCode => {
                self.social_grant(client, request, client_ip).await
            }
            GrantType::AuthorizationCode => Err(OAuthError::UnsupportedGrantType),
        };
        if let Err(e) = &result {
            tracing::debug!(error = %e, "token request rejected");
        }
        result
    }

    async fn password_grant(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<IssuedToken, OAuthError> {
        let username = required(&request.username, "username")?;
        let password = required(&request.password, "password")?;

        let user_id = match self.passwords.verify(username, password).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => return Err(OAuthError::invalid_grant("invalid username or password")),
            Err(e) => {
                tracing::error!(error = %e, "user directory lookup failed");
                return Err(OAuthError::ServerError);
            }
        };

        let scope = client.negotiate_scope(request.scope.as_deref());
        let token = self.issue(client, user_id, scope).await?;
        Ok(IssuedToken {
            token,
            redirect_uri: None,
        })
    }

    async fn refresh_grant(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<IssuedToken, OAuthError> {
        let refresh = required(&request.refresh_token, "refresh_token")?;

        let prior = self
            .tokens
            .get_by_refresh(refresh)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "refresh token lookup failed");
                OAuthError::ServerError
            })?
            .ok_or_else(|| OAuthError::invalid_grant("invalid refresh token"))?;

        if prior.client_id != client.id {
            return Err(OAuthError::invalid_grant("refresh token was issued to another client"));
        }
        let expired = prior.is_refresh_token_expired();

        // Whoever deletes the prior pair owns the refresh; a concurrent reuse loses here.
        let removed = self.tokens.delete_by_refresh(refresh).await.map_err(|e| {
            tracing::error!(error = %e, "failed to invalidate prior token pair");
            OAuthError::ServerError
        })?;
        if expired {
            return Err(OAuthError::invalid_grant("refresh token expired"));
        }
        if !removed {
            return Err(OAuthError::invalid_grant("invalid refresh token"));
        }

        let scope = narrow_scope(&prior.scope, request.scope.as_deref());
        let token = self.issue(client, prior.user_id, scope).await?;
        Ok(IssuedToken {
            token,
            redirect_uri: None,
        })
    }

    async fn social_grant(
        &self,
        client: &Client,
        request: &TokenRequest,
        client_ip: Option<&str>,
    ) -> Result<IssuedToken, OAuthError> {
        let state_id = required(&request.state, "state")?;
        // Removed before any provider call, so a replayed callback finds nothing.
        let state = self
            .states
            .take(state_id)
            .ok_or_else(|| OAuthError::invalid_request("unknown or expired state"))?;

        let token = self.complete_social(client, request, &state, client_ip).await?;
        Ok(IssuedToken {
            token,
            redirect_uri: Some(state.redirect_uri),
        })
    }

    async fn complete_social(
        &self,
        client: &Client,
        request: &TokenRequest,
        state: &SocialState,
        client_ip: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        let code = required(&request.code, "code")?;
        let provider = self.providers.get(state.service).ok_or_else(|| {
            tracing::error!(service = %state.service, "no identity provider configured");
            OAuthError::ServerError
        })?;

        let identity = provider
            .exchange(code, &state.language)
            .await
            .map_err(|e| {
                tracing::warn!(service = %state.service, error = %e, "provider code exchange failed");
                OAuthError::invalid_grant(format!("{} authorization failed", state.service))
            })?;

        let context = RegistrationContext {
            language: state.language.clone(),
            timezone: self.timezone_for(&state.language),
            ip: client_ip.map(String::from),
        };
        let pre_authenticated = (state.user_id != 0).then_some(state.user_id);

        let user_id = self
            .linkage
            .resolve(&identity, pre_authenticated, &context)
            .await
            .map_err(|e| match e {
                LinkageError::Database(e) => {
                    tracing::error!(error = %e, "account linkage failed");
                    OAuthError::ServerError
                }
                other => {
                    tracing::warn!(service = %state.service, error = %other, "account linkage rejected");
                    OAuthError::invalid_grant(other.to_string())
                }
            })?;

        let scope = client.negotiate_scope(request.scope.as_deref());
        self.issue(client, user_id, scope).await
    }

    /// Mint and persist a token pair, retrying once on a value collision.
    async fn issue(
        &self,
        client: &Client,
        user_id: i64,
        scope: String,
    ) -> Result<TokenResponse, OAuthError> {
        let want_refresh = client.is_grant_type_allowed(GrantType::RefreshToken);
        let mut retried = false;
        loop {
            let now = OffsetDateTime::now_utc();
            let access_expires_at = now + self.lifetimes.access;
            let pair = self.generator.generate(
                &GenerateBasic {
                    client_id: &client.id,
                    user_id,
                    issued_at: now,
                    access_expires_at,
                },
                want_refresh,
            )?;

            let token = oauth_token::Model {
                access_token: pair.access,
                refresh_token: pair.refresh,
                client_id: client.id.clone(),
                user_id,
                scope: scope.clone(),
                created_at: now,
                access_expires_at,
                refresh_expires_at: want_refresh.then(|| now + self.lifetimes.refresh),
            };

            match self.tokens.create(token).await {
                Ok(stored) => {
                    tracing::info!(user_id, client_id = %client.id, "issued token");
                    return Ok(TokenResponse {
                        access_token: stored.access_token,
                        token_type: "Bearer".to_string(),
                        expires_in: self.lifetimes.access.whole_seconds(),
                        refresh_token: stored.refresh_token,
                        scope: stored.scope,
                    });
                }
                Err(StoreError::Duplicate) if !retried => {
                    tracing::warn!("generated token value collided, retrying");
                    retried = true;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to persist token");
                    return Err(OAuthError::ServerError);
                }
            }
        }
    }

    /// Resolve the local user behind a bearer access token.
    ///
    /// Signed tokens are checked by signature and expiry alone; opaque ones
    /// must be present in the store and unexpired.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate_bearer(&self, access_token: &str) -> Result<i64, OAuthError> {
        let invalid = || OAuthError::invalid_request("invalid access token");

        match self.generator {
            CredentialGenerator::Jwt { .. } => self
                .generator
                .verify_signed(access_token)
                .and_then(|claims| claims.user_id())
                .ok_or_else(invalid),
            CredentialGenerator::Opaque => {
                let token = self
                    .tokens
                    .get_by_access(access_token)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "access token lookup failed");
                        OAuthError::ServerError
                    })?
                    .ok_or_else(invalid)?;
                if token.is_access_token_expired() {
                    return Err(invalid());
                }
                Ok(token.user_id)
            }
        }
    }

    fn timezone_for(&self, language: &str) -> String {
        self.hosts
            .iter()
            .find(|h| h.language == language)
            .or_else(|| self.hosts.first())
            .map(|h| h.timezone.clone())
            .unwrap_or_else(|| "UTC".to_string())
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(OAuthError::invalid_request(format!("{name} is required"))),
    }
}

/// A refresh keeps the prior scope unless a valid subset of it is requested.
fn narrow_scope(prior: &str, requested: Option<&str>) -> String {
    let narrowed: Vec<&str> = requested
        .unwrap_or_default()
        .split_whitespace()
        .filter(|s| prior.split_whitespace().any(|p| p == *s))
        .collect();
    if narrowed.is_empty() {
        prior.to_string()
    } else {
        narrowed.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_types_parse() {
        assert_eq!("password".parse::<GrantType>(), Ok(GrantType::Password));
        assert_eq!(
            "social_authorization_code".parse::<GrantType>(),
            Ok(GrantType::SocialAuthorizationCode)
        );
        assert_eq!(
            "client_credentials".parse::<GrantType>(),
            Err(OAuthError::UnsupportedGrantType)
        );
        assert_eq!(GrantType::RefreshToken.to_string(), "refresh_token");
    }

    #[test]
    fn refresh_scope_only_narrows() {
        assert_eq!(narrow_scope("read write", None), "read write");
        assert_eq!(narrow_scope("read write", Some("read")), "read");
        assert_eq!(narrow_scope("read", Some("read admin")), "read");
        assert_eq!(narrow_scope("read", Some("admin")), "read");
        assert_eq!(narrow_scope("", Some("admin")), "");
    }

    #[test]
    fn required_rejects_missing_and_empty() {
        assert_eq!(required(&Some("x".into()), "code"), Ok("x"));
        assert_eq!(
            required(&Some(String::new()), "code"),
            Err(OAuthError::invalid_request("code is required"))
        );
        assert_eq!(
            required(&None, "state"),
            Err(OAuthError::invalid_request("state is required"))
        );
    }
}
