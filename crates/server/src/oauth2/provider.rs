//! Social identity providers.
//!
//! Each provider turns an authorization code from its redirect into an
//! [`ExternalIdentity`]: exchange the code at the provider's token endpoint,
//! then fetch the profile with the resulting access token.

use crate::config::{ProviderConfig, ServicesConfig};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Upper bound on any single provider HTTP call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported social login services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Google,
    Facebook,
    Vk,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Google, Service::Facebook, Service::Vk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Google => "google",
            Service::Facebook => "facebook",
            Service::Vk => "vk",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Service::Google),
            "facebook" => Ok(Service::Facebook),
            "vk" => Ok(Service::Vk),
            other => Err(format!("unexpected service {other}")),
        }
    }
}

/// Profile of a user as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub service: Service,
    pub external_id: String,
    pub display_name: String,
    pub profile_url: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn service(&self) -> Service;

    /// Provider authorize URL carrying `state`.
    fn authorize_url(&self, state: &str) -> Result<String, ProviderError>;

    /// Exchange an authorization code for the user's profile.
    async fn exchange(&self, code: &str, language: &str) -> Result<ExternalIdentity, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    /// Profile endpoint
    pub api_url: String,
}

impl ProviderEndpoints {
    pub fn google() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            api_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
        }
    }

    pub fn facebook() -> Self {
        Self {
            auth_url: "https://www.facebook.com/v3.2/dialog/oauth".into(),
            token_url: "https://graph.facebook.com/v3.2/oauth/access_token".into(),
            api_url: "https://graph.facebook.com/v6.0/me".into(),
        }
    }

    pub fn vk() -> Self {
        Self {
            auth_url: "https://oauth.vk.com/authorize".into(),
            token_url: "https://oauth.vk.com/access_token".into(),
            api_url: "https://api.vk.com/method/users.get".into(),
        }
    }
}

/// Our registration with a provider.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub endpoints: ProviderEndpoints,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
}

impl OAuthApp {
    pub fn new(config: &ProviderConfig, redirect_uri: &str, endpoints: ProviderEndpoints) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            redirect_uri: redirect_uri.to_string(),
            endpoints,
        }
    }

    pub fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        let mut url = Url::parse(&self.endpoints.auth_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("access_type", "online")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code");
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            query.append_pair("state", state);
        }
        Ok(url.into())
    }

    async fn exchange_code(&self, http: &reqwest::Client, code: &str) -> Result<String, ProviderError> {
        let response = http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }
        let body: TokenEndpointResponse = response.json().await?;
        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::MissingAccessToken)
    }
}

fn http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()?)
}

async fn fetch_json<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ProviderError::Status(response.status().as_u16()));
    }
    Ok(response.json().await?)
}

pub struct GoogleProvider {
    app: OAuthApp,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct GoogleUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    link: Option<String>,
}

impl GoogleProvider {
    pub fn new(app: OAuthApp, http: reqwest::Client) -> Self {
        Self { app, http }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn service(&self) -> Service {
        Service::Google
    }

    fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        self.app.authorize_url(state)
    }

    #[tracing::instrument(skip_all, fields(service = "google"))]
    async fn exchange(&self, code: &str, _language: &str) -> Result<ExternalIdentity, ProviderError> {
        let token = self.app.exchange_code(&self.http, code).await?;
        let user: GoogleUser = fetch_json(
            self.http
                .get(&self.app.endpoints.api_url)
                .bearer_auth(token),
        )
        .await?;
        Ok(ExternalIdentity {
            service: Service::Google,
            external_id: user.id,
            display_name: user.name,
            profile_url: user.link.unwrap_or_default(),
        })
    }
}

pub struct FacebookProvider {
    app: OAuthApp,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct FacebookUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

impl FacebookProvider {
    pub fn new(app: OAuthApp, http: reqwest::Client) -> Self {
        Self { app, http }
    }
}

#[async_trait]
impl IdentityProvider for FacebookProvider {
    fn service(&self) -> Service {
        Service::Facebook
    }

    fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        self.app.authorize_url(state)
    }

    #[tracing::instrument(skip_all, fields(service = "facebook"))]
    async fn exchange(&self, code: &str, _language: &str) -> Result<ExternalIdentity, ProviderError> {
        let token = self.app.exchange_code(&self.http, code).await?;
        let user: FacebookUser = fetch_json(
            self.http
                .get(&self.app.endpoints.api_url)
                .query(&[("fields", "id,name")])
                .bearer_auth(token),
        )
        .await?;
        Ok(ExternalIdentity {
            service: Service::Facebook,
            external_id: user.id,
            display_name: user.name,
            profile_url: String::new(),
        })
    }
}

pub struct VkProvider {
    app: OAuthApp,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct VkUsersResponse {
    #[serde(default)]
    response: Vec<VkUser>,
}

#[derive(Deserialize)]
struct VkUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    screen_name: String,
}

impl VkProvider {
    pub const API_VERSION: &'static str = "5.103";

    pub fn new(app: OAuthApp, http: reqwest::Client) -> Self {
        Self { app, http }
    }
}

#[async_trait]
impl IdentityProvider for VkProvider {
    fn service(&self) -> Service {
        Service::Vk
    }

    fn authorize_url(&self, state: &str) -> Result<String, ProviderError> {
        self.app.authorize_url(state)
    }

    #[tracing::instrument(skip_all, fields(service = "vk"))]
    async fn exchange(&self, code: &str, language: &str) -> Result<ExternalIdentity, ProviderError> {
        let token = self.app.exchange_code(&self.http, code).await?;
        let users: VkUsersResponse = fetch_json(self.http.get(&self.app.endpoints.api_url).query(&[
            ("fields", "id,first_name,last_name,screen_name"),
            ("v", Self::API_VERSION),
            ("lang", language),
            ("access_token", token.as_str()),
        ]))
        .await?;
        let user = users
            .response
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;
        Ok(ExternalIdentity {
            service: Service::Vk,
            external_id: user.id.to_string(),
            display_name: format!("{} {}", user.first_name, user.last_name)
                .trim()
                .to_string(),
            profile_url: format!("http://vk.com/{}", user.screen_name),
        })
    }
}

/// Provider implementations keyed by service.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Service, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.service(), provider);
        self
    }

    /// Production providers for every service, sharing one HTTP client.
    pub fn from_config(services: &ServicesConfig) -> Result<Self, ProviderError> {
        let http = http_client()?;
        let redirect = services.redirect_uri.as_str();
        Ok(Self::new()
            .with(Arc::new(GoogleProvider::new(
                OAuthApp::new(&services.google, redirect, ProviderEndpoints::google()),
                http.clone(),
            )))
            .with(Arc::new(FacebookProvider::new(
                OAuthApp::new(&services.facebook, redirect, ProviderEndpoints::facebook()),
                http.clone(),
            )))
            .with(Arc::new(VkProvider::new(
                OAuthApp::new(&services.vk, redirect, ProviderEndpoints::vk()),
                http,
            ))))
    }

    pub fn get(&self, service: Service) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(&service).cloned()
    }
}
