use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Format of issued access tokens.
///
/// Chosen once per deployment; issuance and bearer validation both follow it.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessTokenFormat {
    /// HS512-signed JWT carrying subject, issue time and expiry.
    #[default]
    Jwt,
    /// Random digest, validated by a token store lookup.
    Opaque,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
}

fn default_grant_types() -> Vec<String> {
    vec![
        "password".into(),
        "refresh_token".into(),
        "social_authorization_code".into(),
    ]
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuthConfig {
    /// Symmetric secret used to sign access tokens.
    pub secret: String,
    #[serde(default)]
    pub access_token_format: AccessTokenFormat,
    pub clients: Vec<ClientConfig>,
    /// Minutes.
    #[serde(default = "default_access_token_expires_in")]
    pub access_token_expires_in: u32,
    /// Minutes.
    #[serde(default = "default_refresh_token_expires_in")]
    pub refresh_token_expires_in: u32,
    /// Seconds between expired token sweeps. Zero disables the sweep.
    #[serde(default = "default_gc_interval_secs")]
    pub token_gc_interval_secs: u64,
}

fn default_access_token_expires_in() -> u32 {
    60
}

fn default_refresh_token_expires_in() -> u32 {
    60 * 24 * 30
}

fn default_gc_interval_secs() -> u64 {
    60
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserStoreConfig {
    /// Prepended to the password before digesting, as the directory stores it.
    #[serde(default)]
    pub salt: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServicesConfig {
    /// Callback URL registered with every provider.
    pub redirect_uri: String,
    #[serde(default)]
    pub google: ProviderConfig,
    #[serde(default)]
    pub facebook: ProviderConfig,
    #[serde(default)]
    pub vk: ProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HostConfig {
    pub hostname: String,
    pub language: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct StateStoreConfig {
    #[serde(default = "default_state_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds between sweeps of abandoned states. Zero disables the sweep.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

fn default_state_ttl_secs() -> u64 {
    3600
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_state_ttl_secs(),
            gc_interval_secs: default_gc_interval_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub database_url: String,
    /// Database holding the user directory. Defaults to `database_url`.
    #[serde(default)]
    pub users_database_url: Option<String>,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub user_store: UserStoreConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// Upper bound on draining in-flight requests during shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn users_database_url(&self) -> &str {
        self.users_database_url
            .as_deref()
            .unwrap_or(&self.database_url)
    }

    /// The client whose credentials are injected into first-party token requests.
    pub fn first_party_client(&self) -> Option<&ClientConfig> {
        self.oauth.clients.first()
    }

    /// Host entry matching the request's `Host` header, falling back to the first one.
    pub fn host_for(&self, hostname: Option<&str>) -> Option<&HostConfig> {
        hostname
            .and_then(|name| self.hosts.iter().find(|h| h.hostname == name))
            .or_else(|| self.hosts.first())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Validation("listen must not be empty".into()));
        }
        if self.oauth.secret.len() < 32 {
            return Err(ConfigError::Validation(
                "oauth.secret must be at least 32 characters".into(),
            ));
        }
        if self.oauth.clients.is_empty() {
            return Err(ConfigError::Validation(
                "oauth.clients must contain at least one client".into(),
            ));
        }
        if self.oauth.access_token_expires_in == 0 || self.oauth.refresh_token_expires_in == 0 {
            return Err(ConfigError::Validation(
                "token lifetimes must be > 0".into(),
            ));
        }
        if self.state_store.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "state_store.ttl_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config.yaml")
}

/// Load configuration from `path`, then apply environment overrides.
///
/// Any environment variable matching a key path separated by double underscores
/// (e.g. `OAUTH__SECRET`) overrides the file value.
pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
