//! OAuth2 authorization server.
//!
//! ## Grant types
//!
//! - `password` - login name or e-mail plus password, checked against the user directory
//! - `refresh_token` - exchanges a refresh token for a new pair, invalidating the old one
//! - `social_authorization_code` - completes a google/facebook/vk login started at `/service`
//!
//! ## Endpoints
//!
//! - `POST /api/oauth/token` - Token endpoint
//! - `GET /api/oauth/service` - Social login start
//! - `GET /api/oauth/service-callback` - Social login completion

pub mod client;
pub mod dispatcher;
pub mod endpoints;
pub mod generate;
pub mod linkage;
pub mod password;
pub mod provider;
pub mod state_store;
pub mod token_store;
mod state;

pub use dispatcher::{GrantDispatcher, GrantType, IssuedToken, TokenRequest, TokenResponse};
pub use endpoints::router;
pub use state::{FirstPartyClient, OAuth2State};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
