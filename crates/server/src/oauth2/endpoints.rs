//! OAuth2 HTTP endpoints.
//!
//! - `POST /token` - token endpoint for the first-party client
//! - `GET /service` - start a social login, returns the provider URL
//! - `GET /service-callback` - provider redirect target, completes the social login

use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::dispatcher::{GrantType, TokenRequest, TokenResponse};
use crate::oauth2::provider::Service;
use crate::oauth2::state_store::SocialState;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use url::Url;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(token))
        .routes(routes!(service))
        .routes(routes!(service_callback))
        .with_state(state)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ServiceParams {
    /// One of `google`, `facebook`, `vk`
    #[serde(default)]
    pub service: String,
    /// Where the callback sends the browser once the token is issued
    #[serde(default)]
    pub redirect_uri: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceResponse {
    /// Provider authorization URL to send the browser to
    pub url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub scope: Option<String>,
}

/// Address of the caller: forwarding headers first, then the socket peer.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        let ip = header_value("x-forwarded-for")
            .or_else(|| header_value("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            });
        Ok(ClientIp(ip))
    }
}

fn no_store() -> [(header::HeaderName, &'static str); 2] {
    [
        (header::CACHE_CONTROL, "no-store"),
        (header::PRAGMA, "no-cache"),
    ]
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, params))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Issue an access token",
    description = "Issues a token pair for the first-party client. Client credentials are supplied by the \
                   server; any posted `client_id`/`client_secret` are ignored.\n\n\
                   **Supported grant types:**\n\
                   - `password`: `username` (login or e-mail) and `password`\n\
                   - `refresh_token`: exchange a refresh token, invalidating the old pair\n\
                   - `social_authorization_code`: `state` and `code` from a provider redirect",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued successfully", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 500, description = "Server error", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    ClientIp(ip): ClientIp,
    Form(mut params): Form<TokenRequest>,
) -> Response {
    params.client_id = Some(state.first_party.id.clone());
    params.client_secret = Some(state.first_party.secret.clone());

    match state.dispatcher.dispatch(&params, ip.as_deref()).await {
        Ok(issued) => (no_store(), Json(issued.token)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Start a social login.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/service",
    tag = OAUTH2_TAG,
    operation_id = "Social Login Start",
    summary = "Get the provider authorization URL",
    description = "Creates a short-lived login state and returns the provider URL carrying it.\n\n\
                   With an `Authorization: Bearer` header the external account is linked to the \
                   authenticated user when the flow completes.",
    params(ServiceParams),
    security((), ("Authorization" = [])),
    responses(
        (status = 200, description = "Provider authorization URL", body = ServiceResponse),
        (status = 400, description = "Unknown service, missing redirect_uri or invalid bearer token", body = String, content_type = "text/plain"),
        (status = 500, description = "Server error", body = String, content_type = "text/plain"),
    )
)]
pub async fn service(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Query(params): Query<ServiceParams>,
) -> Response {
    let user_id = match bearer_token(&headers) {
        Ok(None) => 0,
        Ok(Some(token)) => match state.dispatcher.authenticate_bearer(token).await {
            Ok(user_id) => user_id,
            Err(e) => return (e.status(), e.to_string()).into_response(),
        },
        Err(e) => return (e.status(), e.to_string()).into_response(),
    };

    let Ok(service) = params.service.parse::<Service>() else {
        return (StatusCode::BAD_REQUEST, "unexpected service").into_response();
    };
    if params.redirect_uri.is_empty() || Url::parse(&params.redirect_uri).is_err() {
        return (StatusCode::BAD_REQUEST, "invalid redirect_uri").into_response();
    }
    let Some(provider) = state.providers.get(service) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let social = SocialState {
        user_id,
        language: state.language_for_host(host),
        service,
        redirect_uri: params.redirect_uri,
    };

    let state_id = match state.states.insert_new(social) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "secure random source unavailable");
            return (StatusCode::INTERNAL_SERVER_ERROR, "server_error").into_response();
        }
    };

    match provider.authorize_url(&state_id) {
        Ok(url) => Json(ServiceResponse { url }).into_response(),
        Err(e) => {
            state.states.delete(&state_id);
            tracing::error!(service = %service, error = %e, "failed to build authorize URL");
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error").into_response()
        }
    }
}

/// Provider redirect target.
#[tracing::instrument(skip(state, params))]
#[utoipa::path(
    get,
    path = "/service-callback",
    tag = OAUTH2_TAG,
    operation_id = "Social Login Callback",
    summary = "Complete a social login",
    description = "Exchanges the provider code, links the external account and redirects to the \
                   `redirect_uri` given to `/service` with the issued token as JSON in the `token` \
                   query parameter. Failures are returned as plain text.",
    params(CallbackParams),
    responses(
        (status = 302, description = "Redirect carrying the issued token"),
        (status = 400, description = "Unknown state, missing code or failed provider exchange", body = String, content_type = "text/plain"),
        (status = 500, description = "Server error", body = String, content_type = "text/plain"),
    )
)]
pub async fn service_callback(
    State(state): State<OAuth2State>,
    ClientIp(ip): ClientIp,
    Query(params): Query<CallbackParams>,
) -> Response {
    let request = TokenRequest {
        grant_type: GrantType::SocialAuthorizationCode.to_string(),
        client_id: Some(state.first_party.id.clone()),
        client_secret: Some(state.first_party.secret.clone()),
        state: params.state,
        code: params.code,
        scope: params.scope,
        ..Default::default()
    };

    let issued = match state.dispatcher.dispatch(&request, ip.as_deref()).await {
        Ok(issued) => issued,
        Err(e) => return (e.status(), e.to_string()).into_response(),
    };
    let Some(redirect_uri) = issued.redirect_uri else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "server_error").into_response();
    };

    match token_redirect(&redirect_uri, &issued.token) {
        Ok(location) => (
            StatusCode::FOUND,
            no_store(),
            [(header::LOCATION, String::from(location))],
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to build token redirect");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// `redirect_uri` with the token JSON appended as the `token` query parameter.
fn token_redirect(redirect_uri: &str, token: &TokenResponse) -> Result<Url, String> {
    let encoded = serde_json::to_string(token).map_err(|e| e.to_string())?;
    let mut url = Url::parse(redirect_uri).map_err(|e| e.to_string())?;
    url.query_pairs_mut().append_pair("token", &encoded);
    Ok(url)
}

/// `Ok(None)` without an Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, OAuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or_else(|| OAuthError::invalid_request("invalid authorization header"))
}
