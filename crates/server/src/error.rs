use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Error taxonomy surfaced by the token endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client")]
    InvalidClient,
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("unauthorized_client")]
    UnauthorizedClient,
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,
    #[error("server_error")]
    ServerError,
}

impl OAuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnauthorizedClient => "unauthorized_client",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::ServerError => "server_error",
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            OAuthError::InvalidRequest(d) | OAuthError::InvalidGrant(d) => Some(d),
            OAuthError::InvalidClient => Some("Client authentication failed"),
            OAuthError::UnauthorizedClient => {
                Some("The client is not authorized to use this grant type")
            }
            OAuthError::UnsupportedGrantType => Some("The grant type is not supported"),
            OAuthError::ServerError => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        OAuthError::InvalidRequest(description.into())
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        OAuthError::InvalidGrant(description.into())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&OAuthError> for ErrorResponse {
    fn from(err: &OAuthError) -> Self {
        ErrorResponse {
            error: err.error_code().to_string(),
            error_description: err.description().map(String::from),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Failures of the durable token store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same access or refresh value already exists.
    #[error("token value already exists")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Failures of the user directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Failures while exchanging a code with an identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status code {0}")]
    Status(u16),
    #[error("Provider returned no access token")]
    MissingAccessToken,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Other(String),
}

/// Failures while resolving an external identity to a local account.
#[derive(Debug, Error)]
pub enum LinkageError {
    #[error("Failed to get user id")]
    MissingExternalId,
    #[error("Failed to get user name")]
    MissingName,
    #[error("Account not found")]
    AccountNotFound,
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(OAuthError::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            OAuthError::ServerError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            OAuthError::invalid_grant("bad password").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OAuthError::UnsupportedGrantType.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn error_body_carries_code_and_description() {
        let body = ErrorResponse::from(&OAuthError::invalid_request("state is required"));
        assert_eq!(body.error, "invalid_request");
        assert_eq!(body.error_description.as_deref(), Some("state is required"));

        let body = ErrorResponse::from(&OAuthError::ServerError);
        assert_eq!(body.error, "server_error");
        assert!(body.error_description.is_none());
    }
}
