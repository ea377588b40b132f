//! Identity provider tests against mocked provider HTTP endpoints.

use auth_server::{
    config::ProviderConfig,
    error::ProviderError,
    oauth2::provider::{
        FacebookProvider, GoogleProvider, IdentityProvider, OAuthApp, ProviderEndpoints, Service,
        VkProvider,
    },
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT: &str = "https://auth.example.org/api/oauth/service-callback";

fn app(server: &MockServer, api_path: &str) -> OAuthApp {
    OAuthApp::new(
        &ProviderConfig {
            client_id: "our-client".into(),
            client_secret: "our-secret".into(),
            scopes: vec!["profile".into()],
        },
        REDIRECT,
        ProviderEndpoints {
            auth_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            api_url: format!("{}{api_path}", server.uri()),
        },
    )
}

async fn mount_token(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=the-code"))
        .and(body_string_contains("client_secret=our-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_google_exchange_reads_userinfo() {
    let server = MockServer::start().await;
    mount_token(&server, "google-at").await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer google-at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1098765",
            "name": "Ada Lovelace",
            "link": "https://plus.example.org/ada"
        })))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(app(&server, "/userinfo"), reqwest::Client::new());
    let identity = provider.exchange("the-code", "en").await.unwrap();

    assert_eq!(identity.service, Service::Google);
    assert_eq!(identity.external_id, "1098765");
    assert_eq!(identity.display_name, "Ada Lovelace");
    assert_eq!(identity.profile_url, "https://plus.example.org/ada");
}

#[tokio::test]
async fn test_facebook_exchange_requests_id_and_name() {
    let server = MockServer::start().await;
    mount_token(&server, "fb-at").await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(query_param("fields", "id,name"))
        .and(header("authorization", "Bearer fb-at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "4242",
            "name": "Grace Hopper"
        })))
        .mount(&server)
        .await;

    let provider = FacebookProvider::new(app(&server, "/me"), reqwest::Client::new());
    let identity = provider.exchange("the-code", "en").await.unwrap();

    assert_eq!(identity.service, Service::Facebook);
    assert_eq!(identity.external_id, "4242");
    assert_eq!(identity.display_name, "Grace Hopper");
    assert!(identity.profile_url.is_empty());
}

#[tokio::test]
async fn test_vk_exchange_builds_name_and_profile_url() {
    let server = MockServer::start().await;
    mount_token(&server, "vk-at").await;
    Mock::given(method("GET"))
        .and(path("/method/users.get"))
        .and(query_param("v", VkProvider::API_VERSION))
        .and(query_param("lang", "ru"))
        .and(query_param("access_token", "vk-at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{
                "id": 77,
                "first_name": "Ivan",
                "last_name": "",
                "screen_name": "ivan77"
            }]
        })))
        .mount(&server)
        .await;

    let provider = VkProvider::new(app(&server, "/method/users.get"), reqwest::Client::new());
    let identity = provider.exchange("the-code", "ru").await.unwrap();

    assert_eq!(identity.service, Service::Vk);
    assert_eq!(identity.external_id, "77");
    assert_eq!(identity.display_name, "Ivan");
    assert_eq!(identity.profile_url, "http://vk.com/ivan77");
}

#[tokio::test]
async fn test_vk_empty_response_is_an_error() {
    let server = MockServer::start().await;
    mount_token(&server, "vk-at").await;
    Mock::given(method("GET"))
        .and(path("/method/users.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": [] })))
        .mount(&server)
        .await;

    let provider = VkProvider::new(app(&server, "/method/users.get"), reqwest::Client::new());
    let result = provider.exchange("the-code", "en").await;
    assert!(matches!(result, Err(ProviderError::EmptyResponse)));
}

#[tokio::test]
async fn test_rejected_code_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(app(&server, "/userinfo"), reqwest::Client::new());
    let result = provider.exchange("expired-code", "en").await;
    assert!(matches!(result, Err(ProviderError::Status(400))));
}

#[tokio::test]
async fn test_token_response_without_access_token_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_type": "Bearer" })))
        .mount(&server)
        .await;

    let provider = FacebookProvider::new(app(&server, "/me"), reqwest::Client::new());
    let result = provider.exchange("the-code", "en").await;
    assert!(matches!(result, Err(ProviderError::MissingAccessToken)));
}

#[tokio::test]
async fn test_profile_failure_surfaces_status() {
    let server = MockServer::start().await;
    mount_token(&server, "google-at").await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let provider = GoogleProvider::new(app(&server, "/userinfo"), reqwest::Client::new());
    let result = provider.exchange("the-code", "en").await;
    assert!(matches!(result, Err(ProviderError::Status(503))));
}

#[tokio::test]
async fn test_authorize_url_points_at_provider() {
    let server = MockServer::start().await;
    let provider = VkProvider::new(app(&server, "/method/users.get"), reqwest::Client::new());

    let url = url::Url::parse(&provider.authorize_url("abc").unwrap()).unwrap();
    assert_eq!(url.path(), "/auth");
    let state: Vec<_> = url
        .query_pairs()
        .filter(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .collect();
    assert_eq!(state, vec!["abc".to_string()]);
}
