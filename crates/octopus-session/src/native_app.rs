//! HTTP client for a Globus-style native-app authorization server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::AuthError;
use crate::flow::{AuthorizationRequest, AuthorizationServer, TokenResponse};
use crate::tokens::TokenSet;

/// Default authorization server.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://auth.globus.org";

/// Page that displays the code to the user after approval.
pub const DEFAULT_REDIRECT_URI: &str = "https://auth.globus.org/v2/web/auth-code";

/// Configuration for [`NativeAppClient`].
#[derive(Debug, Clone)]
pub struct NativeAppConfig {
    pub base_url: String,
    pub redirect_uri: String,
    /// Ask for refresh tokens (`access_type=offline`).
    pub refresh_tokens: bool,
    pub request_timeout: Duration,
}

impl Default for NativeAppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            refresh_tokens: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Public-client authorization-code + PKCE flow over HTTP.
pub struct NativeAppClient {
    http: Client,
    base_url: Url,
    config: NativeAppConfig,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl NativeAppClient {
    pub fn new(config: NativeAppConfig) -> Result<Self, AuthError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))?;
        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        Ok(self.base_url.join(path)?)
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(err) => match err.error_description {
                Some(desc) => format!("{} ({}): {}", status, err.error, desc),
                None => format!("{} ({})", status, err.error),
            },
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => format!("{}: {}", status, body),
        }
    }
}

#[async_trait]
impl AuthorizationServer for NativeAppClient {
    fn authorize_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError> {
        let mut url = self.endpoint("/v2/oauth2/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &request.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &request.scope_string())
                .append_pair("state", &request.state)
                .append_pair("response_type", "code")
                .append_pair("code_challenge", request.pkce.challenge())
                .append_pair("code_challenge_method", request.pkce.method());
            if self.config.refresh_tokens {
                query.append_pair("access_type", "offline");
            }
        }
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        request: &AuthorizationRequest,
        code: &str,
    ) -> Result<TokenSet, AuthError> {
        let url = self.endpoint("/v2/oauth2/token")?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", request.client_id.as_str()),
            ("code_verifier", request.pkce.verifier()),
        ];

        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Exchange(Self::error_message(response).await));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Exchange(format!("malformed token response: {}", e)))?;

        let tokens = body.into_token_set(chrono::Utc::now().timestamp());
        debug!(resource_servers = tokens.len(), "Authorization code exchanged");
        Ok(tokens)
    }

    async fn revoke(&self, client_id: &str, token: &str) -> Result<(), AuthError> {
        let url = self.endpoint("/v2/oauth2/token/revoke")?;
        let response = self
            .http
            .post(url)
            .form(&[("token", token), ("client_id", client_id)])
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let message = Self::error_message(response).await;
            warn!(%message, "Token revocation rejected");
            Err(AuthError::Revocation(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NativeAppClient {
        NativeAppClient::new(NativeAppConfig {
            base_url: server.uri(),
            ..NativeAppConfig::default()
        })
        .unwrap()
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest::new(
            "client-123",
            vec!["openid".to_string(), "urn:fabric:all".to_string()],
        )
    }

    #[test]
    fn authorize_url_carries_pkce_and_offline_access() {
        let client = NativeAppClient::new(NativeAppConfig::default()).unwrap();
        let req = request();
        let url = Url::parse(&client.authorize_url(&req).unwrap()).unwrap();

        assert_eq!(url.path(), "/v2/oauth2/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["scope"], "openid urn:fabric:all");
        assert_eq!(pairs["code_challenge"], req.pkce.challenge());
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], req.state);
    }

    #[tokio::test]
    async fn exchange_posts_verifier_and_parses_tokens() {
        let server = MockServer::start().await;
        let req = request();

        Mock::given(method("POST"))
            .and(path("/v2/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains(format!(
                "code_verifier={}",
                req.pkce.verifier()
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "resource_server": "auth.globus.org",
                "expires_in": 60,
                "scope": "openid",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "other_tokens": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .exchange_code(&req, "the-code")
            .await
            .unwrap();
        assert_eq!(
            tokens.by_resource_server("auth.globus.org").unwrap().access_token,
            "at"
        );
    }

    #[tokio::test]
    async fn exchange_surfaces_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .exchange_code(&request(), "stale")
            .await
            .unwrap_err();
        match err {
            AuthError::Exchange(message) => {
                assert!(message.contains("invalid_grant"));
                assert!(message.contains("code expired"));
            }
            other => panic!("expected exchange error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn revoke_posts_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth2/token/revoke"))
            .and(body_string_contains("token=at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": false})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).revoke("client-123", "at-1").await.unwrap();
    }

    #[tokio::test]
    async fn revoke_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth2/token/revoke"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).revoke("client-123", "at-1").await,
            Err(AuthError::Revocation(_))
        ));
    }
}
