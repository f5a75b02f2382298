//! Authorization-code flow seam.
//!
//! The OAuth2 machinery itself lives behind [`AuthorizationServer`]; the
//! session manager only drives it: start a flow, exchange a code, revoke.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AuthError;
use crate::pkce::PkcePair;
use crate::tokens::{TokenData, TokenSet};

/// State of one started-but-not-completed login.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Opaque value echoed back by the authorization server.
    pub state: String,
    pub pkce: PkcePair,
    pub started_at: DateTime<Utc>,
}

impl AuthorizationRequest {
    pub fn new(client_id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes,
            state: uuid::Uuid::new_v4().simple().to_string(),
            pkce: PkcePair::generate(),
            started_at: Utc::now(),
        }
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// An OAuth2 authorization server supporting the native-app
/// (public client, PKCE) authorization-code grant.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// URL the user visits to approve access.
    fn authorize_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        request: &AuthorizationRequest,
        code: &str,
    ) -> Result<TokenSet, AuthError>;

    /// Revoke a single access or refresh token.
    async fn revoke(&self, client_id: &str, token: &str) -> Result<(), AuthError>;
}

/// Token endpoint response. The primary token is at top level; tokens for
/// additional resource servers are listed under `other_tokens`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(flatten)]
    pub primary: TokenResponseEntry,
    #[serde(default)]
    pub other_tokens: Vec<TokenResponseEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponseEntry {
    pub access_token: String,
    pub resource_server: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponseEntry {
    fn into_token(self, now_seconds: i64) -> TokenData {
        TokenData {
            resource_server: self.resource_server,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at_seconds: now_seconds + self.expires_in,
            scope: self.scope,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }
}

impl TokenResponse {
    pub fn into_token_set(self, now_seconds: i64) -> TokenSet {
        let mut set = TokenSet::new();
        set.insert(self.primary.into_token(now_seconds));
        for other in self.other_tokens {
            set.insert(other.into_token(now_seconds));
        }
        set
    }
}
