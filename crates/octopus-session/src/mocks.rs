use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::flow::{AuthorizationRequest, AuthorizationServer};
use crate::session::DEFAULT_FABRIC_RESOURCE_SERVER;
use crate::tokens::{TokenData, TokenSet};

/// Mock authorization server for testing.
///
/// Issues two tokens per exchange (identity and fabric resource servers),
/// records every revoked token, and can be switched to reject codes or fail
/// revocations.
#[derive(Default)]
pub struct MockAuthorizationServer {
    reject_codes: AtomicBool,
    fail_revocation: AtomicBool,
    exchanges: AtomicUsize,
    last_code: Mutex<Option<String>>,
    revoked: Mutex<Vec<String>>,
}

impl MockAuthorizationServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent exchange fail as if the code had expired.
    pub fn reject_codes(&self, reject: bool) {
        self.reject_codes.store(reject, Ordering::SeqCst);
    }

    pub fn fail_revocation(&self, fail: bool) {
        self.fail_revocation.store(fail, Ordering::SeqCst);
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().ok().and_then(|c| c.clone())
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn token(resource_server: &str, access: &str) -> TokenData {
        TokenData {
            resource_server: resource_server.to_string(),
            access_token: access.to_string(),
            refresh_token: Some(format!("{}-refresh", access)),
            expires_at_seconds: chrono::Utc::now().timestamp() + 3600,
            scope: "mock".to_string(),
            token_type: "Bearer".to_string(),
        }
    }
}

#[async_trait]
impl AuthorizationServer for MockAuthorizationServer {
    fn authorize_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError> {
        Ok(format!(
            "https://auth.example.test/authorize?client_id={}&state={}&code_challenge={}",
            request.client_id,
            request.state,
            request.pkce.challenge()
        ))
    }

    async fn exchange_code(
        &self,
        _request: &AuthorizationRequest,
        code: &str,
    ) -> Result<TokenSet, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_code.lock() {
            *last = Some(code.to_string());
        }
        if self.reject_codes.load(Ordering::SeqCst) {
            return Err(AuthError::Exchange("invalid_grant: code expired".into()));
        }

        let mut set = TokenSet::new();
        set.insert(Self::token("auth.globus.org", "identity-access"));
        set.insert(Self::token(DEFAULT_FABRIC_RESOURCE_SERVER, "fabric-access"));
        Ok(set)
    }

    async fn revoke(&self, _client_id: &str, token: &str) -> Result<(), AuthError> {
        if self.fail_revocation.load(Ordering::SeqCst) {
            return Err(AuthError::Revocation("mock revocation failure".into()));
        }
        if let Ok(mut revoked) = self.revoked.lock() {
            revoked.push(token.to_string());
        }
        Ok(())
    }
}
