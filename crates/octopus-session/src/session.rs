//! Session lifecycle: begin/complete authentication, key installation,
//! logout.
//!
//! The session is a single guarded resource. Gate checks take the read side
//! and may hold it for the whole gated operation; login, logout and key
//! installation take the write side. Network calls (code exchange,
//! revocation) never run under the write lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::flow::{AuthorizationRequest, AuthorizationServer};
use crate::tokens::{TokenSet, TokenStore};

/// Scope granting access to the event fabric.
pub const DEFAULT_FABRIC_SCOPE: &str =
    "https://auth.globus.org/scopes/2b9d2f5c-fa32-45b5-875b-b24cd343b917/action_all";

/// Resource server whose token authorizes fabric control-plane calls.
pub const DEFAULT_FABRIC_RESOURCE_SERVER: &str = "2b9d2f5c-fa32-45b5-875b-b24cd343b917";

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub fabric_resource_server: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            scopes: vec![DEFAULT_FABRIC_SCOPE.to_string(), "openid".to_string()],
            fabric_resource_server: DEFAULT_FABRIC_RESOURCE_SERVER.to_string(),
        }
    }
}

/// Broker credentials issued by a key rotation.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessKey {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("access_key", &self.access_key)
            .field("endpoint", &self.endpoint)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// Process-wide session state.
#[derive(Debug, Default)]
pub struct SessionState {
    authenticated: bool,
    access_key: Option<AccessKey>,
    pending: Option<AuthorizationRequest>,
    /// Bumped on every login, logout and key rotation so cached clients
    /// built from older credentials can be detected.
    generation: u64,
}

impl SessionState {
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn key_rotated(&self) -> bool {
        self.access_key.is_some()
    }

    pub fn access_key(&self) -> Option<&AccessKey> {
        self.access_key.as_ref()
    }

    pub fn flow_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of [`SessionManager::logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Cached tokens were found and revocation was attempted for each.
    Revoked { tokens: usize, failures: usize },
    /// Nothing was cached; the call was a no-op.
    NothingCached,
}

/// Point-in-time copy of the session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub key_rotated: bool,
}

/// Flags mirrored out of the lock on every write, readable without queueing
/// behind a pending writer.
#[derive(Default)]
struct StatusMirror {
    authenticated: AtomicBool,
    key_rotated: AtomicBool,
}

impl StatusMirror {
    fn publish(&self, state: &SessionState) {
        self.authenticated
            .store(state.authenticated, Ordering::Release);
        self.key_rotated
            .store(state.access_key.is_some(), Ordering::Release);
    }
}

/// Owns the login flow, the token cache and the session flags.
pub struct SessionManager {
    config: SessionConfig,
    server: Arc<dyn AuthorizationServer>,
    tokens: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    status: StatusMirror,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        server: Arc<dyn AuthorizationServer>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            server,
            tokens,
            state: RwLock::new(SessionState::default()),
            status: StatusMirror::default(),
        }
    }

    /// Current flags, without taking the session lock. May trail a write
    /// that is still in progress.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            authenticated: self.status.authenticated.load(Ordering::Acquire),
            key_rotated: self.status.key_rotated.load(Ordering::Acquire),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shared read access to the session flags. Holding the guard keeps
    /// login, logout and key rotation from interleaving with the caller.
    pub async fn state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().await
    }

    /// Start a new authorization-code flow and return the URL to visit.
    ///
    /// Replaces any flow that was started but never completed.
    pub async fn begin_authentication(&self) -> Result<String, AuthError> {
        let client_id = self
            .config
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingClientId)?;

        let request = AuthorizationRequest::new(client_id, self.config.scopes.clone());
        let url = self.server.authorize_url(&request)?;

        let mut state = self.state.write().await;
        state.pending = Some(request);
        info!("Authorization flow started");
        Ok(url)
    }

    /// Exchange `code` for tokens, persist them and mark the session
    /// authenticated. On any failure the session flags are untouched and the
    /// pending flow is kept so the user can retry with a fresh code.
    pub async fn complete_authentication(&self, code: &str) -> Result<(), AuthError> {
        let request = self
            .state
            .read()
            .await
            .pending
            .clone()
            .ok_or(AuthError::FlowNotStarted)?;

        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::EmptyCode);
        }

        let tokens = match self.server.exchange_code(&request, code).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token exchange failed");
                return Err(e);
            }
        };
        self.tokens.store(&tokens).await?;

        let mut state = self.state.write().await;
        // A concurrent begin_authentication may have replaced the flow.
        if state
            .pending
            .as_ref()
            .is_some_and(|p| p.state == request.state)
        {
            state.pending = None;
        }
        state.authenticated = true;
        state.generation += 1;
        self.status.publish(&state);
        info!(
            resource_servers = tokens.len(),
            generation = state.generation,
            "Login completed"
        );
        Ok(())
    }

    /// Record a freshly rotated broker key.
    ///
    /// Fails with [`AuthError::SessionEnded`] if the session was logged out
    /// after the rotation request was issued.
    pub async fn install_access_key(&self, key: AccessKey) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if !state.authenticated {
            return Err(AuthError::SessionEnded);
        }
        debug!(access_key = %key.access_key, "Access key installed");
        state.access_key = Some(key);
        state.generation += 1;
        self.status.publish(&state);
        Ok(())
    }

    /// Bearer token for the fabric resource server, or the only cached
    /// token when the login produced a single one.
    pub async fn fabric_token(&self) -> Result<String, AuthError> {
        let rs = &self.config.fabric_resource_server;
        let tokens = self
            .tokens
            .load()
            .await?
            .ok_or_else(|| AuthError::NoToken(rs.clone()))?;

        if let Some(token) = tokens.by_resource_server(rs) {
            return Ok(token.access_token.clone());
        }
        match tokens.len() {
            1 => Ok(tokens
                .iter()
                .next()
                .map(|t| t.access_token.clone())
                .unwrap_or_default()),
            _ => Err(AuthError::NoToken(rs.clone())),
        }
    }

    /// Reset the session and revoke every cached token.
    ///
    /// Flags are cleared before any network call, so a failed revocation
    /// still leaves the session logged out. Calling this with nothing cached
    /// is a no-op that succeeds.
    pub async fn logout(&self) -> Result<LogoutOutcome, AuthError> {
        {
            let mut state = self.state.write().await;
            let was_active = state.authenticated || state.access_key.is_some();
            state.authenticated = false;
            state.access_key = None;
            state.pending = None;
            if was_active {
                state.generation += 1;
            }
            self.status.publish(&state);
        }

        let cached = self.tokens.load().await?;
        let Some(tokens) = cached.filter(|t| !t.is_empty()) else {
            self.tokens.clear().await?;
            debug!("Logout with no cached tokens");
            return Ok(LogoutOutcome::NothingCached);
        };

        let failures = self.revoke_all(&tokens).await;
        self.tokens.clear().await?;

        info!(tokens = tokens.len(), failures, "Logged out");
        Ok(LogoutOutcome::Revoked {
            tokens: tokens.len(),
            failures,
        })
    }

    async fn revoke_all(&self, tokens: &TokenSet) -> usize {
        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let mut failures = 0;
        for token in tokens.iter() {
            let mut secrets = vec![token.access_token.as_str()];
            if let Some(refresh) = token.refresh_token.as_deref() {
                secrets.push(refresh);
            }
            for secret in secrets {
                if let Err(e) = self.server.revoke(client_id, secret).await {
                    warn!(
                        resource_server = %token.resource_server,
                        error = %e,
                        "Failed to revoke token"
                    );
                    failures += 1;
                }
            }
        }
        failures
    }
}
