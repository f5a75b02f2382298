//! Cached OAuth tokens and their persistence.
//!
//! A login yields one token per resource server. The set is kept opaque to
//! the rest of the bridge: callers only ask for a bearer token for a given
//! resource server, or for every token when revoking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TokenStoreError;

/// Token issued for a single resource server.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenData {
    pub resource_server: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds at which the access token expires.
    pub expires_at_seconds: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenData {
    pub fn is_expired_at(&self, now_seconds: i64) -> bool {
        now_seconds >= self.expires_at_seconds
    }
}

impl std::fmt::Debug for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenData")
            .field("resource_server", &self.resource_server)
            .field("expires_at_seconds", &self.expires_at_seconds)
            .field("scope", &self.scope)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// All tokens obtained by one login, keyed by resource server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub tokens: BTreeMap<String, TokenData>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: TokenData) {
        self.tokens.insert(token.resource_server.clone(), token);
    }

    pub fn by_resource_server(&self, resource_server: &str) -> Option<&TokenData> {
        self.tokens.get(resource_server)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenData> {
        self.tokens.values()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Persistence for the token set of the current login.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the cached token set, if any.
    async fn load(&self) -> Result<Option<TokenSet>, TokenStoreError>;

    /// Replace the cached token set.
    async fn store(&self, tokens: &TokenSet) -> Result<(), TokenStoreError>;

    /// Drop the cached token set. Returns whether anything was cached.
    async fn clear(&self) -> Result<bool, TokenStoreError>;
}

/// Process-local token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenSet>, TokenStoreError> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn store(&self, tokens: &TokenSet) -> Result<(), TokenStoreError> {
        *self.tokens.lock().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<bool, TokenStoreError> {
        Ok(self.tokens.lock().await.take().is_some())
    }
}

/// Token store backed by a JSON file, so a login survives restarts of the
/// bridge process.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write against the file.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<TokenSet>, TokenStoreError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, tokens: &TokenSet) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(tokens)?;
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = tokens.len(), "Tokens persisted");
        Ok(())
    }

    async fn clear(&self) -> Result<bool, TokenStoreError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
