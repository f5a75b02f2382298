//! Identity session for the event-fabric bridge.
//!
//! Owns the native-app authorization-code flow, the token cache and the
//! login/logout lifecycle. The rest of the bridge consults
//! [`SessionManager::state`] before any sensitive operation.
//!
//! ## Lifecycle
//!
//! 1. [`SessionManager::begin_authentication`] builds a PKCE flow and returns
//!    the URL the user must visit.
//! 2. [`SessionManager::complete_authentication`] exchanges the pasted code,
//!    persists the tokens and marks the session authenticated.
//! 3. [`SessionManager::install_access_key`] records broker credentials after
//!    a key rotation.
//! 4. [`SessionManager::logout`] resets both flags and revokes tokens.

#![deny(unsafe_code)]

pub mod error;
pub mod flow;
#[cfg(any(test, feature = "test-util"))]
pub mod mocks;
pub mod native_app;
pub mod pkce;
pub mod session;
pub mod tokens;

pub use error::{AuthError, TokenStoreError};
pub use flow::{AuthorizationRequest, AuthorizationServer, TokenResponse};
#[cfg(any(test, feature = "test-util"))]
pub use mocks::MockAuthorizationServer;
pub use native_app::{NativeAppClient, NativeAppConfig, DEFAULT_AUTH_BASE_URL, DEFAULT_REDIRECT_URI};
pub use pkce::PkcePair;
pub use session::{
    AccessKey, LogoutOutcome, SessionConfig, SessionManager, SessionState, SessionStatus,
    DEFAULT_FABRIC_RESOURCE_SERVER, DEFAULT_FABRIC_SCOPE,
};
pub use tokens::{FileTokenStore, MemoryTokenStore, TokenData, TokenSet, TokenStore};
