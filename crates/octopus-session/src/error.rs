use thiserror::Error;

/// Errors from the login flow and session lifecycle.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no client identifier configured; set GLOBUS_CLIENT_ID")]
    MissingClientId,

    #[error("no login flow in progress; call diaspora_authenticate first")]
    FlowNotStarted,

    #[error("authorization code is empty")]
    EmptyCode,

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("token revocation failed: {0}")]
    Revocation(String),

    #[error("no cached token for resource server {0}")]
    NoToken(String),

    #[error("session was logged out while the operation was in flight")]
    SessionEnded,

    #[error("authorization server unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid authorization server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("token store error: {0}")]
    TokenStore(#[from] TokenStoreError),
}

/// Errors from persisting or loading cached tokens.
#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("token store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store contents are not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}
