//! Error types for the bridge

use octopus_fabric::FabricError;
use octopus_session::AuthError;
use thiserror::Error;

use crate::gate::Precondition;

/// A gated operation was refused before it ran.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{} (missing precondition: {missing})", .missing.remedy())]
pub struct PreconditionError {
    pub missing: Precondition,
}

/// Failures of a bridge operation. Rendered to the caller as an MCP error
/// result; none of them stop the server.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fabric(#[from] FabricError),
}

impl BridgeError {
    /// Unknown topics are reported as a not-found rejection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::Fabric(FabricError::TopicNotFound(_)))
    }
}

/// A tool call that could not be resolved. Reported as a JSON-RPC error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Backend error: {0}")]
    Backend(#[from] FabricError),

    #[error("Authorization client error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_message_names_remedy_and_precondition() {
        let err = PreconditionError {
            missing: Precondition::KeyRotated,
        };
        let text = err.to_string();
        assert!(text.starts_with("Call create_key once"));
        assert!(text.ends_with("(missing precondition: key rotated)"));
    }

    #[test]
    fn topic_not_found_is_flagged() {
        let err = BridgeError::from(FabricError::TopicNotFound("t".into()));
        assert!(err.is_not_found());
        assert!(!BridgeError::from(AuthError::FlowNotStarted).is_not_found());
    }
}
