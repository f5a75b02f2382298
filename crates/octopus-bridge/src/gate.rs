//! Access Gate.
//!
//! Every registry, key-rotation, produce and consume call is admitted here
//! before its body runs. A denial carries the precondition that failed and
//! nothing downstream is touched.

use std::fmt;

use octopus_session::SessionState;
use tracing::debug;

use crate::error::PreconditionError;

/// A single session requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The login flow was completed.
    LoggedIn,
    /// Broker credentials were rotated at least once this session.
    KeyRotated,
}

impl Precondition {
    pub fn holds(&self, state: &SessionState) -> bool {
        match self {
            Precondition::LoggedIn => state.authenticated(),
            Precondition::KeyRotated => state.key_rotated(),
        }
    }

    /// What the caller has to do to satisfy this precondition.
    pub fn remedy(&self) -> &'static str {
        match self {
            Precondition::LoggedIn => {
                "Please authenticate first via diaspora_authenticate / complete_diaspora_auth"
            }
            Precondition::KeyRotated => "Call create_key once before producing/consuming messages",
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::LoggedIn => f.write_str("logged in"),
            Precondition::KeyRotated => f.write_str("key rotated"),
        }
    }
}

/// How much of the session an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// Control plane: topic registry and key rotation.
    ControlPlane,
    /// Data plane: produce and consume.
    DataPlane,
}

impl AccessLevel {
    pub fn preconditions(&self) -> &'static [Precondition] {
        match self {
            AccessLevel::ControlPlane => &[Precondition::LoggedIn],
            AccessLevel::DataPlane => &[Precondition::LoggedIn, Precondition::KeyRotated],
        }
    }
}

pub struct AccessGate;

impl AccessGate {
    /// Admit an operation at `level`, reporting the first unmet precondition.
    pub fn admit(state: &SessionState, level: AccessLevel) -> Result<(), PreconditionError> {
        for precondition in level.preconditions() {
            if !precondition.holds(state) {
                debug!(?level, missing = %precondition, "Gate denied operation");
                return Err(PreconditionError {
                    missing: *precondition,
                });
            }
        }
        Ok(())
    }
}
