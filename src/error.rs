//! Error taxonomy for session operations.
//!
//! Every failure the engine can surface to its caller maps onto one
//! [`SessionError`] variant. The variants differ in how they are treated:
//!
//! | Variant             | Retried?          | Registry mutated? | Fatal? |
//! |---------------------|-------------------|-------------------|--------|
//! | `Connectivity`      | yes (transport)   | no                | no     |
//! | `Capacity`          | no                | no                | no     |
//! | `ResourceExhausted` | no                | no                | no     |
//! | `NotFound`          | no                | no                | yes    |
//! | `Request`           | by the user       | no                | no     |
//! | `Terminated`        | no                | no                | yes    |
//! | `UnknownInstance`   | no                | no                | no     |
//! | `Detached`          | no                | no                | no     |

use thiserror::Error;

/// Errors produced by session operations and the REST collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The backend could not be reached. The transport keeps retrying.
    #[error("backend unreachable")]
    Connectivity,

    /// The session already runs the maximum number of instances (HTTP 409).
    #[error("maximum number of instances reached")]
    Capacity,

    /// The backend has no capacity left to provision instances (HTTP 503).
    #[error("backend is out of capacity")]
    ResourceExhausted,

    /// The session does not exist. The session view cannot continue.
    #[error("session {0} not found")]
    NotFound(String),

    /// Generic create/delete failure. Local state is left untouched.
    #[error("request failed: {0}")]
    Request(String),

    /// The session has ended; no further instance operations are allowed.
    #[error("session has been terminated")]
    Terminated,

    /// A command referred to an instance that is not in the registry.
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// Input was typed for an instance that has no terminal attached yet.
    #[error("instance {0} has no attached terminal")]
    Detached(String),
}

impl SessionError {
    /// Whether the error ends the session view for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Terminated)
    }

    /// Whether the error is a creation rejection the user should be told about
    /// but not offered a retry for.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity | Self::ResourceExhausted)
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connectivity
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::NotFound("abc".into()).is_fatal());
        assert!(SessionError::Terminated.is_fatal());
        assert!(!SessionError::Capacity.is_fatal());
        assert!(!SessionError::Request("boom".into()).is_fatal());
        assert!(!SessionError::Connectivity.is_fatal());
    }

    #[test]
    fn test_capacity_classification() {
        assert!(SessionError::Capacity.is_capacity());
        assert!(SessionError::ResourceExhausted.is_capacity());
        assert!(!SessionError::Request("x".into()).is_capacity());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            SessionError::Capacity.to_string(),
            "maximum number of instances reached"
        );
        assert_eq!(
            SessionError::NotFound("s1".into()).to_string(),
            "session s1 not found"
        );
    }
}
