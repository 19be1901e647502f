//! Internal events and user-visible notices.

use crate::error::SessionError;
use crate::instance::InstanceRecord;

/// Something that happened off the engine loop and needs handling on it.
///
/// Timers and spawned REST calls never touch engine state directly; they
/// send one of these and the loop reacts.
#[derive(Debug)]
pub enum EngineEvent {
    /// An instance's input flush timer fired.
    FlushTick {
        /// Instance whose buffer should be flushed.
        name: String,
    },
    /// The local resize debounce went quiet.
    ResizeSettled,
    /// One second of the expiry countdown passed.
    TtlTick,
    /// An instance creation request finished.
    CreateCompleted {
        /// Registry key of the placeholder inserted for the request.
        provisional: String,
        /// The created instance, or why it was refused.
        result: Result<InstanceRecord, SessionError>,
    },
    /// An instance deletion request finished.
    DeleteCompleted {
        /// Instance the request was for.
        name: String,
        /// Outcome.
        result: Result<(), SessionError>,
    },
}

/// A user-visible outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Creation refused: the session has as many instances as allowed.
    CapacityExceeded,
    /// Creation refused: the backend has no room for new instances.
    OutOfCapacity,
    /// The session has ended and its instances are gone.
    SessionEnded,
    /// A request failed; local state is unchanged.
    RequestFailed {
        /// What was attempted (`"create"`, `"delete"`, ...).
        action: String,
        /// Error text.
        message: String,
    },
    /// The channel went up or down.
    ConnectionChanged {
        /// New state.
        connected: bool,
    },
}

impl Notice {
    /// Notice for a failed request of kind `action`.
    pub fn for_error(action: &str, error: &SessionError) -> Self {
        match error {
            SessionError::Capacity => Self::CapacityExceeded,
            SessionError::ResourceExhausted => Self::OutOfCapacity,
            SessionError::Terminated => Self::SessionEnded,
            other => Self::RequestFailed {
                action: action.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_for_error() {
        assert_eq!(
            Notice::for_error("create", &SessionError::Capacity),
            Notice::CapacityExceeded
        );
        assert_eq!(
            Notice::for_error("create", &SessionError::ResourceExhausted),
            Notice::OutOfCapacity
        );
        assert_eq!(
            Notice::for_error("delete", &SessionError::Request("500".into())),
            Notice::RequestFailed {
                action: "delete".into(),
                message: "request failed: 500".into(),
            }
        );
    }
}
