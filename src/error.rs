//! Error types for tourline.
//!
//! All errors are strongly typed using thiserror and layered by origin:
//! validation, compute backend, worker transport, and controller state.
//! This enables pattern matching on specific error conditions and
//! provides clear error messages.

use chrono::NaiveDate;
use thiserror::Error;

use crate::entity::EntityId;

/// Validation errors raised while checking a dataset or a staged change.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Two records in the same dataset share an identifier.
    #[error("Duplicate entity id: {id}")]
    DuplicateEntityId {
        /// The colliding identifier.
        id: EntityId,
    },

    /// An entity's end date precedes its start date.
    #[error("Invalid date range for {id}: end ({end}) is before start ({start})")]
    InvalidDateRange {
        /// The offending entity.
        id: EntityId,
        /// Declared start date.
        start: NaiveDate,
        /// Declared end date.
        end: NaiveDate,
    },

    /// An entity identifier is empty.
    #[error("Entity id cannot be empty")]
    EmptyEntityId,

    /// A direct mutation referenced an entity that is not in the store.
    #[error("Unknown entity: {id}")]
    UnknownEntity {
        /// The missing identifier.
        id: EntityId,
    },
}

/// Failure modes of a compute backend.
///
/// Backends convert every internal failure into one of these variants;
/// they never panic the hosting worker.
#[derive(Debug, Error)]
pub enum BackendError {
    /// `simulate` or `metrics` was called before `load_dataset`.
    #[error("No dataset loaded")]
    NotLoaded,

    /// The change references a non-existent entity or carries an
    /// uninterpretable payload. The working copy is left untouched.
    #[error("Malformed change: {detail}")]
    Malformed {
        /// Human-readable description of what was wrong.
        detail: String,
    },

    /// Unexpected computation failure.
    #[error("Backend internal error: {message}")]
    Internal {
        /// Human-readable description.
        message: String,
    },
}

/// Transport errors for caller/worker communication.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request was not answered within the configured bound.
    #[error("Request timed out after {duration_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        duration_ms: u64,
    },

    /// The worker thread is no longer running.
    #[error("Worker is gone; transport requires reinitialization")]
    WorkerGone,

    /// The bounded request queue is full.
    #[error("Worker queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The worker answered with an error envelope.
    #[error("Worker rejected request: {message}")]
    Rejected {
        /// Error description from the response envelope.
        message: String,
    },

    /// A payload could not be serialized or deserialized.
    #[error("Transport serialization failed: {message}")]
    SerializationFailed {
        /// Underlying serde error text.
        message: String,
    },
}

/// Invalid controller state transitions.
///
/// These are programming errors: they fail fast rather than no-op.
#[derive(Debug, Error)]
pub enum StateError {
    /// An operation was invoked in a mode that does not permit it.
    #[error("Operation '{operation}' is not valid in {mode} mode")]
    InvalidMode {
        /// Name of the attempted operation.
        operation: String,
        /// The mode the controller was in.
        mode: String,
    },

    /// `commit_simulation` was called with no staged changes.
    #[error("Nothing to commit: no pending changes staged")]
    NothingToCommit,

    /// A direct store mutation was attempted while a sandbox is open.
    #[error("Operation '{operation}' is not valid while a sandbox is open")]
    SandboxOpen {
        /// Name of the attempted operation.
        operation: String,
    },

    /// A sandbox operation was attempted with no sandbox open.
    #[error("Operation '{operation}' requires an open sandbox")]
    NoSandbox {
        /// Name of the attempted operation.
        operation: String,
    },
}

/// Top-level error type for tourline.
#[derive(Debug, Error)]
pub enum TourlineError {
    /// Dataset or change validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A compute backend reported a failure.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The worker transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The controller was driven through an invalid transition.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable description.
        message: String,
    },
}

impl TourlineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a backend error.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a state-machine error.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// A timed-out request is retryable within the same session. A gone
    /// worker is not: the transport must be reinitialized first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => {
                matches!(e, TransportError::Timeout { .. } | TransportError::QueueFull { .. })
            }
            Self::Validation(_) | Self::Backend(_) | Self::State(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for tourline operations.
pub type TourlineResult<T> = Result<T, TourlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_duplicate_id() {
        let err = ValidationError::DuplicateEntityId {
            id: EntityId::from("T1"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Duplicate"));
        assert!(msg.contains("T1"));
    }

    #[test]
    fn validation_error_date_range() {
        let err = ValidationError::InvalidDateRange {
            id: EntityId::from("S1"),
            start: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("before start"));
    }

    #[test]
    fn backend_error_messages() {
        assert_eq!(format!("{}", BackendError::NotLoaded), "No dataset loaded");
        let err = BackendError::Malformed {
            detail: "no entity X9".to_string(),
        };
        assert!(format!("{err}").contains("X9"));
    }

    #[test]
    fn transport_timeout_message() {
        let err = TransportError::Timeout { duration_ms: 30_000 };
        assert!(format!("{err}").contains("30000ms"));
    }

    #[test]
    fn state_error_fails_loud() {
        let err = StateError::InvalidMode {
            operation: "commit_simulation".to_string(),
            mode: "Live".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("commit_simulation"));
        assert!(msg.contains("Live"));
    }

    #[test]
    fn retryable_classification() {
        let timeout: TourlineError = TransportError::Timeout { duration_ms: 100 }.into();
        assert!(timeout.is_transport());
        assert!(timeout.is_retryable());

        let gone: TourlineError = TransportError::WorkerGone.into();
        assert!(!gone.is_retryable());

        let malformed: TourlineError = BackendError::Malformed {
            detail: "x".to_string(),
        }
        .into();
        assert!(malformed.is_backend());
        assert!(!malformed.is_retryable());

        let state: TourlineError = StateError::NothingToCommit.into();
        assert!(state.is_state());
        assert!(!state.is_retryable());
    }

    #[test]
    fn internal_constructor() {
        let err = TourlineError::internal("unexpected");
        assert!(format!("{err}").contains("unexpected"));
        assert!(!err.is_retryable());
    }
}
