//! Typed error hierarchy for the projector.
//!
//! Three top-level enums cover the three layers:
//! - `IndexError`: key-value index backends and codec failures
//! - `HandlerError`: a single projection handler rejecting an activity
//! - `ProjectorError`: a catch-up pass failing as a whole

use projector_common::{Activity, PayloadKind};
use thiserror::Error;

/// Errors from an index transaction.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("key '{key}' not found")]
    NotFound { key: String },

    #[error("failed to encode or decode value at '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("index backend error: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("cannot write '{key}' in a read-only transaction")]
    ReadOnly { key: String },
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.into())
    }
}

/// Errors a projection handler reports for one activity.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("activity {activity_id}: expected {expected} payload, got {actual}")]
    TypeMismatch {
        activity_id: i64,
        expected: &'static str,
        actual: &'static str,
    },

    /// The activity stream was processed out of causal order, e.g. an
    /// operation whose job cannot be resolved to a project.
    #[error("invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl HandlerError {
    pub fn type_mismatch(activity: &Activity, expected: PayloadKind) -> Self {
        Self::TypeMismatch {
            activity_id: activity.id,
            expected: expected.as_str(),
            actual: activity.payload.kind().as_str(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

/// Errors that abort a catch-up pass or an index read.
#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("activity {activity_id} ({name}): {source}")]
    Invariant {
        activity_id: i64,
        name: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("activity store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("transaction closure was never invoked")]
    TransactionSkipped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProjectorError {
    /// Recover a `ProjectorError` that crossed the activity store's
    /// `anyhow` boundary; anything else is a store failure.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<ProjectorError>() {
            Ok(inner) => inner,
            Err(other) => Self::Store(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Index(err) if err.is_not_found())
    }
}
