//! The tracker's error-kind sum type.
//!
//! Mirrors the teacher's `OperationError`/`ClassifyError` (thiserror enums
//! with a catch-all `Internal(#[from] anyhow::Error)` arm at the glue layer)
//! but stays inside `tracker-core` as a pure value type: no `anyhow` here,
//! since this crate does no I/O of its own. `tracker-server` wraps this in
//! its own glue errors where it needs `anyhow::Result`.

use std::fmt;

use thiserror::Error;

/// One of the tracker's defined failure categories, with an optional chained
/// cause and a free-form diagnostic string for operator-facing detail.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("unknown machine")]
    UnknownMachine,

    #[error("no available shards")]
    NoShards,

    #[error("transient failure: {diagnostic}")]
    Transient {
        diagnostic: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("request rejected: {diagnostic}")]
    PermanentRejected { diagnostic: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("corrupted data: {diagnostic}")]
    Corrupted {
        diagnostic: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ErrorKind {
    #[must_use]
    pub fn transient(diagnostic: impl Into<String>) -> Self {
        Self::Transient {
            diagnostic: diagnostic.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn transient_with_cause(
        diagnostic: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            diagnostic: diagnostic.into(),
            cause: Some(Box::new(cause)),
        }
    }

    #[must_use]
    pub fn permanent_rejected(diagnostic: impl Into<String>) -> Self {
        Self::PermanentRejected {
            diagnostic: diagnostic.into(),
        }
    }

    #[must_use]
    pub fn corrupted(diagnostic: impl Into<String>) -> Self {
        Self::Corrupted {
            diagnostic: diagnostic.into(),
            cause: None,
        }
    }

    /// Whether this failure is worth retrying (only `Transient` is).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient { .. })
    }
}

/// A single hop's failure or success note, accumulated while the distributed
/// tracker fans a request out across the ring leader and DHT owner.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub hop: String,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(hop: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hop: hop.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.hop, self.message)
    }
}
