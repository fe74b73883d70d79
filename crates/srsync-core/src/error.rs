//! Error types shared by the store, the transports and the sync boundary.
//!
//! Defined in `srsync-core` so the client can classify transport failures
//! (retry later vs. surface to the caller) without string matching.

use thiserror::Error;

/// Errors raised by a `ProgressStore` implementation or the service on top of it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced deck, card or record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The caller may not write to the target.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The request was rejected before touching storage.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Two writes raced in a way the store could not reconcile.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Snapshot I/O or lock failure.
    #[error("storage failure: {0}")]
    Io(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns `true` for failures the caller must see as a hard error.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StoreError::AccessDenied(_))
    }
}

/// Errors that can occur when talking to the sync server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server refused the write for this user.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The server returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` if the failure should be retried on the next sync cycle.
    ///
    /// Server-side 5xx responses are transient; 4xx other than access
    /// failures mean the request itself is wrong and retrying will not help.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Network(_) => true,
            TransportError::Api { status, .. } => *status >= 500 || *status == 429,
            TransportError::AccessDenied(_) | TransportError::Decode(_) => false,
        }
    }
}

impl From<StoreError> for TransportError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccessDenied(msg) => TransportError::AccessDenied(msg),
            StoreError::NotFound { .. } => TransportError::Api {
                status: 404,
                message: err.to_string(),
            },
            StoreError::Invalid(_) => TransportError::Api {
                status: 400,
                message: err.to_string(),
            },
            StoreError::Conflict(_) => TransportError::Api {
                status: 409,
                message: err.to_string(),
            },
            StoreError::Io(_) => TransportError::Api {
                status: 500,
                message: err.to_string(),
            },
        }
    }
}

/// Why a record submitted to `save` was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("missing deckId")]
    MissingDeckId,

    #[error("missing cardId")]
    MissingCardId,

    #[error("step {0} out of range 0..=11")]
    StepOutOfRange(i64),

    #[error("negative timestamp in {0}")]
    NegativeTimestamp(&'static str),

    #[error("malformed field {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout(30).is_transient());
        assert!(TransportError::Network("reset".into()).is_transient());
        assert!(TransportError::Api {
            status: 503,
            message: "down".into()
        }
        .is_transient());
        assert!(!TransportError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!TransportError::AccessDenied("no".into()).is_transient());
    }

    #[test]
    fn store_error_maps_to_transport() {
        let err: TransportError = StoreError::AccessDenied("deck 4".into()).into();
        assert!(matches!(err, TransportError::AccessDenied(_)));

        let err: TransportError = StoreError::not_found("card", "hund").into();
        assert!(matches!(err, TransportError::Api { status: 404, .. }));
        assert!(err.to_string().contains("card not found: hund"));
    }
}
