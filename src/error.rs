//! Error taxonomy for the sync engine.
//!
//! Three families: `StoreError` for the local SQLite store, `ApiError` for
//! the server API, and `SyncError` for the orchestrator-facing operations.
//! Connectivity failures are always recoverable (fall back to the offline
//! queue); validation failures surface to the caller and are never enqueued.

use thiserror::Error;

/// Local store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage engine could not be opened. Fatal to offline capability:
    /// callers degrade to direct-network-only behaviour.
    #[error("local store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted record could not be decoded (e.g. malformed JSON column).
    #[error("corrupt {collection} record: {detail}")]
    Corrupt {
        collection: &'static str,
        detail: String,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn corrupt(collection: &'static str, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            collection,
            detail: detail.into(),
        }
    }
}

/// Server API failures, classified by how the orchestrator must react.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server was unreachable (connect failure, timeout). Recoverable:
    /// the operation falls back to the offline queue.
    #[error("{0}")]
    Network(String),

    /// The server rejected the content (HTTP 400/409/422). Surfaced to the
    /// caller immediately so the input can be corrected; never enqueued.
    #[error("{0}")]
    Validation(String),

    /// Anything else (auth failures, 5xx, malformed responses). Treated as
    /// retryable by the reconciliation loop.
    #[error("{0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation(_))
    }
}

/// Orchestrator operation failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A barcode collides with another cached product or pending creation.
    /// Detected client-side before any network attempt or enqueue.
    #[error("{0}")]
    DuplicateBarcode(String),

    /// The server rejected the content during an immediate online attempt.
    #[error("{0}")]
    Validation(String),

    #[error("product {0} not found in local cache")]
    ProductNotFound(i64),

    /// A server call failed in a context with no offline fallback
    /// (e.g. the initial catalog preload).
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
