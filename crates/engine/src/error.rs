//! Error types for the sync engine
//!
//! Every error that reaches the ingestion caller is classified as either
//! retryable (redelivering the same event can succeed) or terminal. A failed
//! `ingest` call never leaves partial state behind, so retrying with the
//! identical event is always safe.

use thiserror::Error;

/// Errors surfaced by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database unavailability or a failed transaction commit.
    /// The whole decision/apply sequence is retried, never compensated.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The canonical source could not be reached or returned an error
    /// while breaking a timestamp tie. Transient; the event stays
    /// eligible for redelivery.
    #[error("Canonical source fetch failed: {0}")]
    CanonicalFetch(#[from] stripe::StripeError),

    /// The event envelope or payload is structurally unusable
    /// (e.g. the payload carries no entity id). Not retryable.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A payload could not be serialized for storage.
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid process configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether redelivering the same event can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Database(_) | SyncError::CanonicalFetch(_))
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
