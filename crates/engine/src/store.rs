//! Entity store abstraction
//!
//! The store owns the current-state projection: one row per entity ref,
//! carrying the raw attribute payload and the origin timestamp of the last
//! event that won. All mutation flows through a per-entity critical section
//! ([`EntityStore::begin`]) so that the load-decide-write sequence for one
//! entity never interleaves with another writer of the same entity. Events
//! for distinct entities take independent sections and run fully in parallel.
//!
//! The idempotency ledger lives in the same store and is written inside the
//! same critical section: an entity update and its "event processed" marker
//! commit together or not at all.

use crate::error::SyncResult;
use crate::event::{EntityRef, NormalizedEvent};

/// Terminal outcome recorded in the idempotency ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedOutcome {
    /// The event's (or the refetched) payload was written
    Applied,
    /// The event was strictly older than stored state and was dropped
    Skipped,
}

impl RecordedOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordedOutcome::Applied => "applied",
            RecordedOutcome::Skipped => "skipped",
        }
    }
}

/// Keyed storage of current entity state plus the idempotency ledger
pub trait EntityStore: Send + Sync {
    type Tx: EntityTx;

    /// Open the critical section for one entity. While the returned
    /// transaction is live, no other writer may run the load-decide-write
    /// sequence for the same entity ref.
    fn begin(
        &self,
        entity: &EntityRef,
    ) -> impl std::future::Future<Output = SyncResult<Self::Tx>> + Send;

    /// Read-only probe of the idempotency ledger, usable outside any
    /// critical section. A `true` here is authoritative (the ledger is
    /// append-only); a `false` must be re-checked inside the transaction
    /// via [`EntityTx::is_processed`].
    fn is_processed(
        &self,
        event_id: &str,
    ) -> impl std::future::Future<Output = SyncResult<bool>> + Send;
}

/// One per-entity critical section. Dropping an uncommitted transaction
/// rolls every staged write back.
pub trait EntityTx: Send {
    /// Re-check the idempotency ledger from inside the critical section,
    /// on the transaction's own connection. Catches an ingest of the same
    /// event that committed after the caller's fast-path probe.
    fn is_processed(
        &mut self,
        event_id: &str,
    ) -> impl std::future::Future<Output = SyncResult<bool>> + Send;

    /// Origin timestamp of the last event applied to this entity,
    /// `None` if the entity has never been seen.
    fn stored_timestamp(
        &mut self,
    ) -> impl std::future::Future<Output = SyncResult<Option<i64>>> + Send;

    /// Upsert the entity row with the winning payload and the event's
    /// timestamp. The write is monotonic: it never replaces state carrying
    /// a strictly newer timestamp, even if a concurrent first-time writer
    /// slipped in between decision and commit.
    fn upsert_entity(
        &mut self,
        payload: &serde_json::Value,
        event: &NormalizedEvent,
    ) -> impl std::future::Future<Output = SyncResult<()>> + Send;

    /// Record the event in the idempotency ledger. Returns `false` if the
    /// event id was already recorded, meaning another ingest of the same
    /// event won the race; the caller must discard its own work.
    fn record_event(
        &mut self,
        event: &NormalizedEvent,
        outcome: RecordedOutcome,
    ) -> impl std::future::Future<Output = SyncResult<bool>> + Send;

    /// Commit entity write and ledger entry atomically.
    fn commit(self) -> impl std::future::Future<Output = SyncResult<()>> + Send;
}
