//! Event applier
//!
//! Orchestrates one event end to end inside the entity's critical section:
//! load the stored timestamp, consult the staleness resolver, then either
//! drop the event, write its payload, or refetch canonical state and write
//! that instead. All writes for one event (entity row, subscription line
//! items, idempotency ledger) commit in a single transaction; a failure at
//! any point rolls the whole event back and leaves it eligible for retry.

use crate::error::SyncResult;
use crate::event::NormalizedEvent;
use crate::resolver::{decide, Decision};
use crate::source::CanonicalSource;
use crate::store::{EntityStore, EntityTx, RecordedOutcome};

/// Result of applying a single normalized event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The winning payload was written
    Applied,
    /// The event was strictly older than stored state; nothing was written
    Skipped,
    /// Another ingest of the same event id already completed
    Duplicate,
}

/// Applies events to an [`EntityStore`], breaking timestamp ties through a
/// [`CanonicalSource`]
pub struct EventApplier<S, C> {
    store: S,
    source: C,
}

impl<S: EntityStore, C: CanonicalSource> EventApplier<S, C> {
    pub fn new(store: S, source: C) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one event. The canonical source is consulted only when the
    /// resolver reports a timestamp tie, and exactly once for that event.
    pub async fn apply(&self, event: &NormalizedEvent) -> SyncResult<ApplyOutcome> {
        let mut tx = self.store.begin(&event.entity).await?;

        // Re-probe the ledger now that the critical section is held: a
        // concurrent ingest of the same event may have committed between the
        // pipeline's fast-path check and here. The probe runs on the
        // transaction's own connection, so no second pool checkout happens
        // while one is already held. A hit is final because the ledger is
        // append-only; the ultimate authority remains the conflict-checked
        // `record_event` before commit.
        if tx.is_processed(&event.event_id).await? {
            return Ok(ApplyOutcome::Duplicate);
        }

        let stored = tx.stored_timestamp().await?;

        match decide(stored, event.created) {
            Decision::Ignore => {
                // No entity write; the ledger row keeps a redelivery of this
                // stale event from re-entering the decision path.
                if !tx.record_event(event, RecordedOutcome::Skipped).await? {
                    return Ok(ApplyOutcome::Duplicate);
                }
                tx.commit().await?;
                tracing::info!(
                    event_id = %event.event_id,
                    entity = %event.entity,
                    event_ts = event.created,
                    stored_ts = ?stored,
                    "Stale event ignored"
                );
                Ok(ApplyOutcome::Skipped)
            }
            Decision::Apply => {
                tx.upsert_entity(&event.payload, event).await?;
                if !tx.record_event(event, RecordedOutcome::Applied).await? {
                    return Ok(ApplyOutcome::Duplicate);
                }
                tx.commit().await?;
                tracing::info!(
                    event_id = %event.event_id,
                    entity = %event.entity,
                    event_type = %event.event_type,
                    event_ts = event.created,
                    "Event applied"
                );
                Ok(ApplyOutcome::Applied)
            }
            Decision::RefetchThenApply => {
                tracing::info!(
                    event_id = %event.event_id,
                    entity = %event.entity,
                    event_ts = event.created,
                    "Timestamp tie detected, refetching canonical state"
                );
                // The entity's critical section stays held across the fetch,
                // so no same-entity writer can land between the decision and
                // the write. A fetch failure propagates here, the transaction
                // rolls back on drop, and no ledger row is written.
                let payload = self.source.fetch_current(&event.entity).await?;

                // Once a tie is detected the event is only a trigger: the
                // refetched payload supersedes it entirely, paired with the
                // shared timestamp.
                tx.upsert_entity(&payload, event).await?;
                if !tx.record_event(event, RecordedOutcome::Applied).await? {
                    return Ok(ApplyOutcome::Duplicate);
                }
                tx.commit().await?;
                tracing::info!(
                    event_id = %event.event_id,
                    entity = %event.entity,
                    "Canonical state applied after timestamp tie"
                );
                Ok(ApplyOutcome::Applied)
            }
        }
    }
}
