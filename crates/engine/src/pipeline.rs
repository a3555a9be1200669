//! Ingestion pipeline
//!
//! The boundary exposed to the webhook receiver: take one wire event (or a
//! batch), answer whether it was applied, skipped, or a duplicate. Ordering
//! correctness comes entirely from the staleness resolver, so the pipeline
//! is safe under arbitrary redelivery and reordering; callers may invoke
//! `ingest` concurrently for distinct entities without coordination.

use sqlx::PgPool;

use crate::applier::{ApplyOutcome, EventApplier};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::event::{normalize, SyncEvent};
use crate::postgres::PgEntityStore;
use crate::source::{CanonicalSource, StripeSource};
use crate::store::EntityStore;

/// Why an event produced no entity write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Strictly older than the stored state for its entity
    StaleEvent,
    /// An event family this engine does not project
    UnprojectedEventType,
}

/// Outcome of ingesting one wire event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A payload won the staleness decision and was written
    Applied,
    /// No write happened; see the reason
    Skipped(SkipReason),
    /// This event id was already durably processed
    Duplicate,
}

/// The sync engine: normalization, idempotency boundary, and event apply
pub struct SyncEngine<S, C> {
    applier: EventApplier<S, C>,
}

impl<S: EntityStore, C: CanonicalSource> SyncEngine<S, C> {
    pub fn new(store: S, source: C) -> Self {
        Self {
            applier: EventApplier::new(store, source),
        }
    }

    pub fn store(&self) -> &S {
        self.applier.store()
    }

    /// Ingest one event. Idempotent: re-ingesting an already-processed
    /// event id is a no-op returning [`IngestOutcome::Duplicate`], and a
    /// failed call can be repeated with the identical event.
    pub async fn ingest(&self, event: &SyncEvent) -> SyncResult<IngestOutcome> {
        // Fast path: the ledger is append-only, so a hit here is final.
        // A miss is re-checked transactionally inside the applier.
        if self.applier.store().is_processed(&event.id).await? {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate event, already processed"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        let Some(normalized) = normalize(event)? else {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Event family not projected, skipping"
            );
            return Ok(IngestOutcome::Skipped(SkipReason::UnprojectedEventType));
        };

        match self.applier.apply(&normalized).await? {
            ApplyOutcome::Applied => Ok(IngestOutcome::Applied),
            ApplyOutcome::Skipped => Ok(IngestOutcome::Skipped(SkipReason::StaleEvent)),
            ApplyOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
        }
    }

    /// Ingest a batch sequentially, stopping at the first retryable error.
    /// Events already processed before the failure stay processed; the
    /// caller resubmits the remainder.
    pub async fn ingest_batch(&self, events: &[SyncEvent]) -> SyncResult<Vec<IngestOutcome>> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.ingest(event).await?);
        }
        Ok(outcomes)
    }
}

/// Production wiring: Postgres projection, Stripe canonical source
pub type PgSyncEngine = SyncEngine<PgEntityStore, StripeSource>;

impl PgSyncEngine {
    /// Build the engine entirely from environment configuration,
    /// connecting a pool to the configured `DATABASE_URL`.
    pub async fn connect_from_env() -> SyncResult<Self> {
        let config = SyncConfig::from_env()?;
        let pool = PgPool::connect(&config.database_url).await?;
        Ok(Self::from_config(&config, pool))
    }

    /// Build the engine from environment configuration over a
    /// caller-managed pool.
    pub fn from_env(pool: PgPool) -> SyncResult<Self> {
        let config = SyncConfig::from_env()?;
        Ok(Self::from_config(&config, pool))
    }

    /// Build the engine with explicit configuration.
    pub fn from_config(config: &SyncConfig, pool: PgPool) -> Self {
        Self::new(PgEntityStore::new(pool), StripeSource::new(config))
    }
}
