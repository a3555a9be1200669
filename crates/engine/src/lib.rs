// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Billing Event Sync Engine
//!
//! Projects an unreliable stream of billing-platform change notifications
//! into a consistent relational snapshot of billing entities (customers,
//! subscriptions and their line items, invoices, products, prices, charges).
//!
//! Events may be redelivered, may arrive out of emission order, and may
//! share an emission second. The engine's job is the conflict-resolution
//! core, not the transport:
//!
//! - **Staleness Resolver**: pure three-way decision per event -
//!   apply, ignore, or refetch-then-apply on a timestamp tie
//! - **Event Applier**: runs the load-decide-write sequence inside a
//!   per-entity critical section, refetching canonical state from the
//!   origin when two events share a timestamp
//! - **Ingestion Pipeline**: the idempotency boundary; re-ingesting a
//!   processed event id is a no-op, and entity writes commit atomically
//!   with their idempotency marker
//! - **Entity Store**: Postgres-backed projection (plus an in-memory
//!   store with identical semantics for tests)
//!
//! The HTTP webhook receiver, signature verification, and schema
//! migrations live outside this crate.

pub mod applier;
pub mod config;
pub mod error;
pub mod event;
pub mod invariants;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod resolver;
pub mod source;
pub mod store;


// Applier
pub use applier::{ApplyOutcome, EventApplier};

// Config
pub use config::SyncConfig;

// Error
pub use error::{SyncError, SyncResult};

// Events
pub use event::{normalize, EntityKind, EntityRef, NormalizedEvent, SyncEvent, SyncEventData};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Memory store
pub use memory::{MemoryEntityStore, StoredEntity};

// Pipeline
pub use pipeline::{IngestOutcome, PgSyncEngine, SkipReason, SyncEngine};

// Postgres store
pub use postgres::PgEntityStore;

// Resolver
pub use resolver::{decide, Decision};

// Source
pub use source::{CanonicalSource, StripeSource};

// Store
pub use store::{EntityStore, EntityTx, RecordedOutcome};
