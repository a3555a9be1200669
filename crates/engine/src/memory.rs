//! In-memory entity store
//!
//! Mirrors the Postgres store's semantics without a database: per-entity
//! critical sections are tokio mutexes keyed by entity ref, and writes are
//! staged on the transaction and only become visible at commit. Dropping an
//! uncommitted transaction discards the staged writes.
//!
//! Used by the scenario tests and useful for exercising ingestion logic in
//! callers without standing up Postgres.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::error::SyncResult;
use crate::event::{EntityRef, NormalizedEvent};
use crate::store::{EntityStore, EntityTx, RecordedOutcome};

/// Current projected state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub payload: serde_json::Value,
    pub last_event_ts: i64,
    pub last_event_id: String,
}

#[derive(Default)]
struct MemoryState {
    entities: HashMap<EntityRef, StoredEntity>,
    /// event id -> recorded outcome
    processed: HashMap<String, String>,
}

/// In-memory [`EntityStore`] with the same atomicity and per-entity
/// serialization guarantees as the Postgres store
#[derive(Clone, Default)]
pub struct MemoryEntityStore {
    state: Arc<Mutex<MemoryState>>,
    entity_locks: Arc<Mutex<HashMap<EntityRef, Arc<tokio::sync::Mutex<()>>>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one entity's current state
    pub fn entity(&self, entity: &EntityRef) -> Option<StoredEntity> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entities
            .get(entity)
            .cloned()
    }

    /// Outcome recorded for an event id, if it has been processed
    pub fn recorded_outcome(&self, event_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .processed
            .get(event_id)
            .cloned()
    }

    /// Number of entity rows currently projected
    pub fn entity_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entities
            .len()
    }

    fn lock_for(&self, entity: &EntityRef) -> Arc<tokio::sync::Mutex<()>> {
        self.entity_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(entity.clone())
            .or_default()
            .clone()
    }
}

impl EntityStore for MemoryEntityStore {
    type Tx = MemoryEntityTx;

    async fn begin(&self, entity: &EntityRef) -> SyncResult<MemoryEntityTx> {
        let guard = self.lock_for(entity).lock_owned().await;
        Ok(MemoryEntityTx {
            state: Arc::clone(&self.state),
            _guard: guard,
            entity: entity.clone(),
            staged_entity: None,
            staged_record: None,
        })
    }

    async fn is_processed(&self, event_id: &str) -> SyncResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .processed
            .contains_key(event_id))
    }
}

/// Critical section over one in-memory entity
pub struct MemoryEntityTx {
    state: Arc<Mutex<MemoryState>>,
    _guard: OwnedMutexGuard<()>,
    entity: EntityRef,
    staged_entity: Option<StoredEntity>,
    staged_record: Option<(String, RecordedOutcome)>,
}

impl EntityTx for MemoryEntityTx {
    async fn is_processed(&mut self, event_id: &str) -> SyncResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .processed
            .contains_key(event_id))
    }

    async fn stored_timestamp(&mut self) -> SyncResult<Option<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entities
            .get(&self.entity)
            .map(|stored| stored.last_event_ts))
    }

    async fn upsert_entity(
        &mut self,
        payload: &serde_json::Value,
        event: &NormalizedEvent,
    ) -> SyncResult<()> {
        self.staged_entity = Some(StoredEntity {
            payload: payload.clone(),
            last_event_ts: event.created,
            last_event_id: event.event_id.clone(),
        });
        Ok(())
    }

    async fn record_event(
        &mut self,
        event: &NormalizedEvent,
        outcome: RecordedOutcome,
    ) -> SyncResult<bool> {
        // The per-entity lock serializes all writers of this entity, and an
        // event id always maps to a single entity, so a committed duplicate
        // is visible here.
        let already = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .processed
            .contains_key(&event.event_id);
        if already {
            return Ok(false);
        }
        self.staged_record = Some((event.event_id.clone(), outcome));
        Ok(true)
    }

    async fn commit(self) -> SyncResult<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(staged) = self.staged_entity {
            // Monotonic write guard, matching the Postgres upsert's
            // timestamp condition.
            let newer_exists = state
                .entities
                .get(&self.entity)
                .is_some_and(|existing| existing.last_event_ts > staged.last_event_ts);
            if !newer_exists {
                state.entities.insert(self.entity.clone(), staged);
            }
        }
        if let Some((event_id, outcome)) = self.staged_record {
            state.processed.insert(event_id, outcome.as_str().to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EntityKind;

    fn event(id: &str, ts: i64) -> NormalizedEvent {
        NormalizedEvent {
            event_id: id.to_string(),
            event_type: "customer.updated".to_string(),
            created: ts,
            entity: EntityRef::new(EntityKind::Customer, "cus_1"),
            payload: serde_json::json!({"id": "cus_1"}),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_tx_leaves_no_state() {
        let store = MemoryEntityStore::new();
        let entity = EntityRef::new(EntityKind::Customer, "cus_1");
        {
            let mut tx = store.begin(&entity).await.unwrap();
            let evt = event("evt_1", 10);
            tx.upsert_entity(&evt.payload, &evt).await.unwrap();
            tx.record_event(&evt, RecordedOutcome::Applied).await.unwrap();
            // dropped without commit
        }
        assert!(store.entity(&entity).is_none());
        assert!(!store.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible_atomically() {
        let store = MemoryEntityStore::new();
        let entity = EntityRef::new(EntityKind::Customer, "cus_1");
        let evt = event("evt_1", 10);

        let mut tx = store.begin(&entity).await.unwrap();
        tx.upsert_entity(&evt.payload, &evt).await.unwrap();
        assert!(tx.record_event(&evt, RecordedOutcome::Applied).await.unwrap());
        tx.commit().await.unwrap();

        let stored = store.entity(&entity).unwrap();
        assert_eq!(stored.last_event_ts, 10);
        assert_eq!(stored.last_event_id, "evt_1");
        assert_eq!(store.recorded_outcome("evt_1").as_deref(), Some("applied"));
    }

    #[tokio::test]
    async fn test_tx_probe_sees_committed_events_only() {
        let store = MemoryEntityStore::new();
        let entity = EntityRef::new(EntityKind::Customer, "cus_1");
        let evt = event("evt_1", 10);

        let mut tx = store.begin(&entity).await.unwrap();
        assert!(!tx.is_processed("evt_1").await.unwrap());
        tx.upsert_entity(&evt.payload, &evt).await.unwrap();
        tx.record_event(&evt, RecordedOutcome::Applied).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(&entity).await.unwrap();
        assert!(tx.is_processed("evt_1").await.unwrap());
        // An uncommitted record stays invisible to the probe.
        let evt2 = event("evt_2", 11);
        tx.record_event(&evt2, RecordedOutcome::Applied).await.unwrap();
        assert!(!tx.is_processed("evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_event_rejects_known_event_id() {
        let store = MemoryEntityStore::new();
        let entity = EntityRef::new(EntityKind::Customer, "cus_1");
        let evt = event("evt_1", 10);

        let mut tx = store.begin(&entity).await.unwrap();
        tx.upsert_entity(&evt.payload, &evt).await.unwrap();
        tx.record_event(&evt, RecordedOutcome::Applied).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(&entity).await.unwrap();
        assert!(!tx.record_event(&evt, RecordedOutcome::Applied).await.unwrap());
    }
}
