//! Postgres entity store
//!
//! Persists the projection in three tables (migrations are managed by the
//! surrounding deployment, not this crate):
//!
//! - `synced_entities(id uuid primary key, entity_kind text, entity_id text,
//!   payload jsonb, last_event_ts timestamptz, last_event_id text,
//!   created_at timestamptz, updated_at timestamptz,
//!   unique (entity_kind, entity_id))`
//! - `processed_events(event_id text primary key, entity_kind text,
//!   entity_id text, outcome text, processed_at timestamptz)`
//! - `subscription_items(id text primary key, subscription text,
//!   payload jsonb, updated_at timestamptz)`
//!
//! The per-entity critical section is a transaction holding a
//! `pg_advisory_xact_lock` keyed on `(entity_kind, entity_id)`. The advisory
//! lock exists before the entity row does, so an entity's very first events
//! are serialized like all later ones; the row itself is additionally pinned
//! with `FOR UPDATE`, and the upsert carries a timestamp guard so no writer
//! can clobber strictly newer state.

use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::event::{EntityKind, EntityRef, NormalizedEvent};
use crate::store::{EntityStore, EntityTx, RecordedOutcome};

/// [`EntityStore`] backed by Postgres via sqlx
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl EntityStore for PgEntityStore {
    type Tx = PgEntityTx;

    async fn begin(&self, entity: &EntityRef) -> SyncResult<PgEntityTx> {
        let mut tx = self.pool.begin().await?;
        // Entity rows are created lazily, so a row lock alone cannot
        // serialize an entity's first events (FOR UPDATE on an absent row
        // locks nothing). The transaction-scoped advisory lock covers that
        // window and releases automatically at commit or rollback. A
        // hashtext collision only over-serializes, never under-serializes.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(entity.kind.as_str())
            .bind(&entity.id)
            .execute(&mut *tx)
            .await?;
        Ok(PgEntityTx {
            tx,
            entity: entity.clone(),
        })
    }

    async fn is_processed(&self, event_id: &str) -> SyncResult<bool> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

/// One transaction scoped to a single entity row
pub struct PgEntityTx {
    tx: Transaction<'static, Postgres>,
    entity: EntityRef,
}

impl PgEntityTx {
    /// Split a winning subscription payload into `subscription_items` rows.
    ///
    /// Items absent from the winning payload no longer exist upstream and
    /// are deleted; present ones are upserted. Payloads without an items
    /// list leave the existing rows untouched.
    async fn sync_subscription_items(
        &mut self,
        subscription_id: &str,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        let Some(items) = payload
            .get("items")
            .and_then(|items| items.get("data"))
            .and_then(|data| data.as_array())
        else {
            return Ok(());
        };

        let mut item_ids: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let item_id = item.get("id").and_then(|id| id.as_str()).ok_or_else(|| {
                SyncError::MalformedEvent(format!(
                    "subscription {} carries a line item without an id",
                    subscription_id
                ))
            })?;
            item_ids.push(item_id.to_string());
        }

        sqlx::query(
            r#"
            DELETE FROM subscription_items
            WHERE subscription = $1 AND NOT (id = ANY($2))
            "#,
        )
        .bind(subscription_id)
        .bind(&item_ids)
        .execute(&mut *self.tx)
        .await?;

        for (item, item_id) in items.iter().zip(item_ids.iter()) {
            sqlx::query(
                r#"
                INSERT INTO subscription_items (id, subscription, payload, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    subscription = EXCLUDED.subscription,
                    payload = EXCLUDED.payload,
                    updated_at = NOW()
                "#,
            )
            .bind(item_id)
            .bind(subscription_id)
            .bind(item)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }
}

impl EntityTx for PgEntityTx {
    async fn is_processed(&mut self, event_id: &str) -> SyncResult<bool> {
        // Runs on the transaction's connection; an in-flight apply never
        // needs a second checkout from the pool.
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(found.is_some())
    }

    async fn stored_timestamp(&mut self) -> SyncResult<Option<i64>> {
        // The advisory lock taken in begin() serializes same-entity writers;
        // FOR UPDATE additionally pins the row itself for the rest of the
        // transaction.
        let stored: Option<OffsetDateTime> = sqlx::query_scalar(
            r#"
            SELECT last_event_ts FROM synced_entities
            WHERE entity_kind = $1 AND entity_id = $2
            FOR UPDATE
            "#,
        )
        .bind(self.entity.kind.as_str())
        .bind(&self.entity.id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(stored.map(|ts| ts.unix_timestamp()))
    }

    async fn upsert_entity(
        &mut self,
        payload: &serde_json::Value,
        event: &NormalizedEvent,
    ) -> SyncResult<()> {
        let event_ts = OffsetDateTime::from_unix_timestamp(event.created).map_err(|e| {
            SyncError::MalformedEvent(format!(
                "event {} carries an unrepresentable timestamp {}: {}",
                event.event_id, event.created, e
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO synced_entities (
                id, entity_kind, entity_id, payload,
                last_event_ts, last_event_id, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, NOW(), NOW()
            )
            ON CONFLICT (entity_kind, entity_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                last_event_ts = EXCLUDED.last_event_ts,
                last_event_id = EXCLUDED.last_event_id,
                updated_at = NOW()
            WHERE synced_entities.last_event_ts <= EXCLUDED.last_event_ts
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.entity.kind.as_str())
        .bind(&self.entity.id)
        .bind(payload)
        .bind(event_ts)
        .bind(&event.event_id)
        .execute(&mut *self.tx)
        .await?;

        if self.entity.kind == EntityKind::Subscription {
            let subscription_id = self.entity.id.clone();
            self.sync_subscription_items(&subscription_id, payload)
                .await?;
        }

        Ok(())
    }

    async fn record_event(
        &mut self,
        event: &NormalizedEvent,
        outcome: RecordedOutcome,
    ) -> SyncResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, entity_kind, entity_id, outcome, processed_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(event.entity.kind.as_str())
        .bind(&event.entity.id)
        .bind(outcome.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> SyncResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
