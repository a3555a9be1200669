//! Projection invariants
//!
//! Runnable consistency checks over the synced projection. These can be run
//! after a replay or backfill to confirm the store is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::SyncResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Entity refs affected, as `kind/id` strings
    pub entities: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - the projection disagrees with its own keys
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateEntityRow {
    entity_kind: String,
    entity_id: String,
    row_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct FutureTimestampRow {
    entity_kind: String,
    entity_id: String,
    last_event_ts: OffsetDateTime,
    last_event_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanedItemRow {
    id: String,
    subscription: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingEntityRow {
    event_id: String,
    entity_kind: String,
    entity_id: String,
}

/// Service for running projection invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> SyncResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_unique_entity_projection().await?);
        violations.extend(self.check_no_future_timestamps().await?);
        violations.extend(self.check_no_orphaned_subscription_items().await?);
        violations.extend(self.check_applied_events_have_entity().await?);

        let checks_run = 4;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most one row per (entity_kind, entity_id)
    ///
    /// The unique index should make this impossible; a violation means the
    /// schema drifted and every staleness decision is suspect.
    async fn check_unique_entity_projection(&self) -> SyncResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateEntityRow> = sqlx::query_as(
            r#"
            SELECT entity_kind, entity_id, COUNT(*) as row_count
            FROM synced_entities
            GROUP BY entity_kind, entity_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unique_entity_projection".to_string(),
                entities: vec![format!("{}/{}", row.entity_kind, row.entity_id)],
                description: format!(
                    "Entity has {} projected rows (expected 1)",
                    row.row_count
                ),
                context: serde_json::json!({
                    "row_count": row.row_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: No entity timestamp materially ahead of wall clock
    ///
    /// Origin timestamps are emission times; a row stamped in the future
    /// would swallow every legitimate update behind it.
    async fn check_no_future_timestamps(&self) -> SyncResult<Vec<InvariantViolation>> {
        let rows: Vec<FutureTimestampRow> = sqlx::query_as(
            r#"
            SELECT entity_kind, entity_id, last_event_ts, last_event_id
            FROM synced_entities
            WHERE last_event_ts > NOW() + INTERVAL '5 minutes'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_future_timestamps".to_string(),
                entities: vec![format!("{}/{}", row.entity_kind, row.entity_id)],
                description: format!(
                    "Entity timestamp {} is ahead of wall clock (event {})",
                    row.last_event_ts, row.last_event_id
                ),
                context: serde_json::json!({
                    "last_event_ts": row.last_event_ts,
                    "last_event_id": row.last_event_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Every subscription item belongs to a projected subscription
    async fn check_no_orphaned_subscription_items(&self) -> SyncResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanedItemRow> = sqlx::query_as(
            r#"
            SELECT si.id, si.subscription
            FROM subscription_items si
            WHERE NOT EXISTS (
                SELECT 1 FROM synced_entities se
                WHERE se.entity_kind = 'subscription'
                  AND se.entity_id = si.subscription
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_orphaned_subscription_items".to_string(),
                entities: vec![format!("subscription/{}", row.subscription)],
                description: format!(
                    "Line item '{}' references subscription '{}' which is not projected",
                    row.id, row.subscription
                ),
                context: serde_json::json!({
                    "item_id": row.id,
                    "subscription": row.subscription,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Applied ledger entries reference a projected entity
    ///
    /// An `applied` outcome without an entity row means the transaction
    /// boundary between entity write and idempotency marking was broken.
    async fn check_applied_events_have_entity(&self) -> SyncResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingEntityRow> = sqlx::query_as(
            r#"
            SELECT pe.event_id, pe.entity_kind, pe.entity_id
            FROM processed_events pe
            WHERE pe.outcome = 'applied'
              AND NOT EXISTS (
                  SELECT 1 FROM synced_entities se
                  WHERE se.entity_kind = pe.entity_kind
                    AND se.entity_id = pe.entity_id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "applied_events_have_entity".to_string(),
                entities: vec![format!("{}/{}", row.entity_kind, row.entity_id)],
                description: format!(
                    "Event '{}' was recorded as applied but its entity is not projected",
                    row.event_id
                ),
                context: serde_json::json!({
                    "event_id": row.event_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> SyncResult<Vec<InvariantViolation>> {
        match name {
            "unique_entity_projection" => self.check_unique_entity_projection().await,
            "no_future_timestamps" => self.check_no_future_timestamps().await,
            "no_orphaned_subscription_items" => self.check_no_orphaned_subscription_items().await,
            "applied_events_have_entity" => self.check_applied_events_have_entity().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "unique_entity_projection",
            "no_future_timestamps",
            "no_orphaned_subscription_items",
            "applied_events_have_entity",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 4);
        assert!(checks.contains(&"unique_entity_projection"));
        assert!(checks.contains(&"applied_events_have_entity"));
    }
}
