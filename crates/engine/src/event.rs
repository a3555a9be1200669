//! Event envelope and normalization
//!
//! Incoming notifications arrive as the billing platform's JSON envelope:
//! a globally unique event id, a dotted event type, an origin timestamp with
//! second resolution, and the entity's claimed state at emission time.
//! Normalization maps the dotted type onto the entity family we project and
//! pulls the entity id out of the payload. Event families we do not project
//! normalize to `None` and are skipped by the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Entity families projected into the relational snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Subscription,
    Invoice,
    Product,
    Price,
    Charge,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Subscription => "subscription",
            EntityKind::Invoice => "invoice",
            EntityKind::Product => "product",
            EntityKind::Price => "price",
            EntityKind::Charge => "charge",
        }
    }

    /// Map a dotted event type onto the entity family it describes.
    ///
    /// `customer.subscription.*` must be checked before `customer.*`, and
    /// sub-object notifications (discounts, sources, tax ids, disputes)
    /// do not carry their parent entity's payload, so they map to nothing.
    pub fn for_event_type(event_type: &str) -> Option<Self> {
        if event_type.starts_with("customer.subscription.") {
            return Some(EntityKind::Subscription);
        }
        if event_type.starts_with("customer.discount.")
            || event_type.starts_with("customer.source.")
            || event_type.starts_with("customer.tax_id.")
            || event_type.starts_with("charge.dispute.")
        {
            return None;
        }
        if event_type.starts_with("customer.") {
            return Some(EntityKind::Customer);
        }
        if event_type.starts_with("invoice.") {
            return Some(EntityKind::Invoice);
        }
        if event_type.starts_with("product.") {
            return Some(EntityKind::Product);
        }
        if event_type.starts_with("price.") {
            return Some(EntityKind::Price);
        }
        if event_type.starts_with("charge.") {
            return Some(EntityKind::Charge);
        }
        None
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a single projected entity: at most one row exists per ref
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Wire envelope of a change notification, as delivered by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Globally unique event id, used for idempotency and audit
    pub id: String,
    /// Dotted event type, e.g. `customer.subscription.updated`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Origin emission timestamp, unix seconds. The origin guarantees
    /// monotonic-or-equal per entity, not strictly increasing.
    pub created: i64,
    pub data: SyncEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEventData {
    /// The entity's claimed state at emission time. May be partial:
    /// narrower notifications carry stale secondary fields.
    pub object: serde_json::Value,
}

/// A shape-checked event, ready for the apply pipeline
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub event_type: String,
    pub created: i64,
    pub entity: EntityRef,
    pub payload: serde_json::Value,
}

/// Normalize a wire event. `Ok(None)` means the event family is not
/// projected by this engine; `Err` means the envelope is unusable.
pub fn normalize(event: &SyncEvent) -> SyncResult<Option<NormalizedEvent>> {
    let Some(kind) = EntityKind::for_event_type(&event.event_type) else {
        return Ok(None);
    };

    let entity_id = event
        .data
        .object
        .get("id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| {
            SyncError::MalformedEvent(format!(
                "event {} ({}) payload carries no entity id",
                event.id, event.event_type
            ))
        })?;

    Ok(Some(NormalizedEvent {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        created: event.created,
        entity: EntityRef::new(kind, entity_id),
        payload: event.data.object.clone(),
    }))
}
