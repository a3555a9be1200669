//! Staleness resolution
//!
//! Pure three-way decision over the stored timestamp and an incoming event's
//! timestamp. Delivery order is not trusted: an event strictly older than the
//! stored state is discarded, a strictly newer one wins, and two events
//! sharing an emission second cannot be ordered locally at all. In the tie
//! case neither payload can be trusted over the other (a narrow notification
//! may carry stale secondary fields that a broader one is about to set), so
//! the resolver asks for the canonical source to be consulted instead.

/// Outcome of comparing an incoming event against stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The incoming event is newer (or the entity is unseen); apply its payload.
    Apply,
    /// The incoming event is strictly older than stored state; drop it.
    Ignore,
    /// Same emission second as stored state; only the canonical source
    /// holds the authoritative value. Refetch and apply that instead.
    RefetchThenApply,
}

/// Decide what to do with an event timestamped `incoming` given the stored
/// entity's `last_event_ts` (`None` if the entity has never been seen).
pub fn decide(stored: Option<i64>, incoming: i64) -> Decision {
    let Some(stored) = stored else {
        return Decision::Apply;
    };

    match incoming.cmp(&stored) {
        std::cmp::Ordering::Less => Decision::Ignore,
        std::cmp::Ordering::Greater => Decision::Apply,
        std::cmp::Ordering::Equal => Decision::RefetchThenApply,
    }
}
