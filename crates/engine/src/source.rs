//! Canonical source adapter
//!
//! When two events for one entity share an emission second, neither payload
//! can be trusted; only the origin system holds the authoritative current
//! value. [`CanonicalSource::fetch_current`] fetches that value. The call is
//! read-only upstream and safe to issue redundantly; failures are transient
//! and the triggering event simply stays eligible for redelivery.

use std::time::Duration;

use stripe::{
    Charge, ChargeId, Client, Customer, CustomerId, Invoice, InvoiceId, Price, PriceId, Product,
    ProductId, Subscription, SubscriptionId,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::event::{EntityKind, EntityRef};

/// Authoritative current-state lookup at the origin system
pub trait CanonicalSource: Send + Sync {
    /// Fetch the entity's current representation. Must be safe to call
    /// redundantly for the same entity.
    fn fetch_current(
        &self,
        entity: &EntityRef,
    ) -> impl std::future::Future<Output = SyncResult<serde_json::Value>> + Send;
}

/// [`CanonicalSource`] over the Stripe API
///
/// Each fetch retries transient failures with jittered exponential backoff
/// before surfacing the error to the applier; permanent API errors are
/// surfaced on the first attempt.
pub struct StripeSource {
    client: Client,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl StripeSource {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            client: Client::new(config.stripe_secret_key.clone()),
            max_attempts: config.refetch_max_attempts,
            base_delay_ms: config.refetch_base_delay_ms,
        }
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Whether a Stripe failure can succeed on a later attempt. Transport
/// errors, timeouts, rate limits, and 5xx responses are transient; other
/// API responses (missing resource, invalid request) fail identically on
/// every attempt and are surfaced immediately.
fn is_transient(err: &stripe::StripeError) -> bool {
    match err {
        stripe::StripeError::Timeout | stripe::StripeError::ClientError(_) => true,
        stripe::StripeError::Stripe(request) => {
            request.http_status == 429 || request.http_status >= 500
        }
        _ => false,
    }
}

fn parse_entity_id<T>(entity: &EntityRef) -> SyncResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    entity.id.parse().map_err(|e| {
        SyncError::MalformedEvent(format!(
            "'{}' is not a valid {} id: {}",
            entity.id, entity.kind, e
        ))
    })
}

impl CanonicalSource for StripeSource {
    async fn fetch_current(&self, entity: &EntityRef) -> SyncResult<serde_json::Value> {
        tracing::debug!(
            entity = %entity,
            max_attempts = self.max_attempts,
            "Fetching canonical state from Stripe"
        );

        let value = match entity.kind {
            EntityKind::Customer => {
                let id: CustomerId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Customer::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
            EntityKind::Subscription => {
                let id: SubscriptionId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Subscription::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
            EntityKind::Invoice => {
                let id: InvoiceId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Invoice::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
            EntityKind::Product => {
                let id: ProductId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Product::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
            EntityKind::Price => {
                let id: PriceId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Price::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
            EntityKind::Charge => {
                let id: ChargeId = parse_entity_id(entity)?;
                let fetched = RetryIf::spawn(
                    self.retry_strategy(),
                    || Charge::retrieve(&self.client, &id, &[]),
                    is_transient,
                )
                .await?;
                serde_json::to_value(fetched)?
            }
        };

        Ok(value)
    }
}
