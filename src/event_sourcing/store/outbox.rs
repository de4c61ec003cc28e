use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope, JsonSerializer, Serializer, StoreError};
use crate::event_sourcing::storage::EventStorage;
use crate::messaging::DomainEventBus;
use crate::metrics::StoreMetrics;

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Drains events that `DeliveryMode::Outbox` staged inside the commit and
// publishes them. Delivery is at-least-once: an entry is marked published
// only after the bus accepted it, and a failed entry stops the batch so
// later events never overtake it.
//
// An entry that cannot be decoded will never decode on a later poll either.
// It is logged, counted and marked so the entries behind it keep moving.
//
// ============================================================================

pub struct OutboxRelay<E, S, Z = JsonSerializer> {
    storage: Arc<S>,
    event_bus: Arc<dyn DomainEventBus<E>>,
    serializer: Z,
    batch_size: usize,
    metrics: Option<Arc<StoreMetrics>>,
    _event: PhantomData<fn() -> E>,
}

impl<E, S> OutboxRelay<E, S, JsonSerializer>
where
    E: DomainEvent,
    S: EventStorage,
{
    pub fn new(storage: Arc<S>, event_bus: Arc<dyn DomainEventBus<E>>) -> Self {
        Self::with_serializer(storage, event_bus, JsonSerializer)
    }
}

impl<E, S, Z> OutboxRelay<E, S, Z>
where
    E: DomainEvent,
    S: EventStorage,
    Z: Serializer,
{
    pub fn with_serializer(storage: Arc<S>, event_bus: Arc<dyn DomainEventBus<E>>, serializer: Z) -> Self {
        Self {
            storage,
            event_bus,
            serializer,
            batch_size: 100,
            metrics: None,
            _event: PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publish up to one batch of pending entries.
    ///
    /// Returns how many were published. Undecodable entries are marked
    /// without being published and are not counted.
    pub async fn relay_once(&self) -> Result<usize, StoreError> {
        let pending = self.storage.pending_outbox(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut handled = Vec::with_capacity(pending.len());
        let mut published = 0;
        for message in &pending {
            let envelope: EventEnvelope<E> = match message.event.decode(&self.serializer) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(
                        outbox_id = %message.id,
                        aggregate_id = %message.event.aggregate_id,
                        sequence = message.event.sequence_number,
                        event_type = %message.event.event_type,
                        error = %e,
                        "Dropping undecodable outbox entry"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_outbox_poisoned(&message.aggregate_type, &message.event.event_type);
                    }
                    handled.push(message.id);
                    continue;
                }
            };

            if let Err(e) = self.event_bus.publish(&envelope).await {
                tracing::warn!(
                    outbox_id = %message.id,
                    aggregate_id = %envelope.aggregate_id,
                    sequence = envelope.sequence_number,
                    error = %e,
                    "Outbox publish failed, will retry on next poll"
                );
                break;
            }
            handled.push(message.id);
            published += 1;
        }

        if !handled.is_empty() {
            self.storage.mark_published(&handled).await?;
        }

        tracing::debug!(
            published = published,
            dropped = handled.len() - published,
            pending = pending.len(),
            "Outbox relay pass complete"
        );
        Ok(published)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(poll_interval);
        tracing::info!(poll_ms = poll_interval.as_millis() as u64, "🚀 Outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}
