use std::sync::Arc;
use uuid::Uuid;
use anyhow::{Result, bail};

use crate::event_sourcing::core::{AggregateRoot, StoreError};
use crate::event_sourcing::storage::EventStorage;
use crate::event_sourcing::store::EventStore;

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Event Store
//
// A save that loses the optimistic concurrency race is retried against a
// freshly loaded aggregate, up to `max_conflict_retries` times.
//
// ============================================================================

pub struct OrderCommandHandler<S: EventStorage> {
    event_store: Arc<EventStore<OrderAggregate, S>>,
    max_conflict_retries: u32,
}

impl<S: EventStorage> OrderCommandHandler<S> {
    pub fn new(event_store: Arc<EventStore<OrderAggregate, S>>) -> Self {
        Self {
            event_store,
            max_conflict_retries: 3,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Handle a command and persist resulting events.
    ///
    /// Returns the aggregate version after the save.
    pub async fn handle(
        &self,
        aggregate_id: Uuid,
        command: OrderCommand,
        correlation_id: Uuid,
    ) -> Result<i64> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut order = self.prepare(aggregate_id, command.clone()).await?;
            for envelope in order.uncommitted_events_mut() {
                envelope.correlation_id = Some(correlation_id);
            }

            match self.event_store.save(&mut order).await {
                Ok(()) => return Ok(order.version()),
                Err(err @ StoreError::ConcurrencyConflict { .. }) if attempt <= self.max_conflict_retries => {
                    tracing::warn!(
                        aggregate_id = %aggregate_id,
                        attempt = attempt,
                        error = %err,
                        "Concurrency conflict, reloading order"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Load (or start) the order and run the command against it
    async fn prepare(&self, aggregate_id: Uuid, command: OrderCommand) -> Result<OrderAggregate> {
        let existing = self.event_store.get_by_id(aggregate_id).await?;

        match (existing, command) {
            (None, OrderCommand::CreateOrder { customer_id, items }) => {
                Ok(OrderAggregate::create(aggregate_id, customer_id, items)?)
            }
            (None, _) => bail!("Aggregate does not exist: {}", aggregate_id),
            (Some(mut order), command) => {
                order.execute(command)?;
                Ok(order)
            }
        }
    }
}
