// ============================================================================
// Messaging - Domain Event Bus
// ============================================================================
//
// Committed events are handed to a `DomainEventBus` after the storage commit.
// Publishing is fire-and-forget from the event store's point of view: a
// failure is logged and counted, never rolled back into the save.
//
// Implementations:
// - InMemoryEventBus:  tokio broadcast channel for in-process subscribers
// - ResilientEventBus: circuit breaker + retry around any other bus
// - RedpandaEventBus:  Kafka-compatible topic (feature = "redpanda")
//
// ============================================================================

mod memory;
mod resilient;
#[cfg(feature = "redpanda")]
mod redpanda;

pub use memory::InMemoryEventBus;
pub use resilient::ResilientEventBus;
#[cfg(feature = "redpanda")]
pub use redpanda::RedpandaEventBus;

use anyhow::Result;
use async_trait::async_trait;

use crate::event_sourcing::core::EventEnvelope;

#[async_trait]
pub trait DomainEventBus<E>: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope<E>) -> Result<()>;
}

