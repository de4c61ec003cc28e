use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::DomainEventBus;
use crate::event_sourcing::core::EventEnvelope;

/// In-process bus: every subscriber receives every published envelope.
/// Publishing with no subscribers is not an error.
pub struct InMemoryEventBus<E> {
    sender: broadcast::Sender<EventEnvelope<E>>,
}

impl<E: Clone> InMemoryEventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope<E>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> DomainEventBus<E> for InMemoryEventBus<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn publish(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        match self.sender.send(envelope.clone()) {
            Ok(receivers) => {
                tracing::debug!(
                    aggregate_id = %envelope.aggregate_id,
                    sequence = envelope.sequence_number,
                    event_type = %envelope.event_type,
                    receivers = receivers,
                    "Published event in-process"
                );
            }
            Err(_) => {
                tracing::trace!(
                    event_type = %envelope.event_type,
                    "No subscribers for published event"
                );
            }
        }
        Ok(())
    }
}
