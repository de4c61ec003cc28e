use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;

use super::DomainEventBus;
use crate::event_sourcing::core::EventEnvelope;

/// Publishes envelopes as JSON to one topic, keyed by aggregate id so a
/// stream's events stay ordered within a partition.
pub struct RedpandaEventBus<E> {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    _phantom: PhantomData<fn(E)>,
}

impl<E> RedpandaEventBus<E> {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .context("Failed to create Redpanda producer")?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            send_timeout: Duration::from_secs(5),
            _phantom: PhantomData,
        })
    }
}

#[async_trait]
impl<E> DomainEventBus<E> for RedpandaEventBus<E>
where
    E: Serialize + Send + Sync + 'static,
{
    async fn publish(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        let key = envelope.aggregate_id.to_string();
        let payload = serde_json::to_string(envelope)?;

        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload);

        self.producer
            .send(record, rdkafka::util::Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

        tracing::info!(
            topic = %self.topic,
            key = %key,
            event_type = %envelope.event_type,
            sequence = envelope.sequence_number,
            "Published to Redpanda"
        );
        Ok(())
    }
}
