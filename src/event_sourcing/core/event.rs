use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::error::StoreError;
use super::serializer::Serializer;

// ============================================================================
// Event Envelope - Event Metadata
// ============================================================================
//
// Wraps domain events with identity and ordering metadata.
// This is GENERIC and works with ANY event type.
//
// ============================================================================

/// Decoded, in-memory form of one event in an aggregate's stream
///
/// Type Parameter:
/// - `E`: The domain event type (must implement DomainEvent trait)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    // Event Identity
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    /// Persisted version the aggregate was at when this event was raised.
    /// Audit only; concurrency control never reads it.
    pub aggregate_version: i64,

    // Event Type Information
    pub event_type: String,
    pub event_version: i32,

    // Event Payload
    pub payload: E,

    // Causation & Correlation (for distributed tracing)
    pub causation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,

    // Timing
    pub timestamp: DateTime<Utc>,

    // Additional Metadata
    pub metadata: HashMap<String, String>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(aggregate_id: Uuid, sequence_number: i64, aggregate_version: i64, payload: E) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            aggregate_version,
            event_type: payload.event_type().to_string(),
            event_version: payload.event_version(),
            payload,
            causation_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Encode into the persisted record form
    pub fn encode<S: Serializer>(&self, serializer: &S) -> Result<StoredEvent, StoreError>
    where
        E: Serialize,
    {
        Ok(StoredEvent {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            sequence_number: self.sequence_number,
            aggregate_version: self.aggregate_version,
            event_type: self.event_type.clone(),
            event_version: self.event_version,
            payload: serializer.serialize(&self.payload)?,
            causation_id: self.causation_id,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            metadata: serializer.serialize(&self.metadata)?,
        })
    }
}

// ============================================================================
// Stored Event Record
// ============================================================================

/// Append-only persisted form of an event. Payload and metadata are encoded
/// by the injected serializer; `event_type` is the stable discriminator that
/// type-filtered queries match on.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,
    pub aggregate_version: i64,
    pub event_type: String,
    pub event_version: i32,
    pub payload: String,
    pub causation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub metadata: String,
}

impl StoredEvent {
    pub fn decode<E, S>(&self, serializer: &S) -> Result<EventEnvelope<E>, StoreError>
    where
        E: DeserializeOwned,
        S: Serializer,
    {
        tracing::trace!(
            aggregate_id = %self.aggregate_id,
            sequence = self.sequence_number,
            event_type = %self.event_type,
            "Decoding stored event"
        );

        Ok(EventEnvelope {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            sequence_number: self.sequence_number,
            aggregate_version: self.aggregate_version,
            event_type: self.event_type.clone(),
            event_version: self.event_version,
            payload: serializer.deserialize(&self.payload)?,
            causation_id: self.causation_id,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            metadata: serializer.deserialize(&self.metadata)?,
        })
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Generic Domain Event trait
///
/// Implemented by the event enum of an aggregate. Every variant maps to a
/// stable discriminator that is persisted alongside the payload, so stored
/// streams stay readable after types are renamed or moved.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn event_version(&self) -> i32 {
        1
    }
}

// ============================================================================
// Tests
// ============================================================================
