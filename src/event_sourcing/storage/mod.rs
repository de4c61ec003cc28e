// ============================================================================
// Event Storage - Persistence Store Boundary
// ============================================================================
//
// The event store never touches tables directly. It stages a `Commit` (events,
// optional snapshot, optional outbox entries) and hands it to an `EventStorage`
// implementation, which must:
//
// 1. Apply the whole commit atomically, or nothing of it
// 2. Re-verify the expected stream version inside that same atomic unit
// 3. Return records ordered by ascending sequence number
//
// ============================================================================

pub mod memory;
pub mod postgres;

pub use memory::InMemoryEventStorage;
pub use postgres::PostgresEventStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_sourcing::core::{StoreError, StoredEvent};
use crate::event_sourcing::store::EventQuery;

/// Persisted point-in-time aggregate state
#[derive(Clone, Debug, PartialEq)]
pub struct StoredSnapshot {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    /// Sequence of the last event folded into `state`
    pub last_event_sequence: i64,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// Event awaiting publication through the outbox relay
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_type: String,
    pub event: StoredEvent,
    pub created_at: DateTime<Utc>,
}

/// Everything one `EventStore::save` call makes visible, as a single unit
#[derive(Clone, Debug)]
pub struct Commit {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    /// Highest sequence the writer saw when it loaded the aggregate
    pub expected_version: i64,
    pub events: Vec<StoredEvent>,
    pub snapshot: Option<StoredSnapshot>,
    pub outbox: Vec<OutboxMessage>,
}

impl Commit {
    pub fn new(aggregate_id: Uuid, aggregate_type: &str, expected_version: i64) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            expected_version,
            events: Vec::new(),
            snapshot: None,
            outbox: Vec::new(),
        }
    }

    /// Stream version once this commit is applied
    pub fn new_version(&self) -> i64 {
        self.events
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(self.expected_version)
    }

    /// Sequences must continue the stream without gaps or repeats
    pub fn validate_sequences(&self) -> Result<(), StoreError> {
        let mut previous = self.expected_version;
        for event in &self.events {
            if event.aggregate_id != self.aggregate_id || event.sequence_number != previous + 1 {
                return Err(StoreError::SequenceViolation {
                    aggregate_id: self.aggregate_id,
                    sequence: event.sequence_number,
                });
            }
            previous = event.sequence_number;
        }
        Ok(())
    }
}

#[async_trait]
pub trait EventStorage: Send + Sync + 'static {
    /// Highest persisted sequence for the aggregate, 0 for an unknown stream
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError>;

    /// Compare-and-append: fails with `ConcurrencyConflict` and writes nothing
    /// when the stream head no longer equals `commit.expected_version`
    async fn commit(&self, commit: Commit) -> Result<(), StoreError>;

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError>;

    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError>;

    /// Unpublished outbox entries, oldest first
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_published(&self, ids: &[Uuid]) -> Result<(), StoreError>;
}
