use async_trait::async_trait;
use chrono::Utc;
use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{AggregateRoot, JsonSerializer, Serializer, Snapshottable, StoreError};
use crate::event_sourcing::storage::{EventStorage, StoredSnapshot};

// ============================================================================
// Snapshots - Bounding Replay Cost
// ============================================================================
//
// A snapshot is aggregate state as of `last_event_sequence`. Loading restores
// it and replays only events with a higher sequence.
//
// Policy: a save takes a snapshot when ANY of its new events lands on an exact
// multiple of the interval. At most one snapshot is taken per save, and it
// reflects the aggregate's final in-memory state.
//
// ============================================================================

/// Restored aggregate plus the sequence it was captured at
pub struct Snapshot<A> {
    pub aggregate: A,
    pub last_event_sequence: i64,
}

#[async_trait]
pub trait SnapshotRepository<A: AggregateRoot>: Send + Sync {
    fn snapshot_interval(&self) -> NonZeroU64;

    async fn get_latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot<A>>, StoreError>;

    /// Capture the aggregate's current state as a record. The event store
    /// stages the record into the same commit as the events it covers, so
    /// nothing is written here.
    fn save_snapshot(&self, aggregate: &A) -> Result<StoredSnapshot, StoreError>;
}

/// True when any of `sequences` is an exact multiple of `interval`
pub fn requires_snapshot<I>(interval: NonZeroU64, sequences: I) -> bool
where
    I: IntoIterator<Item = i64>,
{
    let interval = interval.get();
    sequences
        .into_iter()
        .any(|sequence| sequence > 0 && (sequence as u64) % interval == 0)
}

#[derive(Clone, Copy, Debug)]
pub struct SnapshotConfig {
    pub interval: NonZeroU64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: NonZeroU64::MIN.saturating_add(99),
        }
    }
}

impl SnapshotConfig {
    /// `None` when `interval` is zero
    pub fn every(interval: u64) -> Option<Self> {
        NonZeroU64::new(interval).map(|interval| Self { interval })
    }
}

// ============================================================================
// Storage-Backed Snapshot Repository
// ============================================================================

/// Keeps snapshots in the same `EventStorage` as the events, which is what
/// lets a snapshot commit atomically with them.
pub struct StorageSnapshotRepository<A, S, Z = JsonSerializer> {
    storage: Arc<S>,
    serializer: Z,
    config: SnapshotConfig,
    _phantom: PhantomData<fn() -> A>,
}

impl<A, S> StorageSnapshotRepository<A, S, JsonSerializer> {
    pub fn new(storage: Arc<S>, config: SnapshotConfig) -> Self {
        Self::with_serializer(storage, config, JsonSerializer)
    }
}

impl<A, S, Z> StorageSnapshotRepository<A, S, Z> {
    pub fn with_serializer(storage: Arc<S>, config: SnapshotConfig, serializer: Z) -> Self {
        Self {
            storage,
            serializer,
            config,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<A, S, Z> SnapshotRepository<A> for StorageSnapshotRepository<A, S, Z>
where
    A: Snapshottable,
    S: EventStorage,
    Z: Serializer,
{
    fn snapshot_interval(&self) -> NonZeroU64 {
        self.config.interval
    }

    async fn get_latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot<A>>, StoreError> {
        let Some(stored) = self.storage.latest_snapshot(aggregate_id).await? else {
            return Ok(None);
        };

        let state: A::State = self.serializer.deserialize(&stored.state)?;
        let aggregate = A::restore(aggregate_id, state, stored.last_event_sequence).map_err(|e| {
            StoreError::Construction {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
                reason: format!("snapshot restore failed: {}", e),
            }
        })?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            last_event_sequence = stored.last_event_sequence,
            "Restored aggregate from snapshot"
        );

        Ok(Some(Snapshot {
            aggregate,
            last_event_sequence: stored.last_event_sequence,
        }))
    }

    fn save_snapshot(&self, aggregate: &A) -> Result<StoredSnapshot, StoreError> {
        Ok(StoredSnapshot {
            aggregate_id: aggregate.aggregate_id(),
            aggregate_type: A::aggregate_type().to_string(),
            last_event_sequence: aggregate.version(),
            state: self.serializer.serialize(&aggregate.snapshot_state())?,
            created_at: Utc::now(),
        })
    }
}
