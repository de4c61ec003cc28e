use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Commit, EventStorage, OutboxMessage, StoredSnapshot};
use crate::event_sourcing::core::{StoreError, StoredEvent};
use crate::event_sourcing::store::{ConcurrencyChecker, EventQuery};

// ============================================================================
// In-Memory Event Storage
// ============================================================================
//
// Backs tests and local development. One async mutex guards all state, so a
// commit's version check and append can never interleave with another commit.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    snapshots: HashMap<Uuid, Vec<StoredSnapshot>>,
    /// Unpublished entries only, oldest first
    outbox: VecDeque<OutboxMessage>,
}

#[derive(Default)]
pub struct InMemoryEventStorage {
    inner: Mutex<Inner>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots ever written for the aggregate
    pub async fn snapshot_count(&self, aggregate_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner.snapshots.get(&aggregate_id).map_or(0, Vec::len)
    }

    pub async fn event_count(&self, aggregate_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner.streams.get(&aggregate_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(0, |e| e.sequence_number))
    }

    async fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .streams
            .get(&commit.aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(0, |e| e.sequence_number);
        ConcurrencyChecker::verify(commit.aggregate_id, commit.expected_version, current)?;
        commit.validate_sequences()?;

        let new_version = commit.new_version();
        let event_count = commit.events.len();

        if !commit.events.is_empty() {
            inner
                .streams
                .entry(commit.aggregate_id)
                .or_default()
                .extend(commit.events);
        }
        if let Some(snapshot) = commit.snapshot {
            inner
                .snapshots
                .entry(commit.aggregate_id)
                .or_default()
                .push(snapshot);
        }
        inner.outbox.extend(commit.outbox);

        tracing::debug!(
            aggregate_id = %commit.aggregate_id,
            new_version = new_version,
            event_count = event_count,
            "Committed to in-memory storage"
        );
        Ok(())
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.inner.lock().await;

        let mut records: Vec<StoredEvent> = inner
            .streams
            .get(&query.aggregate_id)
            .map(|stream| stream.iter().filter(|e| query.matches(e)).cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|e| e.sequence_number);

        Ok(records)
    }

    async fn latest_snapshot(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .snapshots
            .get(&aggregate_id)
            .and_then(|snapshots| snapshots.iter().max_by_key(|s| s.last_event_sequence))
            .cloned())
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.outbox.iter().take(limit).cloned().collect())
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut inner = self.inner.lock().await;
        inner.outbox.retain(|message| !ids.contains(&message.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn stored(aggregate_id: Uuid, sequence_number: i64, event_type: &str) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            aggregate_version: sequence_number - 1,
            event_type: event_type.to_string(),
            event_version: 1,
            payload: "{}".to_string(),
            causation_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: "{}".to_string(),
        }
    }

    fn commit_of(aggregate_id: Uuid, expected: i64, count: i64) -> Commit {
        let mut commit = Commit::new(aggregate_id, "Test", expected);
        commit.events = (1..=count)
            .map(|i| stored(aggregate_id, expected + i, "Test"))
            .collect();
        commit
    }

    #[tokio::test]
    async fn test_commit_appends_and_advances_version() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();

        assert_eq!(storage.current_version(id).await.unwrap(), 0);
        storage.commit(commit_of(id, 0, 3)).await.unwrap();

        assert_eq!(storage.current_version(id).await.unwrap(), 3);
        assert_eq!(storage.event_count(id).await, 3);
    }

    #[tokio::test]
    async fn test_stale_commit_appends_nothing() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();
        storage.commit(commit_of(id, 0, 2)).await.unwrap();

        let mut stale = commit_of(id, 0, 1);
        stale.snapshot = Some(StoredSnapshot {
            aggregate_id: id,
            aggregate_type: "Test".to_string(),
            last_event_sequence: 1,
            state: "{}".to_string(),
            created_at: Utc::now(),
        });

        let err = storage.commit(stale).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(storage.event_count(id).await, 2);
        assert_eq!(storage.snapshot_count(id).await, 0);
    }

    #[tokio::test]
    async fn test_racing_writers_only_one_wins() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.commit(commit_of(id, 0, 2)).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(storage.current_version(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_sorts_by_sequence() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();
        {
            let mut inner = storage.inner.lock().await;
            inner.streams.insert(
                id,
                vec![stored(id, 3, "C"), stored(id, 1, "A"), stored(id, 2, "B")],
            );
        }

        let records = storage.query(&EventQuery::for_aggregate(id)).await.unwrap();
        let sequences: Vec<i64> = records.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_highest_sequence() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();

        for (expected, last) in [(0, 5), (5, 10)] {
            let mut commit = commit_of(id, expected, 5);
            commit.snapshot = Some(StoredSnapshot {
                aggregate_id: id,
                aggregate_type: "Test".to_string(),
                last_event_sequence: last,
                state: format!("{{\"at\":{last}}}"),
                created_at: Utc::now(),
            });
            storage.commit(commit).await.unwrap();
        }

        let latest = storage.latest_snapshot(id).await.unwrap().unwrap();
        assert_eq!(latest.last_event_sequence, 10);
        assert_eq!(storage.snapshot_count(id).await, 2);
    }

    #[tokio::test]
    async fn test_outbox_drains_in_order() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();
        let mut commit = commit_of(id, 0, 3);
        commit.outbox = commit
            .events
            .iter()
            .map(|event| OutboxMessage {
                id: Uuid::new_v4(),
                aggregate_type: "Test".to_string(),
                event: event.clone(),
                created_at: Utc::now(),
            })
            .collect();
        storage.commit(commit).await.unwrap();

        let pending = storage.pending_outbox(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event.sequence_number, 1);

        storage.mark_published(&[pending[0].id]).await.unwrap();
        let pending = storage.pending_outbox(10).await.unwrap();
        let sequences: Vec<i64> = pending.iter().map(|m| m.event.sequence_number).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_published_entries_are_dropped() {
        let storage = InMemoryEventStorage::new();
        let id = Uuid::new_v4();
        let mut commit = commit_of(id, 0, 2);
        commit.outbox = commit
            .events
            .iter()
            .map(|event| OutboxMessage {
                id: Uuid::new_v4(),
                aggregate_type: "Test".to_string(),
                event: event.clone(),
                created_at: Utc::now(),
            })
            .collect();
        storage.commit(commit).await.unwrap();

        let ids: Vec<Uuid> = storage
            .pending_outbox(10)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        storage.mark_published(&ids).await.unwrap();
        // Unknown ids are ignored
        storage.mark_published(&[Uuid::new_v4()]).await.unwrap();

        assert!(storage.pending_outbox(10).await.unwrap().is_empty());
        assert!(storage.inner.lock().await.outbox.is_empty());
    }
}
