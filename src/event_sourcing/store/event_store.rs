use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::concurrency::ConcurrencyChecker;
use super::query::EventQuery;
use super::snapshot::{requires_snapshot, SnapshotRepository};
use crate::event_sourcing::core::{AggregateRoot, EventEnvelope, JsonSerializer, Serializer, StoreError};
use crate::event_sourcing::storage::{Commit, EventStorage, OutboxMessage};
use crate::messaging::DomainEventBus;
use crate::metrics::StoreMetrics;

// ============================================================================
// Generic Event Store - Repository for Aggregates
// ============================================================================
//
// Type Parameters:
// - `A`: The aggregate root type (must implement AggregateRoot)
// - `S`: The persistence store (must implement EventStorage)
// - `Z`: The payload serializer, JSON by default
//
// Responsibilities:
// 1. Reject stale writes (optimistic concurrency)
// 2. Append uncommitted events, plus a snapshot when an interval boundary is
//    crossed, as one atomic commit
// 3. Publish committed events, or stage them in the outbox
// 4. Rehydrate aggregates from the latest snapshot and the events after it
// 5. Query event history by aggregate, start sequence and event type
//
// ============================================================================

/// How committed events reach the domain event bus
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Publish right after the commit. A crash or bus failure at that point
    /// loses the publication, never the events.
    #[default]
    AfterCommit,
    /// Write events to the outbox inside the commit; `OutboxRelay` publishes.
    Outbox,
}

pub struct EventStore<A: AggregateRoot, S, Z = JsonSerializer> {
    storage: Arc<S>,
    serializer: Z,
    snapshots: Option<Arc<dyn SnapshotRepository<A>>>,
    event_bus: Option<Arc<dyn DomainEventBus<A::Event>>>,
    delivery: DeliveryMode,
    metrics: Option<Arc<StoreMetrics>>,
}

impl<A, S> EventStore<A, S, JsonSerializer>
where
    A: AggregateRoot,
    S: EventStorage,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_serializer(storage, JsonSerializer)
    }
}

impl<A, S, Z> EventStore<A, S, Z>
where
    A: AggregateRoot,
    S: EventStorage,
    Z: Serializer,
{
    pub fn with_serializer(storage: Arc<S>, serializer: Z) -> Self {
        Self {
            storage,
            serializer,
            snapshots: None,
            event_bus: None,
            delivery: DeliveryMode::default(),
            metrics: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotRepository<A>>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn DomainEventBus<A::Event>>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_delivery_mode(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<StoreMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // ------------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------------

    /// Persist the aggregate's uncommitted events.
    ///
    /// Fails with `StoreError::ConcurrencyConflict`, appending nothing, when
    /// another writer got there first; reload the aggregate and retry. On
    /// success the uncommitted buffer is cleared.
    pub async fn save(&self, aggregate: &mut A) -> Result<(), StoreError> {
        let started = Instant::now();
        let aggregate_id = aggregate.aggregate_id();
        let aggregate_type = A::aggregate_type();
        let expected_version = aggregate.persisted_version();

        let current_version = self.storage.current_version(aggregate_id).await?;
        if let Err(err) = ConcurrencyChecker::verify(aggregate_id, expected_version, current_version) {
            self.record_conflict(aggregate_type);
            return Err(err);
        }

        let uncommitted = aggregate.uncommitted_events();
        if uncommitted.is_empty() {
            tracing::debug!(aggregate_id = %aggregate_id, "Nothing to save");
            return Ok(());
        }

        let mut commit = Commit::new(aggregate_id, aggregate_type, expected_version);
        for envelope in uncommitted {
            commit.events.push(envelope.encode(&self.serializer)?);
        }

        if let Some(snapshots) = &self.snapshots {
            let interval = snapshots.snapshot_interval();
            if requires_snapshot(interval, uncommitted.iter().map(|e| e.sequence_number)) {
                commit.snapshot = Some(snapshots.save_snapshot(aggregate)?);
            }
        }

        if self.delivery == DeliveryMode::Outbox {
            commit.outbox = commit
                .events
                .iter()
                .map(|event| OutboxMessage {
                    id: Uuid::now_v7(),
                    aggregate_type: aggregate_type.to_string(),
                    event: event.clone(),
                    created_at: Utc::now(),
                })
                .collect();
        }

        let new_version = commit.new_version();
        let event_count = commit.events.len();
        let snapshot_taken = commit.snapshot.is_some();

        if let Err(err) = self.storage.commit(commit).await {
            if err.is_concurrency_conflict() {
                self.record_conflict(aggregate_type);
            }
            return Err(err);
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            new_version = new_version,
            event_count = event_count,
            snapshot = snapshot_taken,
            "✅ Saved aggregate"
        );

        if self.delivery == DeliveryMode::AfterCommit {
            self.publish(aggregate.uncommitted_events()).await;
        }

        aggregate.mark_committed();

        if let Some(metrics) = &self.metrics {
            metrics.record_save(aggregate_type, event_count, snapshot_taken, started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    /// Publish in generation order; failures are logged, never returned
    async fn publish(&self, events: &[EventEnvelope<A::Event>]) {
        let Some(event_bus) = &self.event_bus else {
            return;
        };

        for envelope in events {
            if let Err(e) = event_bus.publish(envelope).await {
                tracing::warn!(
                    aggregate_id = %envelope.aggregate_id,
                    sequence = envelope.sequence_number,
                    event_type = %envelope.event_type,
                    error = %e,
                    "Failed to publish committed event"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish_failure(A::aggregate_type(), &envelope.event_type);
                }
            }
        }
    }

    fn record_conflict(&self, aggregate_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_conflict(aggregate_type);
        }
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    /// Rebuild the aggregate from its latest snapshot (if any) and the events
    /// after it. `Ok(None)` when the aggregate has no history.
    pub async fn get_by_id(&self, aggregate_id: Uuid) -> Result<Option<A>, StoreError> {
        let snapshot = match &self.snapshots {
            Some(snapshots) => snapshots.get_latest_snapshot(aggregate_id).await?,
            None => None,
        };

        let (restored, query) = match snapshot {
            Some(snapshot) => {
                let query = EventQuery::for_aggregate(aggregate_id)
                    .from_sequence(snapshot.last_event_sequence + 1);
                (Some(snapshot.aggregate), query)
            }
            None => (None, EventQuery::for_aggregate(aggregate_id)),
        };
        let from_snapshot = restored.is_some();

        let events = self.query(&query).await?;

        let mut aggregate = match restored {
            Some(aggregate) => aggregate,
            None if events.is_empty() => {
                tracing::debug!(aggregate_id = %aggregate_id, "Aggregate not found");
                return Ok(None);
            }
            None => A::empty(aggregate_id).map_err(|e| StoreError::Construction {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
                reason: e.to_string(),
            })?,
        };

        let replayed = events.len();
        aggregate
            .replay(events)
            .map_err(|(sequence, e)| StoreError::Replay {
                aggregate_id,
                sequence,
                reason: e.to_string(),
            })?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            from_snapshot = from_snapshot,
            replayed = replayed,
            version = aggregate.version(),
            "Rehydrated aggregate"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_load(A::aggregate_type(), from_snapshot, replayed);
        }

        Ok(Some(aggregate))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// All events of the aggregate
    pub async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<A::Event>>, StoreError> {
        self.query(&EventQuery::for_aggregate(aggregate_id)).await
    }

    /// Events with `sequence_number >= start_sequence`
    pub async fn get_events_from(
        &self,
        aggregate_id: Uuid,
        start_sequence: i64,
    ) -> Result<Vec<EventEnvelope<A::Event>>, StoreError> {
        self.query(&EventQuery::for_aggregate(aggregate_id).from_sequence(start_sequence))
            .await
    }

    /// Events whose stored discriminator equals `event_type`
    pub async fn get_events_by_type(
        &self,
        aggregate_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<EventEnvelope<A::Event>>, StoreError> {
        self.query(&EventQuery::for_aggregate(aggregate_id).of_type(event_type))
            .await
    }

    /// Events whose stored discriminator is one of `event_types`
    pub async fn get_events_by_types<I, T>(
        &self,
        aggregate_id: Uuid,
        event_types: I,
    ) -> Result<Vec<EventEnvelope<A::Event>>, StoreError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.query(&EventQuery::for_aggregate(aggregate_id).of_types(event_types))
            .await
    }

    pub async fn query(&self, query: &EventQuery) -> Result<Vec<EventEnvelope<A::Event>>, StoreError> {
        let records = self.storage.query(query).await?;

        let events = records
            .iter()
            .map(|record| record.decode(&self.serializer))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            aggregate_id = %query.aggregate_id,
            count = events.len(),
            "Loaded events"
        );
        Ok(events)
    }

    /// Highest persisted sequence, 0 when the aggregate has no events
    pub async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        self.storage.current_version(aggregate_id).await
    }

    pub async fn exists(&self, aggregate_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.current_version(aggregate_id).await? > 0)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderAggregate, OrderEvent, OrderItem, OrderStatus};
    use crate::event_sourcing::storage::InMemoryEventStorage;
    use crate::event_sourcing::store::{SnapshotConfig, StorageSnapshotRepository};
    use crate::messaging::InMemoryEventBus;
    use async_trait::async_trait;

    type Store = EventStore<OrderAggregate, InMemoryEventStorage>;

    fn item(quantity: i32) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            quantity,
        }
    }

    fn new_order() -> OrderAggregate {
        OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), vec![item(1)]).unwrap()
    }

    fn store_with_snapshots(interval: u64) -> (Arc<InMemoryEventStorage>, Store) {
        let storage = Arc::new(InMemoryEventStorage::new());
        let snapshots = StorageSnapshotRepository::<OrderAggregate, _>::new(
            storage.clone(),
            SnapshotConfig::every(interval).unwrap(),
        );
        let store = Store::new(storage.clone()).with_snapshots(Arc::new(snapshots));
        (storage, store)
    }

    struct FailingBus;

    #[async_trait]
    impl DomainEventBus<OrderEvent> for FailingBus {
        async fn publish(&self, _envelope: &EventEnvelope<OrderEvent>) -> anyhow::Result<()> {
            anyhow::bail!("broker down")
        }
    }

    #[tokio::test]
    async fn test_save_then_get_by_id_round_trips() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let store: Store = EventStore::new(storage.clone());

        let mut order = new_order();
        order.update_items(vec![item(4), item(2)], None).unwrap();
        order.confirm().unwrap();
        store.save(&mut order).await.unwrap();

        assert!(order.uncommitted_events().is_empty());
        assert_eq!(order.version(), 3);

        let loaded = store.get_by_id(order.aggregate_id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.status, OrderStatus::Confirmed);
        assert_eq!(loaded.items.len(), 2);
        assert!(loaded.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store: Store = EventStore::new(Arc::new(InMemoryEventStorage::new()));
        assert!(store.get_by_id(Uuid::new_v4()).await.unwrap().is_none());

        let (_, snapshotting) = store_with_snapshots(5);
        assert!(snapshotting.get_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_save_conflicts_and_appends_nothing() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let store: Store = EventStore::new(storage.clone());
        let mut order = new_order();
        store.save(&mut order).await.unwrap();

        let mut first = store.get_by_id(order.aggregate_id()).await.unwrap().unwrap();
        let mut second = store.get_by_id(order.aggregate_id()).await.unwrap().unwrap();

        first.confirm().unwrap();
        store.save(&mut first).await.unwrap();

        second.cancel(Some("changed mind".to_string()), None).unwrap();
        let err = store.save(&mut second).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict { expected: 1, actual: 2, .. }
        ));
        assert_eq!(storage.event_count(order.aggregate_id()).await, 2);
        assert_eq!(second.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_save_is_a_no_op() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let store: Store = EventStore::new(storage.clone());
        let mut order = new_order();
        store.save(&mut order).await.unwrap();

        store.save(&mut order).await.unwrap();
        assert_eq!(storage.event_count(order.aggregate_id()).await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_taken_when_batch_hits_boundary() {
        let (storage, store) = store_with_snapshots(5);
        let mut order = new_order();
        order.update_items(vec![item(2)], None).unwrap();
        store.save(&mut order).await.unwrap(); // sequences 1, 2
        assert_eq!(storage.snapshot_count(order.aggregate_id()).await, 0);

        order.update_items(vec![item(3)], None).unwrap();
        order.update_items(vec![item(4)], None).unwrap();
        order.update_items(vec![item(5)], None).unwrap();
        store.save(&mut order).await.unwrap(); // sequences 3, 4, 5
        assert_eq!(storage.snapshot_count(order.aggregate_id()).await, 1);

        order.confirm().unwrap();
        order.ship("TRK-1".to_string(), "DHL".to_string()).unwrap();
        store.save(&mut order).await.unwrap(); // sequences 6, 7
        assert_eq!(storage.snapshot_count(order.aggregate_id()).await, 1);

        let snapshot = storage.latest_snapshot(order.aggregate_id()).await.unwrap().unwrap();
        assert_eq!(snapshot.last_event_sequence, 5);
    }

    #[tokio::test]
    async fn test_load_replays_only_events_after_snapshot() {
        let (storage, store) = store_with_snapshots(5);
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let store = store.with_metrics(metrics.clone());

        let mut order = new_order();
        for quantity in 2..=5 {
            order.update_items(vec![item(quantity)], None).unwrap();
        }
        store.save(&mut order).await.unwrap(); // 1..=5, snapshot at 5
        order.confirm().unwrap();
        store.save(&mut order).await.unwrap(); // 6
        assert_eq!(storage.snapshot_count(order.aggregate_id()).await, 1);

        let loaded = store.get_by_id(order.aggregate_id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), 6);
        assert_eq!(loaded.status, OrderStatus::Confirmed);
        assert_eq!(loaded.items[0].quantity, 5);

        let replayed: u64 = metrics
            .events_replayed
            .with_label_values(&["Order"])
            .get();
        assert_eq!(replayed, 1);
    }

    #[tokio::test]
    async fn test_publish_follows_generation_order() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let bus: Arc<InMemoryEventBus<OrderEvent>> = Arc::new(InMemoryEventBus::new(16));
        let mut receiver = bus.subscribe();
        let store: Store = EventStore::new(storage).with_event_bus(bus.clone());

        let mut order = new_order();
        order.confirm().unwrap();
        order.ship("TRK-9".to_string(), "UPS".to_string()).unwrap();
        store.save(&mut order).await.unwrap();

        let mut received = Vec::new();
        while let Ok(envelope) = receiver.try_recv() {
            received.push(envelope.event_type);
        }
        assert_eq!(received, vec!["OrderCreated", "OrderConfirmed", "OrderShipped"]);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_save() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let metrics = Arc::new(StoreMetrics::new().unwrap());
        let store: Store = EventStore::new(storage.clone())
            .with_event_bus(Arc::new(FailingBus))
            .with_metrics(metrics.clone());

        let mut order = new_order();
        store.save(&mut order).await.unwrap();

        assert!(order.uncommitted_events().is_empty());
        assert_eq!(storage.event_count(order.aggregate_id()).await, 1);
        let failures = metrics
            .publish_failures
            .with_label_values(&["Order", "OrderCreated"])
            .get();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_outbox_mode_stages_instead_of_publishing() {
        let storage = Arc::new(InMemoryEventStorage::new());
        let bus: Arc<InMemoryEventBus<OrderEvent>> = Arc::new(InMemoryEventBus::new(16));
        let mut receiver = bus.subscribe();
        let store: Store = EventStore::new(storage.clone())
            .with_event_bus(bus.clone())
            .with_delivery_mode(DeliveryMode::Outbox);

        let mut order = new_order();
        order.confirm().unwrap();
        store.save(&mut order).await.unwrap();

        assert!(receiver.try_recv().is_err());
        let pending = storage.pending_outbox(10).await.unwrap();
        let types: Vec<&str> = pending.iter().map(|m| m.event.event_type.as_str()).collect();
        assert_eq!(types, vec!["OrderCreated", "OrderConfirmed"]);
    }

    #[tokio::test]
    async fn test_type_queries_filter_by_discriminator() {
        let store: Store = EventStore::new(Arc::new(InMemoryEventStorage::new()));
        let mut order = new_order(); // OrderCreated
        order.update_items(vec![item(2)], None).unwrap(); // OrderItemsUpdated
        order.update_items(vec![item(3)], None).unwrap(); // OrderItemsUpdated
        order.confirm().unwrap(); // OrderConfirmed
        store.save(&mut order).await.unwrap();
        let id = order.aggregate_id();

        let updates = store.get_events_by_type(id, "OrderItemsUpdated").await.unwrap();
        let sequences: Vec<i64> = updates.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![2, 3]);

        let mixed = store
            .get_events_by_types(id, ["OrderItemsUpdated", "OrderConfirmed"])
            .await
            .unwrap();
        let sequences: Vec<i64> = mixed.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![2, 3, 4]);

        let delta = store.get_events_from(id, 3).await.unwrap();
        assert_eq!(delta.len(), 2);
        assert!(store.get_events_by_type(id, "OrderShipped").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_helpers() {
        let store: Store = EventStore::new(Arc::new(InMemoryEventStorage::new()));
        let mut order = new_order();
        assert!(!store.exists(order.aggregate_id()).await.unwrap());

        order.confirm().unwrap();
        store.save(&mut order).await.unwrap();

        assert!(store.exists(order.aggregate_id()).await.unwrap());
        assert_eq!(store.current_version(order.aggregate_id()).await.unwrap(), 2);
    }
}
