use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::event::{DomainEvent, EventEnvelope};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. New events are applied in memory first and buffered until saved
// 3. Events are replayed in the exact sequence order they were stored
// 4. The store never computes state transitions; apply() does
//
// This is the GENERIC aggregate trait that works for ANY domain aggregate.
//
// ============================================================================

/// Generic Aggregate Root trait - all event-sourced aggregates implement this
///
/// Type Parameters:
/// - `Event`: The domain event type for this aggregate
/// - `Error`: The error type for business rule violations
pub trait AggregateRoot: Sized + Send + Sync + 'static {
    type Event: DomainEvent;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable name of the aggregate type, used in logs, metrics and snapshots
    fn aggregate_type() -> &'static str;

    /// Blank instance that history is replayed onto.
    ///
    /// Aggregates that cannot exist without an initial event return an error,
    /// which the store reports as a construction failure.
    fn empty(aggregate_id: Uuid) -> Result<Self, Self::Error>;

    fn aggregate_id(&self) -> Uuid;

    /// Sequence number of the last event applied, committed or not
    fn version(&self) -> i64;

    /// Fold one event into state. Must advance `version()` to
    /// `envelope.sequence_number`.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Event>) -> Result<(), Self::Error>;

    fn uncommitted_events(&self) -> &[EventEnvelope<Self::Event>];

    fn uncommitted_events_mut(&mut self) -> &mut Vec<EventEnvelope<Self::Event>>;

    /// Version as last persisted, i.e. before any buffered events
    fn persisted_version(&self) -> i64 {
        match self.uncommitted_events().first() {
            Some(first) => first.sequence_number - 1,
            None => self.version(),
        }
    }

    /// Record a new event: wrap it with the next sequence number, apply it and
    /// buffer it for the next save.
    fn raise(&mut self, event: Self::Event) -> Result<&EventEnvelope<Self::Event>, Self::Error> {
        let envelope = EventEnvelope::new(
            self.aggregate_id(),
            self.version() + 1,
            self.persisted_version(),
            event,
        );
        self.apply(&envelope)?;

        let buffer = self.uncommitted_events_mut();
        buffer.push(envelope);
        Ok(&buffer[buffer.len() - 1])
    }

    /// Fold stored history onto this instance, in the order given
    fn replay<I>(&mut self, events: I) -> Result<(), (i64, Self::Error)>
    where
        I: IntoIterator<Item = EventEnvelope<Self::Event>>,
    {
        for envelope in events {
            self.apply(&envelope)
                .map_err(|e| (envelope.sequence_number, e))?;
        }
        Ok(())
    }

    /// Clear the uncommitted buffer after a successful save
    fn mark_committed(&mut self) {
        self.uncommitted_events_mut().clear();
    }
}

// ============================================================================
// Snapshot Support
// ============================================================================

/// Aggregates whose state can be captured and restored to bound replay cost
pub trait Snapshottable: AggregateRoot {
    type State: Serialize + DeserializeOwned + Send + Sync;

    fn snapshot_state(&self) -> Self::State;

    /// Rebuild an aggregate whose last folded event is `last_event_sequence`
    fn restore(
        aggregate_id: Uuid,
        state: Self::State,
        last_event_sequence: i64,
    ) -> Result<Self, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Clone, Debug)]
    enum CounterEvent {
        Added(i64),
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            "CounterAdded"
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter overflow")]
    struct CounterError;

    #[derive(Debug)]
    struct Counter {
        id: Uuid,
        version: i64,
        total: i64,
        uncommitted: Vec<EventEnvelope<CounterEvent>>,
    }

    impl AggregateRoot for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn empty(aggregate_id: Uuid) -> Result<Self, Self::Error> {
            Ok(Self { id: aggregate_id, version: 0, total: 0, uncommitted: Vec::new() })
        }

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn apply(&mut self, envelope: &EventEnvelope<CounterEvent>) -> Result<(), CounterError> {
            let CounterEvent::Added(n) = envelope.payload;
            self.total = self.total.checked_add(n).ok_or(CounterError)?;
            self.version = envelope.sequence_number;
            Ok(())
        }

        fn uncommitted_events(&self) -> &[EventEnvelope<CounterEvent>] {
            &self.uncommitted
        }

        fn uncommitted_events_mut(&mut self) -> &mut Vec<EventEnvelope<CounterEvent>> {
            &mut self.uncommitted
        }
    }

    #[test]
    fn test_raise_assigns_next_sequence_and_buffers() {
        let mut counter = Counter::empty(Uuid::new_v4()).unwrap();
        counter.raise(CounterEvent::Added(2)).unwrap();
        counter.raise(CounterEvent::Added(3)).unwrap();

        assert_eq!(counter.total, 5);
        assert_eq!(counter.version(), 2);
        assert_eq!(counter.persisted_version(), 0);

        let sequences: Vec<i64> = counter.uncommitted_events().iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(counter.uncommitted_events().iter().all(|e| e.aggregate_version == 0));
    }

    #[test]
    fn test_mark_committed_clears_buffer_and_keeps_version() {
        let mut counter = Counter::empty(Uuid::new_v4()).unwrap();
        counter.raise(CounterEvent::Added(1)).unwrap();
        counter.mark_committed();

        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.persisted_version(), 1);
    }

    #[test]
    fn test_replay_reports_failing_sequence() {
        let id = Uuid::new_v4();
        let mut counter = Counter::empty(id).unwrap();
        let events = vec![
            EventEnvelope::new(id, 1, 0, CounterEvent::Added(i64::MAX)),
            EventEnvelope::new(id, 2, 1, CounterEvent::Added(1)),
        ];

        let (sequence, _) = counter.replay(events).unwrap_err();
        assert_eq!(sequence, 2);
        assert_eq!(counter.version(), 1);
    }
}
