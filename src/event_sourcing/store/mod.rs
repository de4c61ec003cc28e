// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// Save/load orchestration on top of an `EventStorage` backend. Every component
// works with ANY aggregate/event type.
//
// ============================================================================

pub mod concurrency;
pub mod event_store;
pub mod outbox;
pub mod query;
pub mod snapshot;

pub use concurrency::ConcurrencyChecker;
pub use event_store::{DeliveryMode, EventStore};
pub use outbox::OutboxRelay;
pub use query::EventQuery;
pub use snapshot::{requires_snapshot, Snapshot, SnapshotConfig, SnapshotRepository, StorageSnapshotRepository};
