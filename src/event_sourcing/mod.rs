// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

// Core abstractions (GENERIC - works with any aggregate)
pub mod core;
// Persistence backends (in-memory, PostgreSQL)
pub mod storage;
// Save/load orchestration, snapshots, queries, outbox relay
pub mod store;

// Re-export core infrastructure
pub use self::core::*;
pub use self::storage::{EventStorage, InMemoryEventStorage, PostgresEventStorage};
pub use self::store::*;
