// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// This module contains GENERIC, reusable event sourcing abstractions
// that work with ANY domain aggregate.
//
// Key Principles:
// - No domain-specific code (no Order, Customer, etc.)
// - Generic over aggregate and event types
// - Serialization is injected, never global
//
// ============================================================================

pub mod aggregate;
pub mod error;
pub mod event;
pub mod serializer;

// Re-export core types for convenience
pub use aggregate::{AggregateRoot, Snapshottable};
pub use error::{BoxError, StoreError};
pub use event::{DomainEvent, EventEnvelope, StoredEvent};
pub use serializer::{JsonSerializer, Serializer};
