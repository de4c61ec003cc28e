// ============================================================================
// aggregate_store - Event-sourced aggregate persistence
// ============================================================================
//
// - event_sourcing: aggregate/event abstractions, storage backends, the
//   EventStore (save with optimistic concurrency, snapshot + delta loads,
//   event queries) and the outbox relay
// - messaging:      domain event bus implementations
// - metrics:        Prometheus metrics for the store
// - utils:          retry and circuit breaker used around publishing
// - domain:         the Order aggregate built on top of the store
// - config:         environment configuration for the demo binary
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod messaging;
pub mod metrics;
pub mod utils;
