// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Domain-specific aggregates built on the event store. Each aggregate has its
// own subdirectory with value objects, events, commands, errors, the aggregate
// implementation and a command handler.
//
// ============================================================================

pub mod order;
