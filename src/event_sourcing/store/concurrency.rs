use uuid::Uuid;

use crate::event_sourcing::core::StoreError;

// ============================================================================
// Optimistic Concurrency Check
// ============================================================================
//
// Compares the version an aggregate was loaded at with the highest sequence
// persisted for it. The event store runs this once to fail fast, and every
// storage backend runs it again inside the isolation boundary of its commit,
// so that read-compare-append is never interleaved with another writer.
//
// ============================================================================

pub struct ConcurrencyChecker;

impl ConcurrencyChecker {
    pub fn verify(aggregate_id: Uuid, expected: i64, actual: i64) -> Result<(), StoreError> {
        if expected != actual {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                expected_version = expected,
                current_version = actual,
                "Concurrency conflict detected"
            );
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
