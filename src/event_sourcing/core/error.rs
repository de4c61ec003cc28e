use uuid::Uuid;

// ============================================================================
// Event Store Errors
// ============================================================================

/// Boxed error produced by a [`Serializer`](super::Serializer) implementation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer appended to the stream since the aggregate was loaded.
    /// Callers are expected to reload the aggregate and retry the command.
    #[error("Concurrency conflict on aggregate {aggregate_id}: expected version {expected}, but current is {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Cannot construct empty {aggregate_type} aggregate {aggregate_id}: {reason}")]
    Construction {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
        reason: String,
    },

    #[error("Failed to replay event {sequence} onto aggregate {aggregate_id}: {reason}")]
    Replay {
        aggregate_id: Uuid,
        sequence: i64,
        reason: String,
    },

    /// A commit would break the strictly increasing sequence of a stream
    #[error("Sequence violation on aggregate {aggregate_id} at sequence {sequence}")]
    SequenceViolation { aggregate_id: Uuid, sequence: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[source] BoxError),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(Box::new(err))
    }
}
