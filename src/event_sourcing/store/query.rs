use std::collections::HashSet;
use uuid::Uuid;

use crate::event_sourcing::core::StoredEvent;

// ============================================================================
// Event Query
// ============================================================================
//
// Filter over one aggregate's stream. Results are always ordered by ascending
// sequence number, whatever order the records were appended in.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQuery {
    pub aggregate_id: Uuid,
    /// Inclusive lower bound on `sequence_number`
    pub from_sequence: Option<i64>,
    /// Stored `event_type` must be a member of this set
    pub event_types: Option<HashSet<String>>,
}

impl EventQuery {
    pub fn for_aggregate(aggregate_id: Uuid) -> Self {
        Self {
            aggregate_id,
            from_sequence: None,
            event_types: None,
        }
    }

    pub fn from_sequence(mut self, start_sequence: i64) -> Self {
        self.from_sequence = Some(start_sequence);
        self
    }

    pub fn of_type(self, event_type: impl Into<String>) -> Self {
        self.of_types([event_type])
    }

    pub fn of_types<I, T>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.event_types = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, record: &StoredEvent) -> bool {
        if record.aggregate_id != self.aggregate_id {
            return false;
        }
        if let Some(from) = self.from_sequence {
            if record.sequence_number < from {
                return false;
            }
        }
        match &self.event_types {
            Some(types) => types.contains(&record.event_type),
            None => true,
        }
    }

    /// Type filter as a list, for backends that bind arrays
    pub fn event_type_list(&self) -> Option<Vec<String>> {
        self.event_types
            .as_ref()
            .map(|types| types.iter().cloned().collect())
    }
}
