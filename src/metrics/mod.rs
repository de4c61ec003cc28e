use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for the event store
// ============================================================================
//
// Provides metrics for:
// - Events appended and snapshots taken per aggregate type
// - Optimistic concurrency conflicts
// - Publish failures after commit
// - Outbox entries the relay could not decode
// - Rehydration (events replayed, snapshot vs. full history loads)
// - Save latency
//
// The registry is owned here; exposing it over HTTP is left to the host
// application.
// ============================================================================

pub struct StoreMetrics {
    registry: Registry,

    pub events_appended: IntCounterVec,
    pub concurrency_conflicts: IntCounterVec,
    pub snapshots_taken: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub outbox_poisoned: IntCounterVec,
    pub events_replayed: IntCounterVec,
    pub aggregates_loaded: IntCounterVec,
    pub save_duration: HistogramVec,
}

impl StoreMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("events_appended_total", "Total events appended to the store"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounterVec::new(
            Opts::new("concurrency_conflicts_total", "Saves rejected by the optimistic concurrency check"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let snapshots_taken = IntCounterVec::new(
            Opts::new("snapshots_taken_total", "Snapshots committed alongside events"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(snapshots_taken.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("publish_failures_total", "Committed events the event bus failed to publish"),
            &["aggregate_type", "event_type"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let outbox_poisoned = IntCounterVec::new(
            Opts::new("outbox_poisoned_total", "Outbox entries dropped because they could not be decoded"),
            &["aggregate_type", "event_type"],
        )?;
        registry.register(Box::new(outbox_poisoned.clone()))?;

        let events_replayed = IntCounterVec::new(
            Opts::new("events_replayed_total", "Events folded onto aggregates during loads"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_replayed.clone()))?;

        let aggregates_loaded = IntCounterVec::new(
            Opts::new("aggregates_loaded_total", "Aggregates rehydrated, by starting point"),
            &["aggregate_type", "source"],
        )?;
        registry.register(Box::new(aggregates_loaded.clone()))?;

        let save_duration = HistogramVec::new(
            HistogramOpts::new("save_duration_seconds", "Duration of EventStore::save")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(save_duration.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            concurrency_conflicts,
            snapshots_taken,
            publish_failures,
            outbox_poisoned,
            events_replayed,
            aggregates_loaded,
            save_duration,
        })
    }

    /// Get the Prometheus registry for exposing metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_save(&self, aggregate_type: &str, event_count: usize, snapshot: bool, duration_secs: f64) {
        self.events_appended
            .with_label_values(&[aggregate_type])
            .inc_by(event_count as u64);
        if snapshot {
            self.snapshots_taken.with_label_values(&[aggregate_type]).inc();
        }
        self.save_duration
            .with_label_values(&[aggregate_type])
            .observe(duration_secs);
    }

    pub fn record_conflict(&self, aggregate_type: &str) {
        self.concurrency_conflicts.with_label_values(&[aggregate_type]).inc();
    }

    pub fn record_publish_failure(&self, aggregate_type: &str, event_type: &str) {
        self.publish_failures
            .with_label_values(&[aggregate_type, event_type])
            .inc();
    }

    pub fn record_outbox_poisoned(&self, aggregate_type: &str, event_type: &str) {
        self.outbox_poisoned
            .with_label_values(&[aggregate_type, event_type])
            .inc();
    }

    pub fn record_load(&self, aggregate_type: &str, from_snapshot: bool, replayed: usize) {
        let source = if from_snapshot { "snapshot" } else { "history" };
        self.aggregates_loaded
            .with_label_values(&[aggregate_type, source])
            .inc();
        self.events_replayed
            .with_label_values(&[aggregate_type])
            .inc_by(replayed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_total(metrics: &StoreMetrics, name: &str) -> f64 {
        metrics
            .registry()
            .gather()
            .iter()
            .find(|family| family.name() == name)
            .map(|family| family.metric.iter().map(|m| m.counter.value.unwrap_or(0.0)).sum())
            .unwrap_or(0.0)
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_conflict("Order");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_save_counts_events_and_snapshot() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_save("Order", 3, true, 0.002);
        metrics.record_save("Order", 2, false, 0.001);

        assert_eq!(counter_total(&metrics, "events_appended_total"), 5.0);
        assert_eq!(counter_total(&metrics, "snapshots_taken_total"), 1.0);
    }

    #[test]
    fn test_record_load_labels_source() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_load("Order", true, 2);
        metrics.record_load("Order", false, 7);

        let gathered = metrics.registry().gather();
        let loaded = gathered
            .iter()
            .find(|family| family.name() == "aggregates_loaded_total")
            .unwrap();
        assert_eq!(loaded.metric.len(), 2);
        assert_eq!(counter_total(&metrics, "events_replayed_total"), 9.0);
    }
}
