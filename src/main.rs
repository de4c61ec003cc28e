use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use aggregate_store::config::AppConfig;
use aggregate_store::domain::order::{OrderAggregate, OrderCommand, OrderCommandHandler, OrderEvent, OrderItem};
use aggregate_store::event_sourcing::{
    AggregateRoot, DeliveryMode, EventStorage, EventStore, InMemoryEventStorage, OutboxRelay,
    PostgresEventStorage, StorageSnapshotRepository,
};
use aggregate_store::messaging::{DomainEventBus, InMemoryEventBus, ResilientEventBus};
use aggregate_store::metrics::StoreMetrics;
use aggregate_store::utils::{CircuitBreakerConfig, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aggregate_store=debug"))
        )
        .init();

    tracing::info!("🚀 Starting aggregate store demo");

    let config = AppConfig::from_env()?;

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(StoreMetrics::new()?);

    // === 2. Storage backend ===
    match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let storage = PostgresEventStorage::connect(url, config.database_max_connections).await?;
            storage.ensure_schema().await?;
            run_demo(Arc::new(storage), &config, metrics.clone()).await?;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory storage");
            run_demo(Arc::new(InMemoryEventStorage::new()), &config, metrics.clone()).await?;
        }
    }

    tracing::info!("📊 Metrics registry holds {} metric families", metrics.registry().gather().len());
    tracing::info!("✅ Demo completed");
    Ok(())
}

async fn run_demo<S: EventStorage>(
    storage: Arc<S>,
    config: &AppConfig,
    metrics: Arc<StoreMetrics>,
) -> anyhow::Result<()> {
    let delivery = config.delivery()?;

    // === 3. Event bus behind retry + circuit breaker ===
    let local_bus: InMemoryEventBus<OrderEvent> = InMemoryEventBus::new(256);
    let mut subscriber = local_bus.subscribe();
    let event_bus: Arc<dyn DomainEventBus<OrderEvent>> = match broker_bus(config)? {
        Some(bus) => {
            drop(local_bus);
            bus
        }
        None => Arc::new(ResilientEventBus::new(
            local_bus,
            CircuitBreakerConfig::default(),
            RetryConfig::default(),
        )),
    };

    let listener = tokio::spawn(async move {
        while let Ok(envelope) = subscriber.recv().await {
            tracing::info!(
                aggregate_id = %envelope.aggregate_id,
                sequence = envelope.sequence_number,
                event_type = %envelope.event_type,
                "📨 Received domain event"
            );
        }
    });

    // === 4. Event store with snapshots ===
    let snapshots = StorageSnapshotRepository::<OrderAggregate, S>::new(storage.clone(), config.snapshots()?);
    let event_store = Arc::new(
        EventStore::<OrderAggregate, S>::new(storage.clone())
            .with_snapshots(Arc::new(snapshots))
            .with_event_bus(event_bus.clone())
            .with_delivery_mode(delivery)
            .with_metrics(metrics.clone()),
    );

    // === 5. Outbox relay (only does work in outbox mode) ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_handle = if delivery == DeliveryMode::Outbox {
        let relay = OutboxRelay::<OrderEvent, S>::new(storage.clone(), event_bus.clone())
            .with_metrics(metrics);
        Some(tokio::spawn(async move {
            relay.run(Duration::from_millis(200), shutdown_rx).await;
        }))
    } else {
        None
    };

    // === 6. Demonstrate the order lifecycle ===
    tracing::info!("📝 Demonstrating order lifecycle");
    let handler = OrderCommandHandler::new(event_store.clone());
    let order_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();

    let commands = vec![
        OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![
                OrderItem::new(Uuid::new_v4(), 2),
                OrderItem::new(Uuid::new_v4(), 1),
            ],
        },
        OrderCommand::UpdateItems {
            items: vec![OrderItem::new(Uuid::new_v4(), 5)],
            reason: Some("Customer changed mind".to_string()),
        },
        OrderCommand::ConfirmOrder,
        OrderCommand::ShipOrder {
            tracking_number: "TRACK-123".to_string(),
            carrier: "DHL".to_string(),
        },
        OrderCommand::DeliverOrder {
            signature: Some("J. Doe".to_string()),
        },
    ];

    for command in commands {
        let version = handler.handle(order_id, command, correlation_id).await?;
        tracing::info!(order_id = %order_id, version = version, "Command applied");
    }

    // === 7. Read side ===
    if let Some(order) = event_store.get_by_id(order_id).await? {
        tracing::info!(
            order_id = %order.aggregate_id(),
            version = order.version(),
            status = ?order.status,
            "🔎 Rehydrated order"
        );
    }
    let confirmations = event_store
        .get_events_by_types(order_id, ["OrderConfirmed", "OrderShipped"])
        .await?;
    tracing::info!(count = confirmations.len(), "Confirmation and shipping events");

    // Give the relay a chance to drain before shutting down
    if let Some(handle) = relay_handle {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = shutdown_tx.send(true);
        handle.await?;
    }

    drop(handler);
    drop(event_store);
    drop(event_bus);
    listener.await?;

    Ok(())
}

#[cfg(feature = "redpanda")]
fn broker_bus(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn DomainEventBus<OrderEvent>>>> {
    let Some(brokers) = &config.redpanda_brokers else {
        return Ok(None);
    };

    tracing::info!(brokers = %brokers, topic = %config.redpanda_topic, "Publishing to Redpanda");
    let bus = aggregate_store::messaging::RedpandaEventBus::new(brokers, &config.redpanda_topic)?;
    Ok(Some(Arc::new(ResilientEventBus::new(
        bus,
        CircuitBreakerConfig::default(),
        RetryConfig::default(),
    ))))
}

#[cfg(not(feature = "redpanda"))]
fn broker_bus(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn DomainEventBus<OrderEvent>>>> {
    if config.redpanda_brokers.is_some() {
        tracing::warn!("REDPANDA_BROKERS is set but the redpanda feature is disabled");
    }
    Ok(None)
}
