use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::core::{AggregateRoot, DomainEvent, EventEnvelope, Snapshottable};
use super::value_objects::{OrderItem, OrderStatus};
use super::events::*;
use super::commands::OrderCommand;
use super::errors::OrderError;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Current State (derived from events)
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Optional fields
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,

    uncommitted: Vec<EventEnvelope<OrderEvent>>,
}

/// Serialized form of an order for snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,
}

impl OrderAggregate {
    /// Start a new order; the OrderCreated event is buffered until saved
    pub fn create(order_id: Uuid, customer_id: Uuid, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        validate_items(&items)?;

        let mut order = Self::empty(order_id)?;
        order.raise(OrderEvent::Created(OrderCreated { customer_id, items }))?;
        Ok(order)
    }

    pub fn update_items(&mut self, items: Vec<OrderItem>, reason: Option<String>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Created => {}
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            status => return Err(OrderError::InvalidStatusTransition(status)),
        }
        validate_items(&items)?;

        self.raise(OrderEvent::ItemsUpdated(OrderItemsUpdated { items, reason }))?;
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Created => {}
            OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed),
            status => return Err(OrderError::InvalidStatusTransition(status)),
        }

        self.raise(OrderEvent::Confirmed(OrderConfirmed { confirmed_at: Utc::now() }))?;
        Ok(())
    }

    pub fn ship(&mut self, tracking_number: String, carrier: String) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Confirmed => {}
            OrderStatus::Created => return Err(OrderError::NotConfirmed),
            status => return Err(OrderError::InvalidStatusTransition(status)),
        }

        self.raise(OrderEvent::Shipped(OrderShipped {
            tracking_number,
            carrier,
            shipped_at: Utc::now(),
        }))?;
        Ok(())
    }

    pub fn deliver(&mut self, signature: Option<String>) -> Result<(), OrderError> {
        if self.status != OrderStatus::Shipped {
            return Err(OrderError::NotShipped);
        }

        self.raise(OrderEvent::Delivered(OrderDelivered {
            delivered_at: Utc::now(),
            signature,
        }))?;
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>, cancelled_by: Option<Uuid>) -> Result<(), OrderError> {
        if self.status == OrderStatus::Cancelled {
            return Err(OrderError::AlreadyCancelled);
        }
        if self.status.is_terminal() {
            return Err(OrderError::InvalidStatusTransition(self.status));
        }

        self.raise(OrderEvent::Cancelled(OrderCancelled { reason, cancelled_by }))?;
        Ok(())
    }

    /// Dispatch a command against an existing order
    pub fn execute(&mut self, command: OrderCommand) -> Result<(), OrderError> {
        match command {
            OrderCommand::CreateOrder { .. } => Err(OrderError::AlreadyCreated),
            OrderCommand::UpdateItems { items, reason } => self.update_items(items, reason),
            OrderCommand::ConfirmOrder => self.confirm(),
            OrderCommand::ShipOrder { tracking_number, carrier } => self.ship(tracking_number, carrier),
            OrderCommand::DeliverOrder { signature } => self.deliver(signature),
            OrderCommand::CancelOrder { reason, cancelled_by } => self.cancel(reason, cancelled_by),
        }
    }
}

/// Validate business rules before emitting events
fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for item in items {
        if item.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
    }

    Ok(())
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl AggregateRoot for OrderAggregate {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn empty(aggregate_id: Uuid) -> Result<Self, Self::Error> {
        let now = Utc::now();
        Ok(Self {
            id: aggregate_id,
            version: 0,
            customer_id: Uuid::nil(),
            items: Vec::new(),
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
            tracking_number: None,
            carrier: None,
            cancelled_reason: None,
            uncommitted: Vec::new(),
        })
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, envelope: &EventEnvelope<Self::Event>) -> Result<(), Self::Error> {
        match &envelope.payload {
            OrderEvent::Created(e) => {
                if self.version != 0 {
                    return Err(OrderError::AlreadyCreated);
                }
                self.customer_id = e.customer_id;
                self.items = e.items.clone();
                self.status = OrderStatus::Created;
                self.created_at = envelope.timestamp;
            }
            other if self.version == 0 => {
                return Err(OrderError::NotInitialized(other.event_type(), envelope.sequence_number));
            }
            OrderEvent::ItemsUpdated(e) => {
                self.items = e.items.clone();
            }
            OrderEvent::Confirmed(_) => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::Shipped(e) => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(e.tracking_number.clone());
                self.carrier = Some(e.carrier.clone());
            }
            OrderEvent::Delivered(_) => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_reason = e.reason.clone();
            }
        }

        self.updated_at = envelope.timestamp;
        self.version = envelope.sequence_number;
        Ok(())
    }

    fn uncommitted_events(&self) -> &[EventEnvelope<Self::Event>] {
        &self.uncommitted
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<EventEnvelope<Self::Event>> {
        &mut self.uncommitted
    }
}

impl Snapshottable for OrderAggregate {
    type State = OrderSnapshot;

    fn snapshot_state(&self) -> Self::State {
        OrderSnapshot {
            customer_id: self.customer_id,
            items: self.items.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tracking_number: self.tracking_number.clone(),
            carrier: self.carrier.clone(),
            cancelled_reason: self.cancelled_reason.clone(),
        }
    }

    fn restore(aggregate_id: Uuid, state: Self::State, last_event_sequence: i64) -> Result<Self, Self::Error> {
        Ok(Self {
            id: aggregate_id,
            version: last_event_sequence,
            customer_id: state.customer_id,
            items: state.items,
            status: state.status,
            created_at: state.created_at,
            updated_at: state.updated_at,
            tracking_number: state.tracking_number,
            carrier: state.carrier,
            cancelled_reason: state.cancelled_reason,
            uncommitted: Vec::new(),
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<OrderItem> {
        vec![OrderItem::new(Uuid::new_v4(), 2)]
    }

    #[test]
    fn test_create_buffers_first_event() {
        let order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();

        assert_eq!(order.version(), 1);
        assert_eq!(order.persisted_version(), 0);
        assert_eq!(order.uncommitted_events().len(), 1);
        assert_eq!(order.uncommitted_events()[0].event_type, "OrderCreated");
    }

    #[test]
    fn test_create_rejects_bad_items() {
        let id = Uuid::new_v4();
        assert!(matches!(
            OrderAggregate::create(id, Uuid::new_v4(), vec![]),
            Err(OrderError::EmptyItems)
        ));
        assert!(matches!(
            OrderAggregate::create(id, Uuid::new_v4(), vec![OrderItem::new(Uuid::new_v4(), 0)]),
            Err(OrderError::InvalidQuantity(0))
        ));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();
        order.confirm().unwrap();
        order.ship("TRK-1".to_string(), "DHL".to_string()).unwrap();
        order.deliver(Some("J. Doe".to_string())).unwrap();

        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.version(), 4);
        assert_eq!(order.carrier.as_deref(), Some("DHL"));

        let sequences: Vec<i64> = order.uncommitted_events().iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert!(order.uncommitted_events().iter().all(|e| e.aggregate_version == 0));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();
        assert!(matches!(
            order.ship("TRK".to_string(), "UPS".to_string()),
            Err(OrderError::NotConfirmed)
        ));
        assert!(matches!(order.deliver(None), Err(OrderError::NotShipped)));

        order.confirm().unwrap();
        assert!(matches!(order.confirm(), Err(OrderError::AlreadyConfirmed)));
        assert!(matches!(
            order.update_items(items(), None),
            Err(OrderError::InvalidStatusTransition(OrderStatus::Confirmed))
        ));

        order.cancel(None, None).unwrap();
        assert!(matches!(order.cancel(None, None), Err(OrderError::AlreadyCancelled)));
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn test_delivered_order_cannot_be_cancelled() {
        let mut order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();
        order.confirm().unwrap();
        order.ship("TRK-2".to_string(), "UPS".to_string()).unwrap();
        order.deliver(None).unwrap();

        assert!(matches!(
            order.cancel(Some("too late".to_string()), None),
            Err(OrderError::InvalidStatusTransition(OrderStatus::Delivered))
        ));
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn test_execute_rejects_second_create() {
        let mut order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();
        let result = order.execute(OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: items(),
        });
        assert!(matches!(result, Err(OrderError::AlreadyCreated)));
    }

    #[test]
    fn test_replay_requires_created_first() {
        let id = Uuid::new_v4();
        let mut order = OrderAggregate::empty(id).unwrap();
        let confirmed = EventEnvelope::new(
            id,
            1,
            0,
            OrderEvent::Confirmed(OrderConfirmed { confirmed_at: Utc::now() }),
        );

        let (sequence, err) = order.replay(vec![confirmed]).unwrap_err();
        assert_eq!(sequence, 1);
        assert!(matches!(err, OrderError::NotInitialized("OrderConfirmed", 1)));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut order = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), items()).unwrap();
        order.confirm().unwrap();

        let restored = OrderAggregate::restore(order.id, order.snapshot_state(), order.version()).unwrap();

        assert_eq!(restored.version(), 2);
        assert_eq!(restored.status, OrderStatus::Confirmed);
        assert_eq!(restored.items, order.items);
        assert!(restored.uncommitted_events().is_empty());
    }
}
