//! Domain events
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{Money, OperationToken, OrderId, VariantId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Inventory(InventoryEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: OrderId, customer_id: String, payable: Money, at: DateTime<Utc> },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus, reason: Option<String>, at: DateTime<Utc> },
    StockReturned { order_id: OrderId, lines: Vec<(VariantId, u32)>, at: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    Decremented { token: OperationToken, lines: Vec<(VariantId, u32)> },
    Incremented { token: OperationToken, lines: Vec<(VariantId, u32)> },
}

impl DomainEvent {
    /// Dotted name used as the message subject suffix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::StockReturned { .. }) => "order.stock_returned",
            Self::Inventory(InventoryEvent::Decremented { .. }) => "inventory.decremented",
            Self::Inventory(InventoryEvent::Incremented { .. }) => "inventory.incremented",
        }
    }
}
