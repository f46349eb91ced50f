//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{AddressId, Money, OfferId, OperationToken, OrderId, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: String,
    address_id: AddressId,
    actual_price: Money,
    discount_price: Money,
    shipping_price: Money,
    payable_price: Money,
    status: OrderStatus,
    payment_mode: PaymentMode,
    payment_status: PaymentStatus,
    packed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    lines: Vec<OrderLine>,
    /// Quantities re-credited through the stock return workflow, per variant.
    returned: BTreeMap<VariantId, u32>,
    /// Quantities re-credited automatically when a shipped order was cancelled.
    restocked: BTreeMap<VariantId, u32>,
    transitions: Vec<StatusTransition>,
    stock_returns: Vec<StockReturnRecord>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Price snapshot taken at checkout; never follows later catalog changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub actual_price: Money,
    pub offer_price: Option<Money>,
    pub offer_id: Option<OfferId>,
}

/// Frozen aggregate prices of an order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPricing {
    pub actual_price: Money,
    pub discount_price: Money,
    pub shipping_price: Money,
    pub payable_price: Money,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] PendingConfirmation, Packed, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode { #[default] Cod }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed }

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::PendingConfirmation, Self::Packed, Self::Shipped, Self::Delivered, Self::Cancelled];

    pub fn is_terminal(self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Stock for the order's lines has left the ledger in this state.
    pub fn has_deducted_stock(self) -> bool { matches!(self, Self::Shipped | Self::Delivered) }

    /// A physical return of goods is plausible in this state.
    pub fn accepts_returns(self) -> bool { matches!(self, Self::Shipped | Self::Delivered | Self::Cancelled) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingConfirmation => "pending_confirmation",
            Self::Packed => "packed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub token: OperationToken,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReturnRecord {
    pub token: OperationToken,
    pub lines: Vec<(VariantId, u32)>,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Inventory side effect that must succeed before a transition is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryEffect { None, Deduct, Restock }

/// A validated, not yet applied, status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub reason: Option<String>,
    pub inventory: InventoryEffect,
    /// Per-variant quantities the inventory effect moves; empty when nothing moves.
    pub stock: Vec<(VariantId, u32)>,
}

impl Order {
    pub fn place(
        customer_id: impl Into<String>, address_id: AddressId, lines: Vec<OrderLine>, pricing: OrderPricing,
    ) -> Result<Self> {
        if lines.is_empty() { return Err(CoreError::validation("order has no lines")); }
        let id = OrderId::generate();
        let now = Utc::now();
        let mut order = Self {
            id, customer_id: customer_id.into(), address_id,
            actual_price: pricing.actual_price.rounded(), discount_price: pricing.discount_price.rounded(),
            shipping_price: pricing.shipping_price.rounded(), payable_price: pricing.payable_price.rounded(),
            status: OrderStatus::PendingConfirmation, payment_mode: PaymentMode::Cod, payment_status: PaymentStatus::Pending,
            packed_at: None, shipped_at: None, delivered_at: None, cancelled_at: None, cancel_reason: None,
            lines, returned: BTreeMap::new(), restocked: BTreeMap::new(), transitions: vec![], stock_returns: vec![],
            version: 0, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: id, customer_id: order.customer_id.clone(), payable: order.payable_price, at: now,
        }));
        Ok(order)
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn address_id(&self) -> &AddressId { &self.address_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_mode(&self) -> PaymentMode { self.payment_mode }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn lines(&self) -> &[OrderLine] { &self.lines }
    pub fn version(&self) -> u64 { self.version }
    pub fn cancel_reason(&self) -> Option<&str> { self.cancel_reason.as_deref() }
    pub fn packed_at(&self) -> Option<DateTime<Utc>> { self.packed_at }
    pub fn shipped_at(&self) -> Option<DateTime<Utc>> { self.shipped_at }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }
    pub fn transitions(&self) -> &[StatusTransition] { &self.transitions }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn pricing(&self) -> OrderPricing {
        OrderPricing {
            actual_price: self.actual_price, discount_price: self.discount_price,
            shipping_price: self.shipping_price, payable_price: self.payable_price,
        }
    }

    /// Validates a move to `to` against the transition table without touching state.
    pub fn plan_transition(&self, to: OrderStatus, reason: Option<&str>) -> Result<TransitionPlan> {
        use OrderStatus::*;
        let from = self.status;
        let reject = |why: &str| Err(CoreError::InvalidTransition { from, to, reason: why.to_string() });

        if from.is_terminal() { return reject("order is in a terminal state"); }

        let inventory = match (from, to) {
            (PendingConfirmation, Packed) | (Shipped, Delivered) => InventoryEffect::None,
            (Packed, Shipped) => InventoryEffect::Deduct,
            (_, Cancelled) => {
                if reason.map_or(true, |r| r.trim().is_empty()) {
                    return Err(CoreError::validation("a cancel reason is required"));
                }
                if from.has_deducted_stock() { InventoryEffect::Restock } else { InventoryEffect::None }
            }
            _ => return reject("no such edge in the order lifecycle"),
        };

        let stock = match inventory {
            InventoryEffect::None => vec![],
            InventoryEffect::Deduct => self.ordered_quantities(),
            // Goods already returned through the return workflow are back on hand.
            InventoryEffect::Restock => self.ordered_quantities().into_iter()
                .map(|(variant_id, qty)| {
                    let left = qty.saturating_sub(self.returned_quantity(&variant_id));
                    (variant_id, left)
                })
                .filter(|(_, qty)| *qty > 0)
                .collect(),
        };
        let inventory = if stock.is_empty() { InventoryEffect::None } else { inventory };

        let reason = if to == Cancelled { reason.map(|r| r.trim().to_string()) } else { None };
        Ok(TransitionPlan { from, to, reason, inventory, stock })
    }

    /// Records a planned transition. The plan must come from the current state.
    pub fn apply_transition(
        &mut self, plan: TransitionPlan, token: OperationToken, actor: impl Into<String>, at: DateTime<Utc>,
    ) -> Result<()> {
        if plan.from != self.status {
            return Err(CoreError::ConflictingUpdate(format!(
                "order {} moved from {} to {} since the transition was planned", self.id, plan.from, self.status
            )));
        }
        match plan.to {
            OrderStatus::Packed => self.packed_at = Some(at),
            OrderStatus::Shipped => self.shipped_at = Some(at),
            OrderStatus::Delivered => {
                self.delivered_at = Some(at);
                self.payment_status = PaymentStatus::Paid;
            }
            OrderStatus::Cancelled => {
                self.cancelled_at = Some(at);
                self.cancel_reason = plan.reason.clone();
                if self.payment_status == PaymentStatus::Pending { self.payment_status = PaymentStatus::Failed; }
                if plan.inventory == InventoryEffect::Restock {
                    for (variant_id, qty) in &plan.stock { *self.restocked.entry(variant_id.clone()).or_default() += qty; }
                }
            }
            OrderStatus::PendingConfirmation => {}
        }
        self.status = plan.to;
        self.version += 1;
        self.transitions.push(StatusTransition {
            token, from: plan.from, to: plan.to, actor: actor.into(), reason: plan.reason.clone(), at,
        });
        self.updated_at = at;
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged {
            order_id: self.id, from: plan.from, to: plan.to, reason: plan.reason, at,
        }));
        Ok(())
    }

    pub fn find_transition(&self, token: &OperationToken) -> Option<&StatusTransition> {
        self.transitions.iter().find(|t| &t.token == token)
    }

    pub fn ordered_quantity(&self, variant_id: &VariantId) -> u32 {
        self.lines.iter().filter(|l| &l.variant_id == variant_id).map(|l| l.quantity).sum()
    }

    /// Ordered quantity per variant, sorted by variant id.
    pub fn ordered_quantities(&self) -> Vec<(VariantId, u32)> {
        let mut totals: BTreeMap<VariantId, u32> = BTreeMap::new();
        for line in &self.lines { *totals.entry(line.variant_id.clone()).or_default() += line.quantity; }
        totals.into_iter().collect()
    }

    pub fn returned_quantity(&self, variant_id: &VariantId) -> u32 { self.returned.get(variant_id).copied().unwrap_or(0) }

    /// Quantity of a line that can still be re-credited to stock.
    pub fn returnable_quantity(&self, variant_id: &VariantId) -> u32 {
        let credited = self.returned_quantity(variant_id) + self.restocked.get(variant_id).copied().unwrap_or(0);
        self.ordered_quantity(variant_id).saturating_sub(credited)
    }

    pub fn stock_returns(&self) -> &[StockReturnRecord] { &self.stock_returns }

    pub fn find_return(&self, token: &OperationToken) -> Option<&StockReturnRecord> {
        self.stock_returns.iter().find(|r| &r.token == token)
    }

    /// Records stock already re-credited to the ledger. Status and prices are untouched.
    pub fn record_return(&mut self, token: OperationToken, lines: Vec<(VariantId, u32)>, actor: impl Into<String>, at: DateTime<Utc>) {
        for (variant_id, quantity) in &lines { *self.returned.entry(variant_id.clone()).or_default() += quantity; }
        self.stock_returns.push(StockReturnRecord { token, lines: lines.clone(), actor: actor.into(), at });
        self.updated_at = at;
        self.raise_event(DomainEvent::Order(OrderEvent::StockReturned { order_id: self.id, lines, at }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    pub(crate) fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(variant: &str, quantity: u32) -> OrderLine {
        OrderLine { variant_id: VariantId::new(variant), quantity, actual_price: Money::new(dec!(10)), offer_price: None, offer_id: None }
    }

    fn order() -> Order {
        let pricing = OrderPricing { actual_price: Money::new(dec!(20)), payable_price: Money::new(dec!(20)), ..Default::default() };
        Order::place("CUST001", AddressId::new("A1"), vec![line("V1", 2)], pricing).unwrap()
    }

    fn advance(order: &mut Order, to: OrderStatus, reason: Option<&str>) {
        let plan = order.plan_transition(to, reason).unwrap();
        order.apply_transition(plan, OperationToken::generate(), "admin", Utc::now()).unwrap();
    }

    /// Brings a fresh order into `status` along the legal path.
    fn order_in(status: OrderStatus) -> Order {
        let mut o = order();
        match status {
            OrderStatus::PendingConfirmation => {}
            OrderStatus::Packed => advance(&mut o, OrderStatus::Packed, None),
            OrderStatus::Shipped => { advance(&mut o, OrderStatus::Packed, None); advance(&mut o, OrderStatus::Shipped, None); }
            OrderStatus::Delivered => {
                advance(&mut o, OrderStatus::Packed, None);
                advance(&mut o, OrderStatus::Shipped, None);
                advance(&mut o, OrderStatus::Delivered, None);
            }
            OrderStatus::Cancelled => advance(&mut o, OrderStatus::Cancelled, Some("customer request")),
        }
        o
    }

    fn is_legal(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((from, to), (PendingConfirmation, Packed) | (Packed, Shipped) | (Shipped, Delivered))
            || (!from.is_terminal() && to == Cancelled)
    }

    #[test]
    fn test_order_workflow() {
        let mut order = order();
        assert_eq!(order.status(), OrderStatus::PendingConfirmation);
        advance(&mut order, OrderStatus::Packed, None);
        assert!(order.packed_at().is_some());
        let plan = order.plan_transition(OrderStatus::Shipped, None).unwrap();
        assert_eq!(plan.inventory, InventoryEffect::Deduct);
        order.apply_transition(plan, OperationToken::generate(), "admin", Utc::now()).unwrap();
        advance(&mut order, OrderStatus::Delivered, None);
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert_eq!(order.transitions().len(), 3);
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn test_transition_closure() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let order = order_in(from);
                let result = order.plan_transition(to, Some("reason"));
                if is_legal(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be legal");
                } else {
                    assert!(matches!(result, Err(CoreError::InvalidTransition { .. })), "{from} -> {to} should be rejected");
                }
                assert_eq!(order.status(), from);
            }
        }
    }

    #[test]
    fn test_cancel_requires_reason() {
        let order = order();
        assert!(matches!(order.plan_transition(OrderStatus::Cancelled, None), Err(CoreError::Validation(_))));
        assert!(matches!(order.plan_transition(OrderStatus::Cancelled, Some("  ")), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_cancel_after_ship_restocks() {
        let order = order_in(OrderStatus::Shipped);
        let plan = order.plan_transition(OrderStatus::Cancelled, Some("lost in transit")).unwrap();
        assert_eq!(plan.inventory, InventoryEffect::Restock);

        let mut order = order;
        order.apply_transition(plan, OperationToken::generate(), "admin", Utc::now()).unwrap();
        assert_eq!(order.cancel_reason(), Some("lost in transit"));
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert_eq!(order.returnable_quantity(&VariantId::new("V1")), 0);
    }

    #[test]
    fn test_cancel_restocks_only_unreturned_goods() {
        let mut order = order_in(OrderStatus::Shipped);
        order.record_return(OperationToken::generate(), vec![(VariantId::new("V1"), 1)], "admin", Utc::now());
        let plan = order.plan_transition(OrderStatus::Cancelled, Some("lost")).unwrap();
        assert_eq!(plan.inventory, InventoryEffect::Restock);
        assert_eq!(plan.stock, vec![(VariantId::new("V1"), 1)]);

        order.record_return(OperationToken::generate(), vec![(VariantId::new("V1"), 1)], "admin", Utc::now());
        let plan = order.plan_transition(OrderStatus::Cancelled, Some("lost")).unwrap();
        assert_eq!(plan.inventory, InventoryEffect::None);
        assert!(plan.stock.is_empty());
        order.apply_transition(plan, OperationToken::generate(), "admin", Utc::now()).unwrap();
        assert_eq!(order.returnable_quantity(&VariantId::new("V1")), 0);
    }

    #[test]
    fn test_stale_plan_rejected() {
        let mut order = order();
        let stale = order.plan_transition(OrderStatus::Packed, None).unwrap();
        advance(&mut order, OrderStatus::Cancelled, Some("duplicate"));
        let err = order.apply_transition(stale, OperationToken::generate(), "admin", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::ConflictingUpdate(_)));
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_events_raised() {
        let mut order = order();
        advance(&mut order, OrderStatus::Packed, None);
        let events = order.take_events();
        assert_eq!(events.len(), 2);
        assert!(order.take_events().is_empty());
    }
}
