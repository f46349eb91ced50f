//! Order State Machine
//!
//! Owns placed orders and drives their status transitions together with the
//! inventory side effect of each edge. Per order, one mutating request at a
//! time holds an update claim; a concurrent one is refused with
//! `ConflictingUpdate` instead of waiting. Reads never take the claim.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::domain::aggregates::{InventoryEffect, Order, OrderStatus};
use crate::domain::events::DomainEvent;
use crate::domain::services::inventory_ledger::{InventoryLedger, StockAdjustment};
use crate::domain::value_objects::{OperationToken, OrderId};
use crate::{CoreError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct StatusCommand {
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
    /// Client supplied idempotency key for this transition.
    #[serde(default)]
    pub token: Option<OperationToken>,
    /// Version the caller last saw; a mismatch is a lost race.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl StatusCommand {
    pub fn to(status: OrderStatus) -> Self { Self { status, reason: None, token: None, expected_version: None } }
    pub fn cancel(reason: impl Into<String>) -> Self { Self { reason: Some(reason.into()), ..Self::to(OrderStatus::Cancelled) } }
    pub fn with_token(mut self, token: impl Into<String>) -> Self { self.token = Some(OperationToken::new(token)); self }
    pub fn expecting_version(mut self, version: u64) -> Self { self.expected_version = Some(version); self }
}

/// Authoritative post-transition state.
#[derive(Clone, Debug, Serialize)]
pub struct TransitionOutcome {
    pub order: Order,
    pub replayed: bool,
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Default)]
pub struct OrderBook {
    orders: RwLock<HashMap<OrderId, Arc<OrderSlot>>>,
}

impl OrderBook {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().map_err(|_| CoreError::Internal("order book lock poisoned".into()))?;
        orders.insert(order.id(), Arc::new(OrderSlot::new(order)));
        Ok(())
    }

    pub(crate) fn slot(&self, id: OrderId) -> Result<Arc<OrderSlot>> {
        let orders = self.orders.read().map_err(|_| CoreError::Internal("order book lock poisoned".into()))?;
        orders.get(&id).cloned().ok_or_else(|| CoreError::not_found("order", id))
    }

    pub fn get(&self, id: OrderId) -> Result<Order> {
        self.slot(id)?.read()
    }

    /// All orders, newest first.
    pub fn list(&self) -> Result<Vec<Order>> {
        let slots: Vec<_> = {
            let orders = self.orders.read().map_err(|_| CoreError::Internal("order book lock poisoned".into()))?;
            orders.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots { out.push(slot.read()?); }
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(out)
    }

    /// Applies one status transition and its inventory side effect as a unit.
    pub fn update_status(
        &self, ledger: &InventoryLedger, order_id: OrderId, command: StatusCommand, actor: &str,
    ) -> Result<TransitionOutcome> {
        let slot = self.slot(order_id)?;
        let mut order = slot.claim()?;

        if let Some(token) = &command.token {
            if let Some(previous) = order.find_transition(token) {
                if previous.to == command.status {
                    tracing::info!(%order_id, token = %token, status = %command.status, "Status transition replayed");
                    return Ok(TransitionOutcome { order: order.clone(), replayed: true, events: vec![] });
                }
                return Err(CoreError::validation(format!(
                    "idempotency key {token} was already used for a transition to {}", previous.to
                )));
            }
        }

        if let Some(expected) = command.expected_version {
            if expected != order.version() {
                tracing::warn!(%order_id, expected, actual = order.version(), "Stale status update");
                return Err(CoreError::ConflictingUpdate(format!(
                    "order {order_id} is at version {}, request expected {expected}", order.version()
                )));
            }
        }

        let plan = order.plan_transition(command.status, command.reason.as_deref()).inspect_err(|e| {
            tracing::warn!(%order_id, from = %order.status(), to = %command.status, error = %e, "Status transition rejected");
        })?;

        let mut events = Vec::new();
        let adjustments: Vec<StockAdjustment> = plan.stock.iter()
            .map(|(variant_id, qty)| StockAdjustment::new(variant_id.clone(), *qty))
            .collect();
        let ledger_outcome = match plan.inventory {
            InventoryEffect::None => None,
            InventoryEffect::Deduct => Some(ledger.decrement(&OperationToken::shipment(order_id), &adjustments)),
            InventoryEffect::Restock => Some(ledger.increment(&OperationToken::cancellation_restock(order_id), &adjustments)),
        };
        if let Some(outcome) = ledger_outcome {
            let outcome = outcome.inspect_err(|e| {
                tracing::warn!(%order_id, to = %command.status, error = %e, "Inventory side effect failed, status unchanged");
            })?;
            if outcome.is_replay() {
                // The order never recorded this edge, yet the ledger already applied it.
                tracing::error!(%order_id, token = %outcome.entry().token, "Ledger holds an entry for an unrecorded transition");
                return Err(CoreError::IdempotencyViolation { token: outcome.entry().token.clone() });
            }
            events.push(DomainEvent::Inventory(outcome.entry().event()));
        }

        let token = command.token.unwrap_or_else(OperationToken::generate);
        order.apply_transition(plan, token, actor, Utc::now())?;
        events.extend(order.take_events());
        tracing::info!(%order_id, status = %order.status(), version = order.version(), actor, "Order status updated");

        Ok(TransitionOutcome { order: order.clone(), replayed: false, events })
    }
}

/// One order plus the claim a mutating request must hold.
#[derive(Debug)]
pub(crate) struct OrderSlot {
    id: OrderId,
    order: Mutex<Order>,
    updating: AtomicBool,
}

impl OrderSlot {
    fn new(order: Order) -> Self {
        Self { id: order.id(), order: Mutex::new(order), updating: AtomicBool::new(false) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Order>> {
        self.order.lock().map_err(|_| CoreError::Internal(format!("order {} lock poisoned", self.id)))
    }

    pub(crate) fn read(&self) -> Result<Order> { Ok(self.lock()?.clone()) }

    /// Takes the order for a mutating request without waiting on a concurrent one.
    pub(crate) fn claim(&self) -> Result<OrderUpdate<'_>> {
        if self.updating.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(CoreError::ConflictingUpdate(format!("order {} is being updated by another request", self.id)));
        }
        let claim = UpdateClaim(&self.updating);
        Ok(OrderUpdate { order: self.lock()?, _claim: claim })
    }
}

struct UpdateClaim<'a>(&'a AtomicBool);

impl Drop for UpdateClaim<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

/// Exclusive access to an order for the duration of one mutating request.
pub(crate) struct OrderUpdate<'a> {
    order: MutexGuard<'a, Order>,
    _claim: UpdateClaim<'a>,
}

impl Deref for OrderUpdate<'_> {
    type Target = Order;
    fn deref(&self) -> &Order { &self.order }
}

impl DerefMut for OrderUpdate<'_> {
    fn deref_mut(&mut self) -> &mut Order { &mut self.order }
}
