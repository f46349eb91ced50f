//! Stock Return Workflow
//!
//! Re-credits part of an order's goods to inventory after they left, or may
//! have left, the warehouse. Requests are all-or-nothing and bounded by what
//! is still returnable on each line.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::aggregates::Order;
use crate::domain::events::DomainEvent;
use crate::domain::services::inventory_ledger::{InventoryLedger, StockAdjustment};
use crate::domain::services::order_workflow::OrderBook;
use crate::domain::value_objects::{OperationToken, OrderId, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReturnRequest {
    pub lines: Vec<ReturnLine>,
    /// Client supplied idempotency key; a replayed key credits nothing.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReturnedLine {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub returned_total: u32,
    pub remaining_returnable: u32,
    pub on_hand: u32,
}

/// Authoritative post-return state.
#[derive(Clone, Debug, Serialize)]
pub struct ReturnSummary {
    pub order: Order,
    pub lines: Vec<ReturnedLine>,
    pub replayed: bool,
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

impl OrderBook {
    pub fn return_stock(
        &self, ledger: &InventoryLedger, order_id: OrderId, request: ReturnRequest, actor: &str,
    ) -> Result<ReturnSummary> {
        let slot = self.slot(order_id)?;
        let mut order = slot.claim()?;

        if !order.status().accepts_returns() {
            return Err(CoreError::validation(format!(
                "stock can only be returned for shipped, delivered or cancelled orders; order {order_id} is {}",
                order.status()
            )));
        }

        let requested = merge_request(&request.lines)?;
        let token = match &request.idempotency_key {
            Some(key) if !key.trim().is_empty() => OperationToken::stock_return(order_id, key.trim()),
            Some(_) => return Err(CoreError::validation("idempotency key is empty")),
            None => OperationToken::stock_return(order_id, &uuid::Uuid::new_v4().to_string()),
        };

        if let Some(previous) = order.find_return(&token) {
            if previous.lines != requested {
                tracing::error!(%order_id, token = %token, "Return key replayed with different lines");
                return Err(CoreError::IdempotencyViolation { token });
            }
            tracing::info!(%order_id, token = %token, "Stock return replayed");
            let lines = summarize(&order, ledger, &requested)?;
            return Ok(ReturnSummary { order: order.clone(), lines, replayed: true, events: vec![] });
        }

        for (variant_id, quantity) in &requested {
            if order.ordered_quantity(variant_id) == 0 {
                return Err(CoreError::validation(format!("variant {variant_id} is not part of order {order_id}")));
            }
            let returnable = order.returnable_quantity(variant_id);
            if *quantity > returnable {
                tracing::warn!(%order_id, %variant_id, quantity, returnable, "Return exceeds returnable quantity");
                return Err(CoreError::validation(format!(
                    "cannot return {quantity} of {variant_id}: only {returnable} remain returnable"
                )));
            }
        }

        let adjustments: Vec<StockAdjustment> = requested.iter()
            .map(|(v, q)| StockAdjustment::new(v.clone(), *q))
            .collect();
        let outcome = ledger.increment(&token, &adjustments)?;
        if outcome.is_replay() {
            tracing::error!(%order_id, token = %token, "Ledger already applied a return the order never recorded");
            return Err(CoreError::IdempotencyViolation { token });
        }

        let mut events = vec![DomainEvent::Inventory(outcome.entry().event())];
        order.record_return(token, requested.clone(), actor, Utc::now());
        events.extend(order.take_events());
        let lines = summarize(&order, ledger, &requested)?;
        tracing::info!(%order_id, lines = lines.len(), actor, "Stock returned to inventory");

        Ok(ReturnSummary { order: order.clone(), lines, replayed: false, events })
    }
}

/// Validates quantities and merges repeated variants, sorted by variant id.
fn merge_request(lines: &[ReturnLine]) -> Result<Vec<(VariantId, u32)>> {
    if lines.is_empty() { return Err(CoreError::validation("return request has no lines")); }
    let mut merged: BTreeMap<VariantId, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(CoreError::validation(format!("return quantity for {} must be positive", line.variant_id)));
        }
        let slot = merged.entry(line.variant_id.clone()).or_default();
        *slot = slot.checked_add(line.quantity).ok_or_else(|| CoreError::validation("return quantity overflow"))?;
    }
    Ok(merged.into_iter().collect())
}

fn summarize(order: &Order, ledger: &InventoryLedger, lines: &[(VariantId, u32)]) -> Result<Vec<ReturnedLine>> {
    lines.iter().map(|(variant_id, quantity)| Ok(ReturnedLine {
        variant_id: variant_id.clone(),
        quantity: *quantity,
        returned_total: order.returned_quantity(variant_id),
        remaining_returnable: order.returnable_quantity(variant_id),
        on_hand: ledger.on_hand(variant_id)?,
    })).collect()
}
