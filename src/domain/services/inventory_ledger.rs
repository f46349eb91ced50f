//! # Inventory Ledger
//!
//! On-hand quantity per catalog variant. Every adjustment is a batch applied
//! under one lock: either every line of the batch is applied or none is, and
//! the stock check and the write can never interleave with another batch.
//!
//! Each batch carries an [`OperationToken`]. The ledger keeps the entry it
//! recorded for every token, so a retried batch is acknowledged without
//! touching stock a second time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::domain::events::InventoryEvent;
use crate::domain::value_objects::{OperationToken, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction { Decrement, Increment }

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StockAdjustment {
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl StockAdjustment {
    pub fn new(variant_id: VariantId, quantity: u32) -> Self { Self { variant_id, quantity } }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub token: OperationToken,
    pub direction: Direction,
    /// Merged per variant, sorted by variant id.
    pub lines: Vec<(VariantId, u32)>,
    pub applied_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn event(&self) -> InventoryEvent {
        match self.direction {
            Direction::Decrement => InventoryEvent::Decremented { token: self.token.clone(), lines: self.lines.clone() },
            Direction::Increment => InventoryEvent::Incremented { token: self.token.clone(), lines: self.lines.clone() },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied(LedgerEntry),
    /// The token was already applied with identical content; stock is untouched.
    Replayed(LedgerEntry),
}

impl LedgerOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self { Self::Applied(e) | Self::Replayed(e) => e }
    }
    pub fn is_replay(&self) -> bool { matches!(self, Self::Replayed(_)) }
}

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<VariantId, u32>,
    entries: HashMap<OperationToken, LedgerEntry>,
}

#[derive(Debug, Default)]
pub struct InventoryLedger {
    state: Mutex<LedgerState>,
}

impl InventoryLedger {
    pub fn new() -> Self { Self::default() }

    pub fn with_levels<I>(levels: I) -> Self
    where I: IntoIterator<Item = (VariantId, u32)> {
        let ledger = Self::new();
        if let Ok(mut state) = ledger.state.lock() { state.stock.extend(levels); }
        ledger
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|_| CoreError::Internal("inventory ledger lock poisoned".into()))
    }

    /// Registers a variant with an opening balance, replacing any previous balance.
    pub fn register(&self, variant_id: VariantId, on_hand: u32) -> Result<()> {
        self.lock()?.stock.insert(variant_id, on_hand);
        Ok(())
    }

    pub fn on_hand(&self, variant_id: &VariantId) -> Result<u32> {
        self.lock()?.stock.get(variant_id).copied().ok_or_else(|| CoreError::not_found("variant", variant_id))
    }

    pub fn entry(&self, token: &OperationToken) -> Result<Option<LedgerEntry>> {
        Ok(self.lock()?.entries.get(token).cloned())
    }

    /// Removes stock for every line, or for none if any line is short.
    pub fn decrement(&self, token: &OperationToken, lines: &[StockAdjustment]) -> Result<LedgerOutcome> {
        self.apply(token, Direction::Decrement, lines)
    }

    /// Returns stock for every line; the only failure is an unknown variant.
    pub fn increment(&self, token: &OperationToken, lines: &[StockAdjustment]) -> Result<LedgerOutcome> {
        self.apply(token, Direction::Increment, lines)
    }

    fn apply(&self, token: &OperationToken, direction: Direction, lines: &[StockAdjustment]) -> Result<LedgerOutcome> {
        let merged = merge(lines)?;
        let mut state = self.lock()?;

        if let Some(previous) = state.entries.get(token) {
            if previous.direction == direction && previous.lines == merged {
                tracing::info!(token = %token, "Ledger batch replayed, stock untouched");
                return Ok(LedgerOutcome::Replayed(previous.clone()));
            }
            tracing::error!(
                token = %token, ?direction, recorded = ?previous.lines, requested = ?merged,
                "Idempotency token replayed with different content"
            );
            return Err(CoreError::IdempotencyViolation { token: token.clone() });
        }

        // Validate the whole batch before writing anything.
        let mut next = Vec::with_capacity(merged.len());
        for (variant_id, qty) in &merged {
            let on_hand = *state.stock.get(variant_id).ok_or_else(|| CoreError::not_found("variant", variant_id))?;
            let updated = match direction {
                Direction::Decrement => on_hand.checked_sub(*qty).ok_or_else(|| CoreError::InsufficientStock {
                    variant_id: variant_id.clone(), requested: *qty, available: on_hand,
                })?,
                Direction::Increment => on_hand.checked_add(*qty)
                    .ok_or_else(|| CoreError::Internal(format!("stock overflow for {variant_id}")))?,
            };
            next.push((variant_id.clone(), updated));
        }

        for (variant_id, updated) in next { state.stock.insert(variant_id, updated); }
        let entry = LedgerEntry { token: token.clone(), direction, lines: merged, applied_at: Utc::now() };
        state.entries.insert(token.clone(), entry.clone());
        tracing::info!(token = %token, ?direction, lines = entry.lines.len(), "Ledger batch applied");
        Ok(LedgerOutcome::Applied(entry))
    }
}

fn merge(lines: &[StockAdjustment]) -> Result<Vec<(VariantId, u32)>> {
    if lines.is_empty() { return Err(CoreError::validation("stock adjustment batch is empty")); }
    let mut merged: BTreeMap<VariantId, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(CoreError::validation(format!("adjustment for {} has zero quantity", line.variant_id)));
        }
        let slot = merged.entry(line.variant_id.clone()).or_default();
        *slot = slot.checked_add(line.quantity).ok_or_else(|| CoreError::validation("adjustment quantity overflow"))?;
    }
    Ok(merged.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn vid(s: &str) -> VariantId { VariantId::new(s) }
    fn adj(s: &str, q: u32) -> StockAdjustment { StockAdjustment::new(vid(s), q) }

    fn ledger() -> InventoryLedger { InventoryLedger::with_levels([(vid("A"), 5), (vid("B"), 1)]) }

    #[test]
    fn test_decrement_and_increment() {
        let ledger = ledger();
        ledger.decrement(&OperationToken::new("t1"), &[adj("A", 3)]).unwrap();
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 2);
        ledger.increment(&OperationToken::new("t2"), &[adj("A", 10)]).unwrap();
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 12);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let ledger = ledger();
        let err = ledger.decrement(&OperationToken::new("t1"), &[adj("A", 2), adj("B", 2)]).unwrap_err();
        assert_eq!(err, CoreError::InsufficientStock { variant_id: vid("B"), requested: 2, available: 1 });
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 5);
        assert_eq!(ledger.on_hand(&vid("B")).unwrap(), 1);
        assert!(ledger.entry(&OperationToken::new("t1")).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_lines_are_merged() {
        let ledger = ledger();
        let err = ledger.decrement(&OperationToken::new("t1"), &[adj("A", 3), adj("A", 3)]).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { requested: 6, available: 5, .. }));
    }

    #[test]
    fn test_replay_decrements_once() {
        let ledger = ledger();
        let token = OperationToken::new("order:1:ship");
        assert!(!ledger.decrement(&token, &[adj("A", 2)]).unwrap().is_replay());
        assert!(ledger.decrement(&token, &[adj("A", 2)]).unwrap().is_replay());
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 3);
    }

    #[test]
    fn test_inconsistent_replay_is_violation() {
        let ledger = ledger();
        let token = OperationToken::new("t1");
        ledger.decrement(&token, &[adj("A", 2)]).unwrap();
        let err = ledger.decrement(&token, &[adj("A", 3)]).unwrap_err();
        assert!(matches!(err, CoreError::IdempotencyViolation { .. }));
        let err = ledger.increment(&token, &[adj("A", 2)]).unwrap_err();
        assert!(matches!(err, CoreError::IdempotencyViolation { .. }));
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 3);
    }

    #[test]
    fn test_unknown_variant() {
        let err = ledger().increment(&OperationToken::new("t"), &[adj("Z", 1)]).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "variant", .. }));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let err = ledger().decrement(&OperationToken::new("t"), &[adj("A", 0)]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_concurrent_decrements_never_oversell() {
        let ledger = Arc::new(InventoryLedger::with_levels([(vid("A"), 50)]));
        let handles: Vec<_> = (0..8).map(|worker| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                (0..20).filter(|i| {
                    let token = OperationToken::new(format!("w{worker}-{i}"));
                    ledger.decrement(&token, &[adj("A", 1)]).is_ok()
                }).count()
            })
        }).collect();
        let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(succeeded, 50);
        assert_eq!(ledger.on_hand(&vid("A")).unwrap(), 0);
    }
}
