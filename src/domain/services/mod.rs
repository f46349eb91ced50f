//! Pricing and fulfillment services
pub mod cart_totals;
pub mod inventory_ledger;
pub mod offer_engine;
pub mod order_workflow;
pub mod stock_returns;

pub use cart_totals::{compute_totals, CartTotals};
pub use inventory_ledger::{Direction, InventoryLedger, LedgerEntry, LedgerOutcome, StockAdjustment};
pub use offer_engine::{price_item, price_line, ItemPrice, LinePrice};
pub use order_workflow::{OrderBook, StatusCommand, TransitionOutcome};
pub use stock_returns::{ReturnLine, ReturnRequest, ReturnSummary, ReturnedLine};
