//! OpenSASE Fulfillment
//!
//! Pricing and order-fulfillment core of the OpenSASE storefront.
//!
//! ## Features
//! - Offer pricing (percentage, fixed, buy-X-get-Y, cart-level)
//! - Cart totals and checkout into frozen order snapshots
//! - Inventory ledger with all-or-nothing, idempotent batches
//! - Order status state machine (cash on delivery)
//! - Partial stock returns

pub mod api;
pub mod config;
pub mod service;
pub mod db;
pub mod domain;
pub mod publisher;

use thiserror::Error;

use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{OperationToken, VariantId};

pub use crate::service::CommerceCore;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient stock for {variant_id}: requested {requested}, available {available}")]
    InsufficientStock { variant_id: VariantId, requested: u32, available: u32 },

    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflicting update: {0}")]
    ConflictingUpdate(String),

    /// A token was replayed with different content than its first application.
    #[error("Idempotency token {token} replayed with inconsistent content")]
    IdempotencyViolation { token: OperationToken },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

    /// Short machine-readable kind used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound { .. } => "not_found",
            Self::ConflictingUpdate(_) => "conflicting_update",
            Self::IdempotencyViolation { .. } => "idempotency_violation",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
