//! Cart Total Calculator

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::{Offer, OfferKind, OrderLine, OrderPricing, SnapshotLine};
use crate::domain::services::offer_engine::{self, LinePrice};
use crate::domain::value_objects::{Money, OfferId};

/// Cart price totals, unrounded until [`CartTotals::rounded`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub payable: Money,
    /// Part of `discount` that came from a cart-level offer.
    pub cart_discount: Money,
    pub applied_offer: Option<OfferId>,
    pub lines: Vec<LinePrice>,
}

impl CartTotals {
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn rounded(&self) -> Self {
        Self {
            subtotal: self.subtotal.rounded(),
            discount: self.discount.rounded(),
            shipping: self.shipping.rounded(),
            payable: self.payable.rounded(),
            cart_discount: self.cart_discount.rounded(),
            applied_offer: self.applied_offer.clone(),
            lines: self.lines.clone(),
        }
    }

    pub fn pricing(&self) -> OrderPricing {
        OrderPricing {
            actual_price: self.subtotal, discount_price: self.discount,
            shipping_price: self.shipping, payable_price: self.payable,
        }
    }

    /// Order line snapshots for checkout.
    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.lines.iter().map(|l| OrderLine {
            variant_id: l.variant_id.clone(),
            quantity: l.quantity,
            actual_price: l.unit_base_price.rounded(),
            offer_price: l.effective_unit_price().map(|p| p.rounded()),
            offer_id: l.offer_id.clone(),
        }).collect()
    }
}

/// Aggregates line prices and applies a cart-level offer when its threshold is met.
pub fn compute_totals(lines: &[SnapshotLine], offer: Option<&Offer>, shipping: Money, at: DateTime<Utc>) -> CartTotals {
    let mut totals = CartTotals { shipping, ..Default::default() };

    for line in lines {
        let priced = offer_engine::price_line(&line.variant, line.quantity, offer, at);
        totals.subtotal += priced.line_subtotal;
        totals.discount += priced.line_discount;
        if priced.offer_id.is_some() { totals.applied_offer = priced.offer_id.clone(); }
        totals.lines.push(priced);
    }

    if let Some(o) = offer.filter(|o| o.kind.is_cart_level() && o.is_usable_at(at)) {
        let threshold = o.min_cart_amount.unwrap_or(Money::ZERO);
        if !totals.lines.is_empty() && totals.subtotal >= threshold {
            let raw = match o.kind {
                OfferKind::CartPercentageOff => totals.subtotal.percent(o.discount_value),
                _ => Money::new(o.discount_value),
            };
            let headroom = totals.subtotal.saturating_sub(totals.discount);
            let cart_discount = raw.min(headroom);
            totals.discount += cart_discount;
            totals.cart_discount = cart_discount;
            if !cart_discount.is_zero() { totals.applied_offer = Some(o.id.clone()); }
        } else {
            tracing::debug!(offer_id = %o.id, subtotal = %totals.subtotal, "Cart below offer threshold");
        }
    }

    totals.payable = (totals.subtotal - totals.discount + totals.shipping).max(Money::ZERO);
    totals
}
