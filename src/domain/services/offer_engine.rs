//! Offer Engine
//!
//! Stateless per-item and per-line pricing under at most one offer. Cart-level
//! offers are not applied here: they need the cart subtotal and are handled by
//! [`super::cart_totals`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{CatalogVariant, Offer, OfferKind};
use crate::domain::value_objects::{Money, OfferId, VariantId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ItemPrice {
    pub unit_price: Money,
    pub unit_discount: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinePrice {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_base_price: Money,
    pub line_subtotal: Money,
    pub line_discount: Money,
    /// Offer that produced `line_discount`, if any.
    pub offer_id: Option<OfferId>,
}

impl LinePrice {
    pub fn line_total(&self) -> Money { self.line_subtotal.saturating_sub(self.line_discount) }

    /// Effective discounted unit price, present only when a discount applied.
    pub fn effective_unit_price(&self) -> Option<Money> {
        if self.line_discount.is_zero() || self.quantity == 0 { return None; }
        Some(Money::new(self.line_total().amount() / Decimal::from(self.quantity)))
    }
}

fn applicable<'a>(variant: &CatalogVariant, offer: Option<&'a Offer>, at: DateTime<Utc>) -> Option<&'a Offer> {
    offer.filter(|o| o.covers(&variant.id) && o.is_usable_at(at))
}

/// Unit price and discount for one unit of `variant`.
///
/// Buy-X-get-Y and cart-level offers have no per-unit effect and price at base.
pub fn price_item(variant: &CatalogVariant, offer: Option<&Offer>, at: DateTime<Utc>) -> ItemPrice {
    let base = variant.base_price;
    let unit_price = match applicable(variant, offer, at) {
        Some(o) if o.kind == OfferKind::PercentageOff => {
            base.saturating_sub(base.percent(o.discount_value))
        }
        Some(o) if o.kind == OfferKind::FixedAmountOff => base.saturating_sub(Money::new(o.discount_value)),
        _ => base,
    };
    ItemPrice { unit_price, unit_discount: base - unit_price }
}

/// Prices a whole line, including the line-level buy-X-get-Y credit.
pub fn price_line(variant: &CatalogVariant, quantity: u32, offer: Option<&Offer>, at: DateTime<Utc>) -> LinePrice {
    let line_subtotal = variant.base_price.multiply(quantity);
    let applied = applicable(variant, offer, at);

    let line_discount = match applied {
        Some(o) if o.kind == OfferKind::BuyXGetYFree => {
            let (buy, free) = (o.buy_qty.unwrap_or(0), o.free_qty.unwrap_or(0));
            variant.base_price.multiply(free_units(quantity, buy, free))
        }
        _ => price_item(variant, offer, at).unit_discount.multiply(quantity),
    };

    LinePrice {
        variant_id: variant.id.clone(),
        quantity,
        unit_base_price: variant.base_price,
        line_subtotal,
        line_discount,
        offer_id: applied.filter(|_| !line_discount.is_zero()).map(|o| o.id.clone()),
    }
}

/// Free units earned by whole `buy + free` groups; partial groups earn nothing.
pub fn free_units(quantity: u32, buy: u32, free: u32) -> u32 {
    let group = buy.saturating_add(free);
    if group == 0 || free == 0 { return 0; }
    (quantity / group) * free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn variant(price: Decimal) -> CatalogVariant { CatalogVariant::new("V1", Money::new(price), 10) }

    #[test]
    fn test_no_offer_prices_at_base() {
        let p = price_item(&variant(dec!(100)), None, Utc::now());
        assert_eq!(p.unit_price.amount(), dec!(100));
        assert!(p.unit_discount.is_zero());
    }

    #[test]
    fn test_percentage_off() {
        let offer = Offer::percentage_off("P", dec!(15), ["V1"]);
        let p = price_item(&variant(dec!(80)), Some(&offer), Utc::now());
        assert_eq!(p.unit_price.amount(), dec!(68));
        assert_eq!(p.unit_discount.amount(), dec!(12));
        assert_eq!(p.unit_price + p.unit_discount, Money::new(dec!(80)));
    }

    #[test]
    fn test_full_percentage_floors_at_zero() {
        let offer = Offer::percentage_off("P", dec!(100), ["V1"]);
        let p = price_item(&variant(dec!(49.99)), Some(&offer), Utc::now());
        assert!(p.unit_price.is_zero());
        assert_eq!(p.unit_discount.amount(), dec!(49.99));
    }

    #[test]
    fn test_fixed_amount_capped_at_base() {
        let offer = Offer::fixed_amount_off("F", dec!(30), ["V1"]);
        let p = price_item(&variant(dec!(20)), Some(&offer), Utc::now());
        assert!(p.unit_price.is_zero());
        assert_eq!(p.unit_discount.amount(), dec!(20));

        let p = price_item(&variant(dec!(50)), Some(&offer), Utc::now());
        assert_eq!(p.unit_price.amount(), dec!(20));
    }

    #[test]
    fn test_ineligible_variant() {
        let offer = Offer::percentage_off("P", dec!(50), ["OTHER"]);
        let line = price_line(&variant(dec!(100)), 2, Some(&offer), Utc::now());
        assert!(line.line_discount.is_zero());
        assert!(line.offer_id.is_none());
    }

    #[test]
    fn test_expired_offer_ignored() {
        let mut offer = Offer::percentage_off("P", dec!(50), ["V1"]);
        offer.valid_until = Some(Utc::now() - Duration::minutes(5));
        let p = price_item(&variant(dec!(100)), Some(&offer), Utc::now());
        assert_eq!(p.unit_price.amount(), dec!(100));
    }

    #[test]
    fn test_bogo_whole_groups_only() {
        let offer = Offer::buy_x_get_y("B", 2, 1, ["V1"]);
        let line = price_line(&variant(dec!(100)), 7, Some(&offer), Utc::now());
        assert_eq!(line.line_discount.amount(), dec!(200));
        assert_eq!(line.line_subtotal.amount(), dec!(700));
        assert_eq!(line.offer_id, Some(OfferId::new("B")));

        let line = price_line(&variant(dec!(100)), 2, Some(&offer), Utc::now());
        assert!(line.line_discount.is_zero());
        assert!(line.effective_unit_price().is_none());
    }

    #[test]
    fn test_bogo_has_no_unit_discount() {
        let offer = Offer::buy_x_get_y("B", 1, 1, ["V1"]);
        let p = price_item(&variant(dec!(10)), Some(&offer), Utc::now());
        assert_eq!(p.unit_price.amount(), dec!(10));
    }

    #[test]
    fn test_cart_level_offer_not_applied_per_item() {
        let offer = Offer::cart_percentage_off("C", dec!(10), Money::new(dec!(1)));
        let line = price_line(&variant(dec!(100)), 3, Some(&offer), Utc::now());
        assert!(line.line_discount.is_zero());
    }

    #[test]
    fn test_free_units() {
        assert_eq!(free_units(7, 2, 1), 2);
        assert_eq!(free_units(6, 2, 1), 2);
        assert_eq!(free_units(5, 3, 2), 2);
        assert_eq!(free_units(4, 3, 2), 0);
        assert_eq!(free_units(10, 0, 0), 0);
    }
}
