//! Promotional offers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::value_objects::{Money, OfferId, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    PercentageOff,
    FixedAmountOff,
    BuyXGetYFree,
    CartPercentageOff,
    CartFixedOff,
    /// Any kind this core does not know how to price.
    #[serde(other)]
    Unsupported,
}

impl OfferKind {
    pub fn is_cart_level(self) -> bool { matches!(self, Self::CartPercentageOff | Self::CartFixedOff) }
    pub fn is_item_level(self) -> bool { matches!(self, Self::PercentageOff | Self::FixedAmountOff | Self::BuyXGetYFree) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    #[serde(default)]
    pub name: String,
    pub kind: OfferKind,
    /// Percentage (1-100) or absolute amount depending on `kind`. Unused for buy-X-get-Y.
    #[serde(default)]
    pub discount_value: Decimal,
    #[serde(default)]
    pub buy_qty: Option<u32>,
    #[serde(default)]
    pub free_qty: Option<u32>,
    #[serde(default)]
    pub min_cart_amount: Option<Money>,
    #[serde(default)]
    pub eligible_variant_ids: BTreeSet<VariantId>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_active() -> bool { true }

impl Offer {
    fn base(id: impl Into<String>, kind: OfferKind) -> Self {
        Self {
            id: OfferId::new(id), name: String::new(), kind, discount_value: Decimal::ZERO,
            buy_qty: None, free_qty: None, min_cart_amount: None, eligible_variant_ids: BTreeSet::new(),
            active: true, valid_from: None, valid_until: None,
        }
    }

    pub fn percentage_off<I, V>(id: impl Into<String>, pct: Decimal, variants: I) -> Self
    where I: IntoIterator<Item = V>, V: Into<String> {
        let mut offer = Self::base(id, OfferKind::PercentageOff);
        offer.discount_value = pct;
        offer.eligible_variant_ids = variants.into_iter().map(VariantId::new).collect();
        offer
    }

    pub fn fixed_amount_off<I, V>(id: impl Into<String>, amount: Decimal, variants: I) -> Self
    where I: IntoIterator<Item = V>, V: Into<String> {
        let mut offer = Self::base(id, OfferKind::FixedAmountOff);
        offer.discount_value = amount;
        offer.eligible_variant_ids = variants.into_iter().map(VariantId::new).collect();
        offer
    }

    pub fn buy_x_get_y<I, V>(id: impl Into<String>, buy: u32, free: u32, variants: I) -> Self
    where I: IntoIterator<Item = V>, V: Into<String> {
        let mut offer = Self::base(id, OfferKind::BuyXGetYFree);
        offer.buy_qty = Some(buy);
        offer.free_qty = Some(free);
        offer.eligible_variant_ids = variants.into_iter().map(VariantId::new).collect();
        offer
    }

    pub fn cart_percentage_off(id: impl Into<String>, pct: Decimal, min_cart_amount: Money) -> Self {
        let mut offer = Self::base(id, OfferKind::CartPercentageOff);
        offer.discount_value = pct;
        offer.min_cart_amount = Some(min_cart_amount);
        offer
    }

    pub fn cart_fixed_off(id: impl Into<String>, amount: Decimal, min_cart_amount: Money) -> Self {
        let mut offer = Self::base(id, OfferKind::CartFixedOff);
        offer.discount_value = amount;
        offer.min_cart_amount = Some(min_cart_amount);
        offer
    }

    /// Checks that exactly the fields belonging to `kind` are populated.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::validation(format!("offer {}: {msg}", self.id)));
        let has_bogo_fields = self.buy_qty.is_some() || self.free_qty.is_some();

        match self.kind {
            OfferKind::Unsupported => return fail("unsupported offer kind"),
            OfferKind::PercentageOff | OfferKind::CartPercentageOff => {
                if self.discount_value < Decimal::ONE || self.discount_value > Decimal::ONE_HUNDRED {
                    return fail("percentage must be between 1 and 100");
                }
            }
            OfferKind::FixedAmountOff | OfferKind::CartFixedOff => {
                if self.discount_value <= Decimal::ZERO { return fail("discount amount must be positive"); }
            }
            OfferKind::BuyXGetYFree => {
                match (self.buy_qty, self.free_qty) {
                    (Some(buy), Some(free)) if buy > 0 && free > 0 => {}
                    _ => return fail("buy and free quantities must be positive"),
                }
            }
        }

        if self.kind.is_cart_level() {
            if !self.eligible_variant_ids.is_empty() { return fail("cart-level offers cannot target variants"); }
            if has_bogo_fields { return fail("cart-level offers cannot carry buy/free quantities"); }
            match self.min_cart_amount {
                Some(min) if min > Money::ZERO => {}
                _ => return fail("cart-level offers need a positive minimum cart amount"),
            }
        } else {
            if self.min_cart_amount.is_some() { return fail("item-level offers cannot carry a minimum cart amount"); }
            if self.kind != OfferKind::BuyXGetYFree && has_bogo_fields {
                return fail("only buy-x-get-y offers carry buy/free quantities");
            }
        }
        Ok(())
    }

    /// Active and inside its validity window.
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        self.active
            && self.valid_from.map_or(true, |from| at >= from)
            && self.valid_until.map_or(true, |until| at <= until)
    }

    /// Whether this offer may price anything at `at`; invalid offers fail open.
    pub fn is_usable_at(&self, at: DateTime<Utc>) -> bool {
        if !self.is_live_at(at) { return false; }
        match self.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(offer_id = %self.id, error = %e, "Ignoring invalid offer");
                false
            }
        }
    }

    pub fn covers(&self, variant_id: &VariantId) -> bool {
        self.kind.is_item_level() && self.eligible_variant_ids.contains(variant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_valid_offers() {
        assert!(Offer::percentage_off("P", dec!(10), ["V1"]).validate().is_ok());
        assert!(Offer::fixed_amount_off("F", dec!(5), ["V1"]).validate().is_ok());
        assert!(Offer::buy_x_get_y("B", 2, 1, ["V1"]).validate().is_ok());
        assert!(Offer::cart_percentage_off("C", dec!(10), Money::new(dec!(500))).validate().is_ok());
        assert!(Offer::cart_fixed_off("D", dec!(50), Money::new(dec!(200))).validate().is_ok());
    }

    #[test]
    fn test_percentage_out_of_range() {
        assert!(Offer::percentage_off("P", dec!(0), ["V1"]).validate().is_err());
        assert!(Offer::percentage_off("P", dec!(101), ["V1"]).validate().is_err());
    }

    #[test]
    fn test_mixed_fields_rejected() {
        let mut offer = Offer::cart_percentage_off("C", dec!(10), Money::new(dec!(500)));
        offer.eligible_variant_ids.insert(VariantId::new("V1"));
        assert!(offer.validate().is_err());

        let mut offer = Offer::percentage_off("P", dec!(10), ["V1"]);
        offer.min_cart_amount = Some(Money::new(dec!(1)));
        assert!(offer.validate().is_err());

        let mut offer = Offer::fixed_amount_off("F", dec!(10), ["V1"]);
        offer.buy_qty = Some(2);
        assert!(offer.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_deserializes_as_unsupported() {
        let offer: Offer = serde_json::from_str(r#"{"id": "X", "kind": "mystery_box"}"#).unwrap();
        assert_eq!(offer.kind, OfferKind::Unsupported);
        assert!(!offer.is_usable_at(Utc::now()));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let mut offer = Offer::percentage_off("P", dec!(10), ["V1"]);
        offer.valid_until = Some(now - Duration::days(1));
        assert!(!offer.is_usable_at(now));
        offer.valid_until = None;
        offer.valid_from = Some(now + Duration::hours(1));
        assert!(!offer.is_usable_at(now));
        offer.valid_from = None;
        offer.active = false;
        assert!(!offer.is_usable_at(now));
    }
}
