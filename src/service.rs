//! Commerce core facade
//!
//! One method per operation exposed to the HTTP layer. Every method takes the
//! acting session or identity explicitly and returns the authoritative state
//! after the operation, so callers never need to re-fetch to reconcile.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::aggregates::{AddressBook, Cart, CartLine, Catalog, CatalogVariant, Offer, Order};
use crate::domain::events::DomainEvent;
use crate::domain::services::{
    compute_totals, CartTotals, InventoryLedger, OrderBook, ReturnRequest, ReturnSummary, StatusCommand,
    TransitionOutcome,
};
use crate::domain::value_objects::{AddressId, Money, OfferId, OrderId, SessionId, VariantId};
use crate::{CoreError, Result};

/// Cart contents with freshly computed, display-rounded totals.
#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub session_id: SessionId,
    pub lines: Vec<CartLine>,
    pub offer_id: Option<OfferId>,
    pub totals: CartTotals,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckoutOutcome {
    pub order: Order,
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

pub struct CommerceCore {
    catalog: Arc<dyn Catalog>,
    addresses: Arc<dyn AddressBook>,
    ledger: InventoryLedger,
    orders: OrderBook,
    carts: Mutex<HashMap<SessionId, Cart>>,
    shipping: Money,
}

impl CommerceCore {
    /// Builds the core and opens the ledger with the catalog's stock levels.
    pub fn new(catalog: Arc<dyn Catalog>, addresses: Arc<dyn AddressBook>, shipping: Money) -> Self {
        let ledger = InventoryLedger::with_levels(catalog.variants().into_iter().map(|v| (v.id, v.stock_quantity)));
        Self { catalog, addresses, ledger, orders: OrderBook::new(), carts: Mutex::new(HashMap::new()), shipping }
    }

    /// Restores previously persisted orders.
    pub fn with_orders(self, orders: Vec<Order>) -> Result<Self> {
        for order in orders { self.orders.insert(order)?; }
        Ok(self)
    }

    pub fn ledger(&self) -> &InventoryLedger { &self.ledger }

    fn carts(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Cart>>> {
        self.carts.lock().map_err(|_| CoreError::Internal("cart store lock poisoned".into()))
    }

    /// Catalog variant with its current on-hand quantity from the ledger.
    pub fn variant(&self, id: &VariantId) -> Result<CatalogVariant> {
        let mut variant = self.catalog.variant(id).ok_or_else(|| CoreError::not_found("variant", id))?;
        variant.stock_quantity = self.ledger.on_hand(id)?;
        Ok(variant)
    }

    fn cart_offer(&self, cart: &Cart) -> Option<Offer> {
        let id = cart.offer_id()?;
        let offer = self.catalog.offer(id);
        if offer.is_none() {
            tracing::warn!(offer_id = %id, session = %cart.session_id(), "Cart references an unknown offer, pricing without it");
        }
        offer
    }

    fn price(&self, cart: &Cart) -> Result<CartTotals> {
        let lines = cart.snapshot(self.catalog.as_ref())?;
        let offer = self.cart_offer(cart);
        Ok(compute_totals(&lines, offer.as_ref(), self.shipping, Utc::now()))
    }

    fn view(&self, cart: &Cart) -> Result<CartView> {
        Ok(CartView {
            session_id: cart.session_id().clone(),
            lines: cart.lines().to_vec(),
            offer_id: cart.offer_id().cloned(),
            totals: self.price(cart)?.rounded(),
        })
    }

    pub fn cart(&self, session: &SessionId) -> Result<CartView> {
        let carts = self.carts()?;
        match carts.get(session) {
            Some(cart) => self.view(cart),
            None => self.view(&Cart::new(session.clone())),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn add_to_cart(&self, session: &SessionId, variant_id: VariantId, quantity: u32) -> Result<CartView> {
        if self.catalog.variant(&variant_id).is_none() { return Err(CoreError::not_found("variant", &variant_id)); }
        let mut carts = self.carts()?;
        let cart = carts.entry(session.clone()).or_insert_with(|| Cart::new(session.clone()));
        cart.add_item(variant_id, quantity)?;
        self.view(cart)
    }

    #[tracing::instrument(skip(self))]
    pub fn set_cart_quantity(&self, session: &SessionId, variant_id: &VariantId, quantity: u32) -> Result<CartView> {
        let mut carts = self.carts()?;
        let cart = carts.get_mut(session).ok_or_else(|| CoreError::not_found("cart", session))?;
        cart.update_quantity(variant_id, quantity)?;
        self.view(cart)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_from_cart(&self, session: &SessionId, variant_id: &VariantId) -> Result<CartView> {
        let mut carts = self.carts()?;
        let cart = carts.get_mut(session).ok_or_else(|| CoreError::not_found("cart", session))?;
        cart.remove_item(variant_id)?;
        self.view(cart)
    }

    /// Attaches one offer to the cart, or detaches it with `None`.
    #[tracing::instrument(skip(self))]
    pub fn set_cart_offer(&self, session: &SessionId, offer_id: Option<OfferId>) -> Result<CartView> {
        if let Some(id) = &offer_id {
            if self.catalog.offer(id).is_none() { return Err(CoreError::not_found("offer", id)); }
        }
        let mut carts = self.carts()?;
        let cart = carts.entry(session.clone()).or_insert_with(|| Cart::new(session.clone()));
        cart.set_offer(offer_id);
        self.view(cart)
    }

    pub fn clear_cart(&self, session: &SessionId) -> Result<CartView> {
        self.carts()?.remove(session);
        self.view(&Cart::new(session.clone()))
    }

    /// Turns the session's priced cart into an order and destroys the cart.
    #[tracing::instrument(skip(self))]
    pub fn checkout(&self, session: &SessionId, customer_id: &str, address_id: AddressId) -> Result<CheckoutOutcome> {
        if self.addresses.address(&address_id).is_none() { return Err(CoreError::not_found("address", &address_id)); }

        let mut carts = self.carts()?;
        let cart = carts.get(session).filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::validation("cart is empty"))?;
        let totals = self.price(cart)?;
        if totals.payable.rounded() <= Money::ZERO {
            return Err(CoreError::validation("payable amount must be positive"));
        }

        let mut order = Order::place(customer_id, address_id, totals.order_lines(), totals.pricing())?;
        let events = order.take_events();
        self.orders.insert(order.clone())?;
        carts.remove(session);
        tracing::info!(order_id = %order.id(), payable = %order.pricing().payable_price, "Order placed");
        Ok(CheckoutOutcome { order, events })
    }

    pub fn order(&self, id: OrderId) -> Result<Order> { self.orders.get(id) }

    pub fn orders(&self) -> Result<Vec<Order>> { self.orders.list() }

    #[tracing::instrument(skip(self, command), fields(status = %command.status))]
    pub fn update_order_status(&self, order_id: OrderId, command: StatusCommand, actor: &str) -> Result<TransitionOutcome> {
        self.orders.update_status(&self.ledger, order_id, command, actor)
    }

    #[tracing::instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub fn return_stock(&self, order_id: OrderId, request: ReturnRequest, actor: &str) -> Result<ReturnSummary> {
        self.orders.return_stock(&self.ledger, order_id, request, actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Address, InMemoryAddressBook, InMemoryCatalog, OrderStatus};
    use crate::domain::services::ReturnLine;
    use rust_decimal_macros::dec;

    fn core() -> CommerceCore {
        let catalog = InMemoryCatalog::new()
            .with_variant(CatalogVariant::new("TEE-M", Money::new(dec!(100)), 5))
            .with_variant(CatalogVariant::new("CAP", Money::new(dec!(25.50)), 1))
            .with_offer(Offer::buy_x_get_y("BOGO", 2, 1, ["TEE-M"]))
            .with_offer(Offer::cart_percentage_off("TENOFF", dec!(10), Money::new(dec!(500))));
        let book = InMemoryAddressBook::new().with_address(Address { id: AddressId::new("HOME"), ..Default::default() });
        CommerceCore::new(Arc::new(catalog), Arc::new(book), Money::ZERO)
    }

    fn session() -> SessionId { SessionId::new("sess-1") }

    #[test]
    fn test_cart_quote_with_offer() {
        let core = core();
        core.add_to_cart(&session(), VariantId::new("TEE-M"), 3).unwrap();
        let view = core.set_cart_offer(&session(), Some(OfferId::new("BOGO"))).unwrap();
        assert_eq!(view.totals.subtotal.amount(), dec!(300));
        assert_eq!(view.totals.discount.amount(), dec!(100));
        assert_eq!(view.totals.payable.amount(), dec!(200));
    }

    #[test]
    fn test_unknown_variant_and_offer() {
        let core = core();
        assert!(matches!(core.add_to_cart(&session(), VariantId::new("NOPE"), 1), Err(CoreError::NotFound { .. })));
        assert!(matches!(core.set_cart_offer(&session(), Some(OfferId::new("NOPE"))), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_checkout_empty_cart() {
        let err = core().checkout(&session(), "cust", AddressId::new("HOME")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_checkout_unknown_address() {
        let core = core();
        core.add_to_cart(&session(), VariantId::new("CAP"), 1).unwrap();
        let err = core.checkout(&session(), "cust", AddressId::new("WORK")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "address", .. }));
    }

    #[test]
    fn test_full_lifecycle() {
        let core = core();
        core.add_to_cart(&session(), VariantId::new("TEE-M"), 3).unwrap();
        core.add_to_cart(&session(), VariantId::new("CAP"), 1).unwrap();
        core.set_cart_offer(&session(), Some(OfferId::new("BOGO"))).unwrap();

        let placed = core.checkout(&session(), "cust-9", AddressId::new("HOME")).unwrap();
        assert_eq!(placed.order.pricing().payable_price.amount(), dec!(225.50));
        assert_eq!(placed.order.lines().len(), 2);
        assert!(core.cart(&session()).unwrap().lines.is_empty());
        // Stock is untouched until dispatch.
        assert_eq!(core.variant(&VariantId::new("TEE-M")).unwrap().stock_quantity, 5);

        let id = placed.order.id();
        core.update_order_status(id, StatusCommand::to(OrderStatus::Packed), "admin").unwrap();
        core.update_order_status(id, StatusCommand::to(OrderStatus::Shipped), "admin").unwrap();
        assert_eq!(core.variant(&VariantId::new("TEE-M")).unwrap().stock_quantity, 2);
        assert_eq!(core.variant(&VariantId::new("CAP")).unwrap().stock_quantity, 0);

        core.update_order_status(id, StatusCommand::to(OrderStatus::Delivered), "admin").unwrap();
        let request = ReturnRequest { lines: vec![ReturnLine { variant_id: VariantId::new("TEE-M"), quantity: 1 }], idempotency_key: None };
        let summary = core.return_stock(id, request, "admin").unwrap();
        assert_eq!(summary.lines[0].on_hand, 3);
        assert_eq!(core.order(id).unwrap().status(), OrderStatus::Delivered);
    }

    #[test]
    fn test_frozen_prices_survive_catalog() {
        let core = core();
        core.add_to_cart(&session(), VariantId::new("CAP"), 2).unwrap();
        let order = core.checkout(&session(), "cust", AddressId::new("HOME")).unwrap().order;
        assert_eq!(order.lines()[0].actual_price.amount(), dec!(25.50));
        assert_eq!(order.pricing().actual_price.amount(), dec!(51.00));
        assert_eq!(order.lines()[0].offer_price, None);
    }
}
