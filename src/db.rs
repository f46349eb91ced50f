//! Postgres snapshot storage
//!
//! The ledger and order book run in memory. Postgres holds the catalog the
//! core boots from, and receives stock changes and order snapshots after
//! every change.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::domain::aggregates::{
    Address, CatalogVariant, InMemoryAddressBook, InMemoryCatalog, Offer, OfferKind, Order,
};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::{AddressId, Money, OfferId, VariantId};
use crate::{CoreError, Result};

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self { CoreError::Internal(format!("database: {e}")) }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct VariantRow {
    id: String,
    title: String,
    base_price: Decimal,
    offer_price: Option<Decimal>,
    stock_quantity: i32,
}

impl From<VariantRow> for CatalogVariant {
    fn from(row: VariantRow) -> Self {
        if row.stock_quantity < 0 {
            tracing::warn!(variant_id = %row.id, stock = row.stock_quantity, "Negative stock in storage, loading as 0");
        }
        Self {
            id: VariantId::new(row.id),
            title: row.title,
            base_price: Money::new(row.base_price),
            offer_price: row.offer_price.map(Money::new),
            stock_quantity: u32::try_from(row.stock_quantity).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct OfferRow {
    id: String,
    name: String,
    kind: String,
    discount_value: Decimal,
    buy_qty: Option<i32>,
    free_qty: Option<i32>,
    min_cart_amount: Option<Decimal>,
    eligible_variant_ids: Vec<String>,
    active: bool,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
}

fn parse_kind(kind: &str) -> OfferKind {
    serde_json::from_value(serde_json::Value::String(kind.trim().to_lowercase())).unwrap_or(OfferKind::Unsupported)
}

impl From<OfferRow> for Offer {
    fn from(row: OfferRow) -> Self {
        Self {
            id: OfferId::new(row.id),
            name: row.name,
            kind: parse_kind(&row.kind),
            discount_value: row.discount_value,
            // Negative counts fail validation later instead of wrapping.
            buy_qty: row.buy_qty.map(|q| u32::try_from(q).unwrap_or(0)),
            free_qty: row.free_qty.map(|q| u32::try_from(q).unwrap_or(0)),
            min_cart_amount: row.min_cart_amount.map(Money::new),
            eligible_variant_ids: row.eligible_variant_ids.into_iter().map(VariantId::new).collect(),
            active: row.active,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AddressRow {
    id: String,
    name: String,
    street1: String,
    street2: Option<String>,
    city: String,
    state: Option<String>,
    zip: String,
    country: String,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: AddressId::new(row.id), name: row.name, street1: row.street1, street2: row.street2,
            city: row.city, state: row.state, zip: row.zip, country: row.country,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow { payload: Json<Order> }

pub async fn connect(url: &str) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new().max_connections(10).connect(url).await.context("connecting to Postgres")?;
    sqlx::migrate!("./migrations").run(&db).await.context("running migrations")?;
    Ok(db)
}

/// Catalog, address book and stored orders the core boots from.
pub struct Snapshot {
    pub catalog: InMemoryCatalog,
    pub addresses: InMemoryAddressBook,
    pub orders: Vec<Order>,
}

pub async fn load_snapshot(db: &PgPool) -> anyhow::Result<Snapshot> {
    let variants = sqlx::query_as::<_, VariantRow>(
        "SELECT id, title, base_price, offer_price, stock_quantity FROM catalog_variants",
    ).fetch_all(db).await.context("loading variants")?;
    let offers = sqlx::query_as::<_, OfferRow>(
        "SELECT id, name, kind, discount_value, buy_qty, free_qty, min_cart_amount, eligible_variant_ids, active, valid_from, valid_until FROM offers",
    ).fetch_all(db).await.context("loading offers")?;
    let addresses = sqlx::query_as::<_, AddressRow>(
        "SELECT id, name, street1, street2, city, state, zip, country FROM addresses",
    ).fetch_all(db).await.context("loading addresses")?;
    let orders = sqlx::query_as::<_, OrderRow>("SELECT payload FROM orders ORDER BY created_at")
        .fetch_all(db).await.context("loading orders")?;

    let mut catalog = InMemoryCatalog::new();
    for row in variants {
        let variant = CatalogVariant::from(row);
        variant.validate().with_context(|| format!("variant {}", variant.id))?;
        catalog.insert_variant(variant);
    }
    for row in offers {
        let offer = Offer::from(row);
        if let Err(e) = offer.validate() {
            tracing::warn!(offer_id = %offer.id, error = %e, "Stored offer is invalid");
        }
        catalog.insert_offer(offer);
    }
    let addresses = addresses.into_iter().fold(InMemoryAddressBook::new(), |book, row| book.with_address(row.into()));
    let orders: Vec<Order> = orders.into_iter().map(|row| row.payload.0).collect();

    tracing::info!(orders = orders.len(), "Loaded snapshot from Postgres");
    Ok(Snapshot { catalog, addresses, orders })
}

/// Signed on-hand change per variant carried by ledger events, sorted by variant id.
///
/// Deltas commute, so write-backs from concurrent requests can land in any order.
pub fn stock_deltas(events: &[DomainEvent]) -> Vec<(VariantId, i64)> {
    let mut deltas: BTreeMap<VariantId, i64> = BTreeMap::new();
    for event in events {
        let (lines, sign) = match event {
            DomainEvent::Inventory(InventoryEvent::Decremented { lines, .. }) => (lines, -1),
            DomainEvent::Inventory(InventoryEvent::Incremented { lines, .. }) => (lines, 1),
            DomainEvent::Order(_) => continue,
        };
        for (variant_id, qty) in lines { *deltas.entry(variant_id.clone()).or_default() += sign * i64::from(*qty); }
    }
    deltas.into_iter().filter(|(_, d)| *d != 0).collect()
}

/// Applies stock deltas in one transaction.
pub async fn persist_stock(db: &PgPool, deltas: &[(VariantId, i64)]) -> Result<()> {
    if deltas.is_empty() { return Ok(()); }
    let mut tx = db.begin().await?;
    for (variant_id, delta) in deltas {
        let delta = i32::try_from(*delta).map_err(|_| CoreError::Internal(format!("stock change for {variant_id} exceeds storage range")))?;
        sqlx::query("UPDATE catalog_variants SET stock_quantity = stock_quantity + $2, updated_at = NOW() WHERE id = $1")
            .bind(variant_id.as_str()).bind(delta)
            .execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Upserts the order snapshot. Orders are never deleted.
pub async fn persist_order(db: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        "INSERT INTO orders (id, customer_id, status, version, payload, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
         ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, version = EXCLUDED.version, payload = EXCLUDED.payload, updated_at = NOW() \
         WHERE orders.version <= EXCLUDED.version",
    )
    .bind(order.id().as_uuid())
    .bind(order.customer_id())
    .bind(order.status().as_str())
    .bind(i64::try_from(order.version()).unwrap_or(i64::MAX))
    .bind(Json(order))
    .bind(order.created_at())
    .execute(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderEvent;
    use crate::domain::value_objects::{OperationToken, OrderId};
    use rust_decimal_macros::dec;

    fn offer_row(kind: &str) -> OfferRow {
        OfferRow {
            id: "O1".into(), name: "Bundle".into(), kind: kind.into(), discount_value: dec!(0),
            buy_qty: Some(2), free_qty: Some(1), min_cart_amount: None,
            eligible_variant_ids: vec!["V1".into()], active: true, valid_from: None, valid_until: None,
        }
    }

    #[test]
    fn test_offer_row_kind_parsing() {
        assert_eq!(Offer::from(offer_row("buy_x_get_y_free")).kind, OfferKind::BuyXGetYFree);
        assert_eq!(Offer::from(offer_row(" Cart_Fixed_Off ")).kind, OfferKind::CartFixedOff);
        assert_eq!(Offer::from(offer_row("loyalty_points")).kind, OfferKind::Unsupported);
    }

    #[test]
    fn test_offer_row_is_valid_bogo() {
        let offer = Offer::from(offer_row("buy_x_get_y_free"));
        assert!(offer.validate().is_ok());
        assert!(offer.eligible_variant_ids.contains(&VariantId::new("V1")));
    }

    #[test]
    fn test_stock_deltas_are_signed_and_merged() {
        let events = vec![
            DomainEvent::Inventory(InventoryEvent::Decremented {
                token: OperationToken::new("ship"), lines: vec![(VariantId::new("A"), 3), (VariantId::new("B"), 2)],
            }),
            DomainEvent::Order(OrderEvent::StockReturned { order_id: OrderId::generate(), lines: vec![(VariantId::new("A"), 1)], at: Utc::now() }),
            DomainEvent::Inventory(InventoryEvent::Incremented {
                token: OperationToken::new("return"), lines: vec![(VariantId::new("A"), 1), (VariantId::new("B"), 2)],
            }),
        ];
        assert_eq!(stock_deltas(&events), vec![(VariantId::new("A"), -2)]);
        assert!(stock_deltas(&[]).is_empty());
    }

    #[test]
    fn test_variant_row_clamps_negative_stock() {
        let row = VariantRow { id: "V1".into(), title: "Tee".into(), base_price: dec!(10), offer_price: None, stock_quantity: -3 };
        assert_eq!(CatalogVariant::from(row).stock_quantity, 0);
    }
}
