//! Aggregates module
pub mod catalog;
pub mod offer;
pub mod cart;
pub mod order;

pub use catalog::{Address, AddressBook, Catalog, CatalogSeed, CatalogVariant, InMemoryAddressBook, InMemoryCatalog};
pub use offer::{Offer, OfferKind};
pub use cart::{Cart, CartLine, SnapshotLine};
pub use order::{InventoryEffect, Order, OrderLine, OrderPricing, OrderStatus, PaymentMode, PaymentStatus, StatusTransition, StockReturnRecord, TransitionPlan};
