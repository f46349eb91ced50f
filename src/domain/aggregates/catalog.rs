//! Catalog and address book as consumed by the core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::aggregates::offer::Offer;
use crate::domain::value_objects::{AddressId, Money, OfferId, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub id: VariantId,
    #[serde(default)]
    pub title: String,
    pub base_price: Money,
    /// Sale price shown by the storefront. Pricing is driven by offers, not by this field.
    #[serde(default)]
    pub offer_price: Option<Money>,
    pub stock_quantity: u32,
}

impl CatalogVariant {
    pub fn new(id: impl Into<String>, base_price: Money, stock_quantity: u32) -> Self {
        Self { id: VariantId::new(id), title: String::new(), base_price, offer_price: None, stock_quantity }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() { return Err(CoreError::validation("variant id is empty")); }
        if self.base_price.is_negative() {
            return Err(CoreError::validation(format!("variant {} has a negative base price", self.id)));
        }
        if self.offer_price.is_some_and(|p| p.is_negative()) {
            return Err(CoreError::validation(format!("variant {} has a negative offer price", self.id)));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub name: String,
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub zip: String,
    pub country: String,
}

/// Read-only view of variants and offers owned by the catalog collaborator.
pub trait Catalog: Send + Sync {
    fn variant(&self, id: &VariantId) -> Option<CatalogVariant>;
    fn offer(&self, id: &OfferId) -> Option<Offer>;
    fn variants(&self) -> Vec<CatalogVariant>;
}

pub trait AddressBook: Send + Sync {
    fn address(&self, id: &AddressId) -> Option<Address>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    variants: HashMap<VariantId, CatalogVariant>,
    offers: HashMap<OfferId, Offer>,
}

impl InMemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub fn with_variant(mut self, variant: CatalogVariant) -> Self { self.insert_variant(variant); self }
    pub fn with_offer(mut self, offer: Offer) -> Self { self.insert_offer(offer); self }

    pub fn insert_variant(&mut self, variant: CatalogVariant) { self.variants.insert(variant.id.clone(), variant); }
    pub fn insert_offer(&mut self, offer: Offer) { self.offers.insert(offer.id.clone(), offer); }
}

impl Catalog for InMemoryCatalog {
    fn variant(&self, id: &VariantId) -> Option<CatalogVariant> { self.variants.get(id).cloned() }
    fn offer(&self, id: &OfferId) -> Option<Offer> { self.offers.get(id).cloned() }
    fn variants(&self) -> Vec<CatalogVariant> { self.variants.values().cloned().collect() }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAddressBook { addresses: HashMap<AddressId, Address> }

impl InMemoryAddressBook {
    pub fn new() -> Self { Self::default() }
    pub fn with_address(mut self, address: Address) -> Self { self.insert(address); self }
    pub fn insert(&mut self, address: Address) { self.addresses.insert(address.id.clone(), address); }
}

impl AddressBook for InMemoryAddressBook {
    fn address(&self, id: &AddressId) -> Option<Address> { self.addresses.get(id).cloned() }
}

/// Catalog, offers and addresses loaded from a JSON seed file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub variants: Vec<CatalogVariant>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

impl CatalogSeed {
    pub fn into_parts(self) -> Result<(InMemoryCatalog, InMemoryAddressBook)> {
        let mut catalog = InMemoryCatalog::new();
        for variant in self.variants {
            variant.validate()?;
            catalog.insert_variant(variant);
        }
        for offer in self.offers {
            // Invalid offers are kept; pricing treats them as absent.
            if let Err(e) = offer.validate() {
                tracing::warn!(offer_id = %offer.id, error = %e, "Seeded offer is invalid");
            }
            catalog.insert_offer(offer);
        }
        let addresses = self.addresses.into_iter().fold(InMemoryAddressBook::new(), |book, a| book.with_address(a));
        Ok((catalog, addresses))
    }
}
