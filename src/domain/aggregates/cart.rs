//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::catalog::{Catalog, CatalogVariant};
use crate::domain::value_objects::{OfferId, SessionId, VariantId};
use crate::{CoreError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    session_id: SessionId,
    lines: Vec<CartLine>,
    offer_id: Option<OfferId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// A cart line resolved against the catalog at pricing time.
#[derive(Clone, Debug)]
pub struct SnapshotLine {
    pub variant: CatalogVariant,
    pub quantity: u32,
}

impl Cart {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self { session_id, lines: vec![], offer_id: None, created_at: now, updated_at: now }
    }

    pub fn session_id(&self) -> &SessionId { &self.session_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn offer_id(&self) -> Option<&OfferId> { self.offer_id.as_ref() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn line_count(&self) -> usize { self.lines.len() }

    pub fn add_item(&mut self, variant_id: VariantId, quantity: u32) -> Result<()> {
        if quantity == 0 { return Err(CoreError::validation("quantity must be at least 1")); }
        if let Some(existing) = self.lines.iter_mut().find(|l| l.variant_id == variant_id) {
            existing.quantity = existing.quantity.checked_add(quantity)
                .ok_or_else(|| CoreError::validation("quantity overflow"))?;
        } else {
            self.lines.push(CartLine { variant_id, quantity });
        }
        self.touch();
        Ok(())
    }

    /// Sets an absolute quantity; zero removes the line.
    pub fn update_quantity(&mut self, variant_id: &VariantId, quantity: u32) -> Result<()> {
        let line = self.lines.iter_mut().find(|l| &l.variant_id == variant_id)
            .ok_or_else(|| CoreError::not_found("cart line", variant_id))?;
        if quantity == 0 { self.lines.retain(|l| &l.variant_id != variant_id); }
        else { line.quantity = quantity; }
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, variant_id: &VariantId) -> Result<()> {
        let before = self.lines.len();
        self.lines.retain(|l| &l.variant_id != variant_id);
        if self.lines.len() == before { return Err(CoreError::not_found("cart line", variant_id)); }
        self.touch();
        Ok(())
    }

    pub fn set_offer(&mut self, offer_id: Option<OfferId>) { self.offer_id = offer_id; self.touch(); }

    pub fn clear(&mut self) { self.lines.clear(); self.offer_id = None; self.touch(); }

    /// Resolves every line against the catalog; an unknown variant is `NotFound`.
    pub fn snapshot(&self, catalog: &dyn Catalog) -> Result<Vec<SnapshotLine>> {
        self.lines.iter().map(|line| {
            let variant = catalog.variant(&line.variant_id)
                .ok_or_else(|| CoreError::not_found("variant", &line.variant_id))?;
            Ok(SnapshotLine { variant, quantity: line.quantity })
        }).collect()
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
