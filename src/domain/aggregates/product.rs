//! Product Aggregate
//!
//! Stock lives on the variants of a product. Only the inventory ledger mutates
//! it, and always while holding the product's row lock.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, Quantity, VariantWeight};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub variants: Vec<Variant>,
}

/// A purchasable SKU distinguished by weight. `in_stock` mirrors `stock_quantity > 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub weight: VariantWeight,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub stock_quantity: u32,
    pub in_stock: bool,
}

impl Variant {
    pub fn new(weight: VariantWeight, price: Money, stock_quantity: u32) -> Self {
        Self { weight, price, compare_at_price: None, stock_quantity, in_stock: stock_quantity > 0 }
    }

    pub fn can_fulfil(&self, quantity: Quantity) -> bool {
        self.in_stock && self.stock_quantity >= quantity.value()
    }

    fn set_stock(&mut self, stock: u32) {
        self.stock_quantity = stock;
        self.in_stock = stock > 0;
    }
}

impl Product {
    pub fn new(id: Uuid, name: impl Into<String>, variants: Vec<Variant>) -> Result<Self, ProductError> {
        let mut seen = std::collections::HashSet::new();
        if !variants.iter().all(|v| seen.insert(v.weight.clone())) {
            return Err(ProductError::DuplicateWeight);
        }
        Ok(Self { id, name: name.into(), image: None, variants })
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self { self.image = Some(image.into()); self }

    pub fn variant(&self, weight: &VariantWeight) -> Option<&Variant> {
        self.variants.iter().find(|v| &v.weight == weight)
    }

    /// Takes `quantity` units off the variant and returns the remaining stock.
    /// Stock never goes below zero.
    pub fn decrement_variant(&mut self, weight: &VariantWeight, quantity: Quantity) -> Result<u32, ProductError> {
        let variant = self.variants.iter_mut().find(|v| &v.weight == weight).ok_or(ProductError::VariantNotFound)?;
        if !variant.can_fulfil(quantity) { return Err(ProductError::InsufficientStock); }
        let remaining = variant.stock_quantity.saturating_sub(quantity.value());
        variant.set_stock(remaining);
        Ok(remaining)
    }

    pub fn restock_variant(&mut self, weight: &VariantWeight, quantity: Quantity) -> Result<u32, ProductError> {
        let variant = self.variants.iter_mut().find(|v| &v.weight == weight).ok_or(ProductError::VariantNotFound)?;
        let stock = variant.stock_quantity.saturating_add(quantity.value());
        variant.set_stock(stock);
        Ok(stock)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { DuplicateWeight, VariantNotFound, InsufficientStock }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateWeight => write!(f, "Duplicate variant weight"),
            Self::VariantNotFound => write!(f, "Variant not found"),
            Self::InsufficientStock => write!(f, "Insufficient stock"),
        }
    }
}
