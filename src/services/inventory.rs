//! Inventory ledger: the only writer of variant stock.

use uuid::Uuid;

use crate::domain::aggregates::{OrderItem, Product, ProductError};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::VariantWeight;
use crate::services::pricing::OrderLine;
use crate::store::StoreTx;
use crate::{EngineError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryLedger;

impl InventoryLedger {
    /// Takes every line's quantity off `products`, which must have been loaded
    /// with `products_for_update` in the same transaction, and writes each
    /// touched product's variant list back.
    pub async fn decrement(&self, tx: &mut dyn StoreTx, products: &mut [Product], lines: &[OrderLine]) -> Result<Vec<DomainEvent>> {
        let mut events = Vec::with_capacity(lines.len());
        let mut touched: Vec<Uuid> = Vec::new();

        for line in lines {
            let product = products
                .iter_mut()
                .find(|p| p.id == line.product_id)
                .ok_or_else(|| EngineError::ProductsNotFound(vec![line.product_id]))?;
            let remaining = product
                .decrement_variant(&line.weight, line.quantity)
                .map_err(|e| stock_error(product, &line.weight, e))?;
            if !touched.contains(&product.id) { touched.push(product.id); }
            events.push(DomainEvent::Inventory(InventoryEvent::StockDecremented {
                product_id: product.id,
                weight: line.weight.clone(),
                quantity: line.quantity.value(),
                remaining,
            }));
        }

        for product in products.iter().filter(|p| touched.contains(&p.id)) {
            tx.save_variants(product).await?;
        }
        Ok(events)
    }

    /// Puts the quantities of `items` back on their variants. Products or
    /// variants removed from the catalog since the order was placed are skipped.
    pub async fn release(&self, tx: &mut dyn StoreTx, items: &[OrderItem]) -> Result<Vec<DomainEvent>> {
        let mut ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        ids.sort();
        ids.dedup();
        let mut products = tx.products_for_update(&ids).await?;

        let mut events = Vec::with_capacity(items.len());
        let mut touched: Vec<Uuid> = Vec::new();
        for item in items {
            let weight = &item.variant_details.weight;
            let Some(product) = products.iter_mut().find(|p| p.id == item.product_id) else {
                tracing::warn!(product_id = %item.product_id, "Product gone, stock not restored");
                continue;
            };
            if product.restock_variant(weight, item.quantity).is_err() {
                tracing::warn!(product_id = %item.product_id, weight = %weight, "Variant gone, stock not restored");
                continue;
            }
            if !touched.contains(&product.id) { touched.push(product.id); }
            events.push(DomainEvent::Inventory(InventoryEvent::StockReleased {
                product_id: product.id,
                weight: weight.clone(),
                quantity: item.quantity.value(),
            }));
        }

        for product in products.iter().filter(|p| touched.contains(&p.id)) {
            tx.save_variants(product).await?;
        }
        Ok(events)
    }
}

fn stock_error(product: &Product, weight: &VariantWeight, e: ProductError) -> EngineError {
    match e {
        ProductError::VariantNotFound => EngineError::VariantNotFound { product_id: product.id, weight: weight.clone() },
        ProductError::InsufficientStock | ProductError::DuplicateWeight => {
            EngineError::InsufficientStock { product: product.name.clone(), weight: weight.clone() }
        }
    }
}

/// Total units across `items`.
pub(crate) fn units(items: &[OrderItem]) -> u32 {
    items.iter().map(|i| i.quantity.value()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Variant, VariantDetails};
    use crate::domain::value_objects::{Money, Quantity};
    use crate::store::{MemoryStore, Store};

    fn w(s: &str) -> VariantWeight { VariantWeight::new(s).unwrap() }

    fn product(stock: u32) -> Product {
        Product::new(Uuid::new_v4(), "Walnuts", vec![Variant::new(w("250g"), Money::from_major(150), stock)]).unwrap()
    }

    #[tokio::test]
    async fn test_decrement_to_zero_flips_in_stock() {
        let store = MemoryStore::new();
        let p = product(2);
        store.insert_product(p.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut products = tx.products_for_update(&[p.id]).await.unwrap();
        let lines = [OrderLine { product_id: p.id, weight: w("250g"), quantity: Quantity::new(2).unwrap() }];
        let events = InventoryLedger.decrement(tx.as_mut(), &mut products, &lines).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(events.len(), 1);
        let v = store.product(p.id).await.unwrap().variants[0].clone();
        assert_eq!(v.stock_quantity, 0);
        assert!(!v.in_stock);
    }

    #[tokio::test]
    async fn test_decrement_beyond_stock_fails() {
        let store = MemoryStore::new();
        let p = product(1);
        store.insert_product(p.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut products = tx.products_for_update(&[p.id]).await.unwrap();
        let lines = [OrderLine { product_id: p.id, weight: w("250g"), quantity: Quantity::new(2).unwrap() }];
        let err = InventoryLedger.decrement(tx.as_mut(), &mut products, &lines).await.unwrap_err();
        assert_eq!(err, EngineError::InsufficientStock { product: "Walnuts".into(), weight: w("250g") });
    }

    #[tokio::test]
    async fn test_release_restores_stock() {
        let store = MemoryStore::new();
        let p = product(0);
        store.insert_product(p.clone()).await;
        let items = vec![
            OrderItem {
                product_id: p.id, name: p.name.clone(),
                variant_details: VariantDetails { weight: w("250g"), price: Money::from_major(150) },
                quantity: Quantity::new(3).unwrap(), image: None,
            },
            OrderItem {
                product_id: Uuid::new_v4(), name: "Discontinued".into(),
                variant_details: VariantDetails { weight: w("1kg"), price: Money::from_major(10) },
                quantity: Quantity::new(1).unwrap(), image: None,
            },
        ];

        let mut tx = store.begin().await.unwrap();
        let events = InventoryLedger.release(tx.as_mut(), &items).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(units(&items), 4);
        let v = store.product(p.id).await.unwrap().variants[0].clone();
        assert_eq!(v.stock_quantity, 3);
        assert!(v.in_stock);
    }
}
