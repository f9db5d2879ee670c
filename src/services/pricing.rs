//! Pricing & validation of a checkout request against live variant data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{OrderItem, Product, VariantDetails};
use crate::domain::value_objects::{Money, Quantity, VariantWeight};
use crate::{EngineError, Result};

/// One requested line: which variant and how many. Carries no price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub weight: VariantWeight,
    pub quantity: Quantity,
}

/// Snapshotted items and the subtotal computed from server-side prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder {
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
}

/// Prices `lines` from `products`.
///
/// Every missing product id is reported in a single `ProductsNotFound`. Stock
/// is checked against the total requested per variant, so two lines for the
/// same variant cannot together ask for more than is on hand.
pub fn price_order(lines: &[OrderLine], products: &[Product]) -> Result<PricedOrder> {
    if lines.is_empty() {
        return Err(EngineError::Validation("Order must contain at least one item".into()));
    }

    let by_id: HashMap<Uuid, &Product> = products.iter().map(|p| (p.id, p)).collect();
    let mut missing: Vec<Uuid> = Vec::new();
    for line in lines {
        if !by_id.contains_key(&line.product_id) && !missing.contains(&line.product_id) {
            missing.push(line.product_id);
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::ProductsNotFound(missing));
    }

    let mut requested: HashMap<(Uuid, &VariantWeight), u32> = HashMap::new();
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let product = by_id[&line.product_id];
        let variant = product.variant(&line.weight).ok_or_else(|| EngineError::VariantNotFound {
            product_id: product.id,
            weight: line.weight.clone(),
        })?;

        let wanted = requested.entry((product.id, &line.weight)).or_insert(0);
        *wanted = wanted.saturating_add(line.quantity.value());
        if !variant.in_stock || variant.stock_quantity < *wanted {
            return Err(EngineError::InsufficientStock { product: product.name.clone(), weight: line.weight.clone() });
        }

        items.push(OrderItem {
            product_id: product.id,
            name: product.name.clone(),
            variant_details: VariantDetails { weight: variant.weight.clone(), price: variant.price },
            quantity: line.quantity,
            image: product.image.clone(),
        });
    }

    let subtotal = items.iter().map(OrderItem::line_total).sum();
    Ok(PricedOrder { items, subtotal })
}

/// Flat shipping fee, waived once the pre-discount subtotal reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    pub free_threshold: Money,
}

impl ShippingPolicy {
    pub fn fee_for(&self, subtotal: Money) -> Money {
        if subtotal >= self.free_threshold { Money::ZERO } else { self.flat_fee }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::Variant;

    fn w(s: &str) -> VariantWeight { VariantWeight::new(s).unwrap() }

    fn almonds(stock: u32) -> Product {
        Product::new(Uuid::new_v4(), "Almonds", vec![
            Variant::new(w("500g"), Money::from_major(200), stock),
            Variant::new(w("1kg"), Money::from_major(380), 0),
        ]).unwrap().with_image("/img/almonds.jpg")
    }

    fn line(product: &Product, weight: &str, qty: u32) -> OrderLine {
        OrderLine { product_id: product.id, weight: w(weight), quantity: Quantity::new(qty).unwrap() }
    }

    #[test]
    fn test_prices_from_variant_not_client() {
        let p = almonds(5);
        let priced = price_order(&[line(&p, "500g", 2)], &[p.clone()]).unwrap();
        assert_eq!(priced.subtotal, Money::from_major(400));
        assert_eq!(priced.items[0].variant_details.price, Money::from_major(200));
        assert_eq!(priced.items[0].name, "Almonds");
        assert_eq!(priced.items[0].image.as_deref(), Some("/img/almonds.jpg"));
    }

    #[test]
    fn test_all_missing_products_reported() {
        let p = almonds(5);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let lines = vec![
            OrderLine { product_id: a, weight: w("500g"), quantity: Quantity::new(1).unwrap() },
            line(&p, "500g", 1),
            OrderLine { product_id: b, weight: w("500g"), quantity: Quantity::new(1).unwrap() },
            OrderLine { product_id: a, weight: w("1kg"), quantity: Quantity::new(1).unwrap() },
        ];
        assert_eq!(price_order(&lines, &[p]), Err(EngineError::ProductsNotFound(vec![a, b])));
    }

    #[test]
    fn test_variant_and_stock_checks() {
        let p = almonds(3);
        let products = [p.clone()];
        assert!(matches!(price_order(&[line(&p, "2kg", 1)], &products), Err(EngineError::VariantNotFound { .. })));
        assert!(matches!(price_order(&[line(&p, "1kg", 1)], &products), Err(EngineError::InsufficientStock { .. })));
        assert!(matches!(price_order(&[line(&p, "500g", 4)], &products), Err(EngineError::InsufficientStock { .. })));
        // Split across two lines
        let err = price_order(&[line(&p, "500g", 2), line(&p, "500g", 2)], &products).unwrap_err();
        assert_eq!(err, EngineError::InsufficientStock { product: "Almonds".into(), weight: w("500g") });
    }

    #[test]
    fn test_empty_order_rejected() {
        assert!(matches!(price_order(&[], &[]), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_free_shipping_threshold() {
        let policy = ShippingPolicy { flat_fee: Money::from_major(50), free_threshold: Money::from_major(500) };
        assert_eq!(policy.fee_for(Money::from_major(400)), Money::from_major(50));
        assert_eq!(policy.fee_for(Money::from_major(500)), Money::ZERO);
    }
}
