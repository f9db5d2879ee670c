//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Quantity, VariantWeight};

/// A cart belongs to a signed-in user or to an anonymous session, never both.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    id: Uuid,
    owner: CartOwner,
    items: Vec<CartItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub weight: VariantWeight,
    pub quantity: Quantity,
}

impl Cart {
    pub fn new(owner: CartOwner) -> Self {
        let now = Utc::now();
        Self { id: Uuid::now_v7(), owner, items: vec![], created_at: now, updated_at: now }
    }

    pub fn for_user(user_id: Uuid) -> Self { Self::new(CartOwner::User(user_id)) }
    pub fn for_session(token: impl Into<String>) -> Self { Self::new(CartOwner::Session(token.into())) }

    pub fn restore(id: Uuid, owner: CartOwner, items: Vec<CartItem>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self { id, owner, items, created_at, updated_at }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn owner(&self) -> &CartOwner { &self.owner }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Lines are unique per `(product_id, weight)`; adding an existing line sums quantities,
    /// capped at [`Quantity::MAX`].
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id && i.weight == item.weight) {
            existing.quantity = existing.quantity.add(item.quantity);
        } else {
            self.items.push(item);
        }
        self.updated_at = Utc::now();
    }

    /// Folds every line of `guest` into this cart and returns how many lines were merged.
    pub fn absorb(&mut self, guest: &Cart) -> usize {
        for item in guest.items() { self.add_item(item.clone()); }
        guest.item_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, weight: &str, qty: u32) -> CartItem {
        CartItem { product_id, weight: VariantWeight::new(weight).unwrap(), quantity: Quantity::new(qty).unwrap() }
    }

    #[test]
    fn test_cart_operations() {
        let p1 = Uuid::new_v4();
        let mut cart = Cart::for_session("tok");
        cart.add_item(line(p1, "500g", 2));
        cart.add_item(line(p1, "250g", 1));
        cart.add_item(line(p1, "500g", 1));
        assert_eq!(cart.item_count(), 2);
        assert_eq!(cart.items()[0].quantity.value(), 3); // Merged
    }

    #[test]
    fn test_absorb_sums_matching_lines() {
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut guest = Cart::for_session("tok");
        guest.add_item(line(p1, "500g", 2));
        guest.add_item(line(p2, "1kg", 1));
        let mut user = Cart::for_user(Uuid::new_v4());
        user.add_item(line(p1, "500g", 1));
        assert_eq!(user.absorb(&guest), 2);
        assert_eq!(user.item_count(), 2);
        assert_eq!(user.items()[0].quantity.value(), 3);
        assert_eq!(user.items()[1].quantity.value(), 1);
    }
}
