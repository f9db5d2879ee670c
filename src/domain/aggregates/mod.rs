//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod coupon;

pub use product::{Product, ProductError, Variant};
pub use order::{
    Address, AppliedCoupon, NewOrder, Order, OrderError, OrderItem, OrderRecord, OrderStatus, PaymentStatus, Totals,
    Transition, VariantDetails,
};
pub use cart::{Cart, CartItem, CartOwner};
pub use coupon::{Coupon, CouponError, CouponKind};
