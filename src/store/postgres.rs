//! PostgreSQL store.
//!
//! Row locks are taken with `SELECT ... FOR UPDATE` inside the transaction
//! and held until commit. Unique violations, serialization failures and
//! deadlocks surface as [`StoreError::Conflict`] so callers can retry.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{
    Address, AppliedCoupon, Cart, CartItem, CartOwner, Coupon, CouponKind, Order, OrderItem, OrderRecord, OrderStatus,
    PaymentStatus, Product, Totals, Variant, VariantDetails,
};
use crate::domain::value_objects::{Money, OrderNumber, Quantity, VariantWeight};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // unique_violation, serialization_failure, deadlock_detected
            if matches!(db.code().as_deref(), Some("23505" | "40001" | "40P01")) {
                return StoreError::Conflict(db.message().to_string());
            }
        }
        StoreError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(PgTx { tx: self.pool.begin().await? }))
    }

    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 AND is_active"))
            .bind(code).fetch_optional(&self.pool).await?;
        row.map(CouponRow::into_coupon).transpose()
    }
}

struct PgTx { tx: Transaction<'static, Postgres> }

const COUPON_COLUMNS: &str = "id, code, kind, value, min_order_value, max_discount, is_active, expires_at, global_usage_limit, total_used, per_user_limit";
const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, subtotal, discount, tax_amount, shipping_fee, total, coupon_id, coupon_code, shipping_address, billing_address, gateway_order_id, payment_id, created_at, updated_at";
const CART_COLUMNS: &str = "id, user_id, session_id, created_at, updated_at";

fn count(value: i32, what: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {what}: {value}")))
}

fn weight(value: String) -> StoreResult<VariantWeight> {
    VariantWeight::new(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn quantity(value: i32) -> StoreResult<Quantity> {
    Quantity::new(count(value, "quantity")?).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[derive(FromRow)]
struct ProductRow { id: Uuid, name: String, image: Option<String> }

#[derive(FromRow)]
struct VariantRow {
    product_id: Uuid,
    weight: String,
    price: Decimal,
    compare_at_price: Option<Decimal>,
    stock_quantity: i32,
    in_stock: bool,
}

#[derive(FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    kind: String,
    value: Decimal,
    min_order_value: Option<Decimal>,
    max_discount: Option<Decimal>,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    global_usage_limit: Option<i32>,
    total_used: i32,
    per_user_limit: Option<i32>,
}

impl CouponRow {
    fn into_coupon(self) -> StoreResult<Coupon> {
        Ok(Coupon {
            id: self.id,
            kind: CouponKind::parse(&self.kind).ok_or_else(|| StoreError::Corrupt(format!("coupon kind {}", self.kind)))?,
            code: self.code,
            value: self.value,
            min_order_value: self.min_order_value.map(Money::new),
            max_discount: self.max_discount.map(Money::new),
            is_active: self.is_active,
            expires_at: self.expires_at,
            global_usage_limit: self.global_usage_limit.map(|v| count(v, "usage limit")).transpose()?,
            total_used: count(self.total_used, "total_used")?,
            per_user_limit: self.per_user_limit.map(|v| count(v, "per user limit")).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    status: String,
    payment_status: String,
    subtotal: Decimal,
    discount: Decimal,
    tax_amount: Decimal,
    shipping_fee: Decimal,
    total: Decimal,
    coupon_id: Option<Uuid>,
    coupon_code: Option<String>,
    shipping_address: Json<Address>,
    billing_address: Option<Json<Address>>,
    gateway_order_id: Option<String>,
    payment_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_record(self) -> StoreResult<OrderRecord> {
        let coupon = match (self.coupon_id, self.coupon_code) {
            (Some(coupon_id), Some(code)) => Some(AppliedCoupon { coupon_id, code }),
            _ => None,
        };
        Ok(OrderRecord {
            id: self.id,
            order_number: OrderNumber::parse(&self.order_number)
                .ok_or_else(|| StoreError::Corrupt(format!("order number {}", self.order_number)))?,
            user_id: self.user_id,
            status: OrderStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt(format!("order status {}", self.status)))?,
            payment_status: PaymentStatus::parse(&self.payment_status)
                .ok_or_else(|| StoreError::Corrupt(format!("payment status {}", self.payment_status)))?,
            totals: Totals {
                subtotal: Money::new(self.subtotal),
                discount: Money::new(self.discount),
                tax_amount: Money::new(self.tax_amount),
                shipping_fee: Money::new(self.shipping_fee),
                total: Money::new(self.total),
            },
            coupon,
            shipping_address: self.shipping_address.0,
            billing_address: self.billing_address.map(|a| a.0),
            gateway_order_id: self.gateway_order_id,
            payment_id: self.payment_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRow { product_id: Uuid, name: String, weight: String, price: Decimal, quantity: i32, image: Option<String> }

#[derive(FromRow)]
struct CartRow { id: Uuid, user_id: Option<Uuid>, session_id: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(FromRow)]
struct CartItemRow { product_id: Uuid, weight: String, quantity: i32 }

impl PgTx {
    async fn load_order(&mut self, row: OrderRow) -> StoreResult<Order> {
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT product_id, name, weight, price, quantity, image FROM order_items WHERE order_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(|i| -> StoreResult<OrderItem> { Ok(OrderItem {
            product_id: i.product_id,
            name: i.name,
            variant_details: VariantDetails { weight: weight(i.weight)?, price: Money::new(i.price) },
            quantity: quantity(i.quantity)?,
            image: i.image,
        }) })
        .collect::<StoreResult<Vec<_>>>()?;
        Ok(Order::restore(row.into_record()?, items))
    }

    async fn load_orders(&mut self, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows { orders.push(self.load_order(row).await?); }
        Ok(orders)
    }

    async fn load_cart(&mut self, row: CartRow) -> StoreResult<Cart> {
        let owner = match (row.user_id, row.session_id) {
            (Some(user_id), None) => CartOwner::User(user_id),
            (None, Some(token)) => CartOwner::Session(token),
            _ => return Err(StoreError::Corrupt(format!("cart {} has ambiguous owner", row.id))),
        };
        let items = sqlx::query_as::<_, CartItemRow>(
            "SELECT product_id, weight, quantity FROM cart_items WHERE cart_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(|i| -> StoreResult<CartItem> { Ok(CartItem { product_id: i.product_id, weight: weight(i.weight)?, quantity: quantity(i.quantity)? }) })
        .collect::<StoreResult<Vec<_>>>()?;
        Ok(Cart::restore(row.id, owner, items, row.created_at, row.updated_at))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn products_for_update(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, name, image FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids[..])
            .fetch_all(&mut *self.tx)
            .await?;
        let variants = sqlx::query_as::<_, VariantRow>(
            "SELECT product_id, weight, price, compare_at_price, stock_quantity, in_stock FROM product_variants \
             WHERE product_id = ANY($1) ORDER BY product_id, position FOR UPDATE",
        )
        .bind(&ids[..])
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|row| -> StoreResult<Product> {
                let variants = variants.iter()
                    .filter(|v| v.product_id == row.id)
                    .map(|v| -> StoreResult<Variant> { Ok(Variant {
                        weight: weight(v.weight.clone())?,
                        price: Money::new(v.price),
                        compare_at_price: v.compare_at_price.map(Money::new),
                        stock_quantity: count(v.stock_quantity, "stock")?,
                        in_stock: v.in_stock,
                    }) })
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(Product { id: row.id, name: row.name, image: row.image, variants })
            })
            .collect()
    }

    async fn save_variants(&mut self, product: &Product) -> StoreResult<()> {
        for (position, v) in product.variants.iter().enumerate() {
            let stock = i32::try_from(v.stock_quantity).map_err(|_| StoreError::Corrupt(format!("stock {}", v.stock_quantity)))?;
            sqlx::query(
                "UPDATE product_variants SET stock_quantity = $3, in_stock = $4, position = $5 WHERE product_id = $1 AND weight = $2",
            )
            .bind(product.id)
            .bind(v.weight.as_str())
            .bind(stock)
            .bind(v.in_stock)
            .bind(position as i32)
            .execute(&mut *self.tx)
            .await?;
        }
        sqlx::query("UPDATE products SET updated_at = NOW() WHERE id = $1").bind(product.id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn coupon_for_update(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 AND is_active FOR UPDATE"))
            .bind(code).fetch_optional(&mut *self.tx).await?;
        row.map(CouponRow::into_coupon).transpose()
    }

    async fn coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid) -> StoreResult<u32> {
        let used: Option<i32> = sqlx::query_scalar("SELECT used_count FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2 FOR UPDATE")
            .bind(coupon_id).bind(user_id).fetch_optional(&mut *self.tx).await?;
        count(used.unwrap_or(0), "used_count")
    }

    async fn adjust_coupon_usage(&mut self, coupon_id: Uuid, user_id: Uuid, delta: i32) -> StoreResult<()> {
        sqlx::query("UPDATE coupons SET total_used = GREATEST(total_used + $2, 0) WHERE id = $1")
            .bind(coupon_id).bind(delta).execute(&mut *self.tx).await?;
        sqlx::query(
            "INSERT INTO coupon_usages (coupon_id, user_id, used_count) VALUES ($1, $2, GREATEST($3, 0)) \
             ON CONFLICT (coupon_id, user_id) DO UPDATE SET used_count = GREATEST(coupon_usages.used_count + $3, 0)",
        )
        .bind(coupon_id).bind(user_id).bind(delta)
        .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn next_order_sequence(&mut self, day: NaiveDate) -> StoreResult<u32> {
        // EXCLUDED.last_value is one past the highest number already used that day
        let next: i32 = sqlx::query_scalar(
            "INSERT INTO order_sequences (day, last_value) \
             VALUES ($1, (SELECT COALESCE(MAX(split_part(order_number, '-', 3)::int), 0) FROM orders \
                          WHERE order_number LIKE $2) + 1) \
             ON CONFLICT (day) DO UPDATE SET last_value = GREATEST(order_sequences.last_value + 1, EXCLUDED.last_value) \
             RETURNING last_value",
        )
        .bind(day)
        .bind(format!("{}%", OrderNumber::day_prefix(day)))
        .fetch_one(&mut *self.tx)
        .await?;
        count(next, "sequence")
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let t = order.totals();
        sqlx::query(
            "INSERT INTO orders (id, order_number, user_id, status, payment_status, subtotal, discount, tax_amount, shipping_fee, total, \
             coupon_id, coupon_code, shipping_address, billing_address, gateway_order_id, payment_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(order.id())
        .bind(order.order_number().as_str())
        .bind(order.user_id())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(t.subtotal.amount())
        .bind(t.discount.amount())
        .bind(t.tax_amount.amount())
        .bind(t.shipping_fee.amount())
        .bind(t.total.amount())
        .bind(order.coupon().map(|c| c.coupon_id))
        .bind(order.coupon().map(|c| c.code.clone()))
        .bind(Json(order.shipping_address()))
        .bind(order.billing_address().map(Json))
        .bind(order.gateway_order_id())
        .bind(order.payment_id())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, position, product_id, name, weight, price, quantity, image) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(order.id())
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.variant_details.weight.as_str())
            .bind(item.variant_details.price.amount())
            .bind(item.quantity.value() as i32)
            .bind(&item.image)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn order_for_update(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
            .bind(id).fetch_optional(&mut *self.tx).await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn order_by_gateway_id_for_update(&mut self, gateway_order_id: &str) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE gateway_order_id = $1 FOR UPDATE"))
            .bind(gateway_order_id).fetch_optional(&mut *self.tx).await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_order_payment(&mut self, order: &Order) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, gateway_order_id = $4, payment_id = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(order.id())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.gateway_order_id())
        .bind(order.payment_id())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;
        if done.rows_affected() != 1 {
            return Err(StoreError::Backend(format!("order {} vanished", order.id())));
        }
        Ok(())
    }

    async fn delete_pending_order(&mut self, id: Uuid) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM orders WHERE id = $1 AND payment_status = 'PENDING' AND status = 'PENDING'")
            .bind(id).execute(&mut *self.tx).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn stale_pending_orders(&mut self, cutoff: DateTime<Utc>, limit: u32) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_status = 'PENDING' AND status = 'PENDING' AND created_at < $1 \
             ORDER BY created_at LIMIT $2 FOR UPDATE SKIP LOCKED"
        ))
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await?;
        self.load_orders(rows).await
    }

    async fn claim_payment_event(&mut self, event_id: &str, order_id: Uuid, kind: &str) -> StoreResult<bool> {
        let done = sqlx::query("INSERT INTO payment_events (event_id, order_id, kind) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING")
            .bind(event_id).bind(order_id).bind(kind)
            .execute(&mut *self.tx).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn session_cart_for_update(&mut self, token: &str) -> StoreResult<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE session_id = $1 FOR UPDATE"))
            .bind(token).fetch_optional(&mut *self.tx).await?;
        match row {
            Some(row) => Ok(Some(self.load_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn user_cart_for_update(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 FOR UPDATE"))
            .bind(user_id).fetch_optional(&mut *self.tx).await?;
        match row {
            Some(row) => Ok(Some(self.load_cart(row).await?)),
            None => Ok(None),
        }
    }

    async fn save_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        let (user_id, session_id) = match cart.owner() {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Session(token) => (None, Some(token.as_str())),
        };
        sqlx::query(
            "INSERT INTO carts (id, user_id, session_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET updated_at = EXCLUDED.updated_at",
        )
        .bind(cart.id()).bind(user_id).bind(session_id).bind(cart.created_at()).bind(cart.updated_at())
        .execute(&mut *self.tx).await?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart.id()).execute(&mut *self.tx).await?;
        for (position, item) in cart.items().iter().enumerate() {
            sqlx::query("INSERT INTO cart_items (cart_id, product_id, weight, quantity, position) VALUES ($1, $2, $3, $4, $5)")
                .bind(cart.id())
                .bind(item.product_id)
                .bind(item.weight.as_str())
                .bind(item.quantity.value() as i32)
                .bind(position as i32)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn delete_cart(&mut self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM carts WHERE id = $1").bind(id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
