//! End-to-end flow through the HTTP router against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use storefront_engine::{
    api,
    config::{CheckoutSettings, PaymentSettings},
    domain::aggregates::{Cart, CartItem, CartOwner, Coupon, CouponKind, Product, Variant},
    domain::value_objects::{Money, Quantity, VariantWeight},
    gateway::{GatewayError, GatewayOrder, PaymentGateway, SignatureVerifier},
    publisher::LogPublisher,
    services::Services,
    store::MemoryStore,
};

const SECRET: &str = "flow_secret";

struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initiate(&self, amount: Money, currency: &str, receipt: &str) -> Result<GatewayOrder, GatewayError> {
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{receipt}"),
            public_key: "rzp_test_key".into(),
            amount_minor: amount.minor_units().map_err(|e| GatewayError::Rejected(e.to_string()))?,
            currency: currency.into(),
        })
    }
}

fn app(store: &MemoryStore) -> Router {
    let services = Services::new(
        Arc::new(store.clone()),
        Arc::new(StubGateway),
        Arc::new(LogPublisher),
        SignatureVerifier::new(SECRET),
        CheckoutSettings::default(),
        PaymentSettings::default(),
    );
    api::router(services)
}

async fn seed(store: &MemoryStore) -> Product {
    let product = Product::new(
        Uuid::new_v4(),
        "Kashmiri Walnuts",
        vec![Variant::new(VariantWeight::new("500g").unwrap(), Money::from_major(200), 5)],
    )
    .unwrap();
    store.insert_product(product.clone()).await;
    store
        .insert_coupon(Coupon {
            id: Uuid::new_v4(),
            code: "WELCOME".into(),
            kind: CouponKind::Flat,
            value: Decimal::from(25),
            min_order_value: None,
            max_discount: None,
            is_active: true,
            expires_at: None,
            global_usage_limit: Some(100),
            total_used: 0,
            per_user_limit: None,
        })
        .await;
    product
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header("x-user-id", user.to_string());
    }
    let req = match body {
        Some(b) => req.header("content-type", "application/json").body(Body::from(b.to_string())).unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn order_body(product: &Product, quantity: u32, coupon: Option<&str>) -> Value {
    json!({
        "items": [{ "productId": product.id, "variantWeight": "500g", "quantity": quantity }],
        "shippingAddress": {
            "name": "Meera Iyer", "street1": "4 Residency Road", "city": "Chennai",
            "zip": "600001", "country": "IN"
        },
        "couponCode": coupon
    })
}

#[tokio::test]
async fn test_checkout_then_confirm() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);
    let user = Uuid::new_v4();

    let (status, body) = send(&app, "POST", "/api/v1/orders", Some(user), Some(order_body(&product, 2, Some("WELCOME")))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["success"], json!(true));
    let data = &body["data"];
    assert_eq!(data["total"], json!("425.00"));
    assert_eq!(data["paymentStatus"], json!("PENDING"));
    assert_eq!(data["amountMinor"], json!(42_500));
    let gateway_order_id = data["gatewayOrderId"].as_str().unwrap().to_string();

    let signature = SignatureVerifier::new(SECRET).sign(&gateway_order_id, "pay_A1").unwrap();
    let confirm = json!({ "gatewayOrderId": gateway_order_id, "paymentId": "pay_A1", "signature": signature });
    let (status, body) = send(&app, "POST", "/api/v1/payments/confirm", None, Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["paymentStatus"], json!("SUCCESS"));

    // Redelivery
    let (status, _) = send(&app, "POST", "/api/v1/payments/confirm", None, Some(confirm)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.product(product.id).await.unwrap().variants[0].stock_quantity, 3);
    assert_eq!(store.coupon("WELCOME").await.unwrap().total_used, 1);

    // Paid orders cannot be abandoned
    let order_id = data["orderId"].as_str().unwrap();
    let (status, body) = send(&app, "DELETE", &format!("/api/v1/orders/{order_id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], json!("BUSINESS_RULE_VIOLATION"));
}

#[tokio::test]
async fn test_forged_signature_rejected() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);

    let (_, body) = send(&app, "POST", "/api/v1/orders", Some(Uuid::new_v4()), Some(order_body(&product, 1, None))).await;
    let gateway_order_id = body["data"]["gatewayOrderId"].as_str().unwrap().to_string();

    let forged = json!({ "gatewayOrderId": gateway_order_id, "paymentId": "pay_X", "signature": "00ff" });
    let (status, body) = send(&app, "POST", "/api/v1/payments/confirm", None, Some(forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], json!("SIGNATURE_INVALID"));
}

#[tokio::test]
async fn test_abandon_pending_order() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);
    let user = Uuid::new_v4();

    let (_, body) = send(&app, "POST", "/api/v1/orders", Some(user), Some(order_body(&product, 2, None))).await;
    let order_id = body["data"]["orderId"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/orders/{order_id}?paymentAttempted=true"), Some(user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "DELETE", &format!("/api/v1/orders/{order_id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(store.orders().await.is_empty());
    assert_eq!(store.product(product.id).await.unwrap().variants[0].stock_quantity, 5);
}

#[tokio::test]
async fn test_request_errors_use_envelope() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);

    let (status, body) = send(&app, "POST", "/api/v1/orders", None, Some(order_body(&product, 1, None))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));

    let (status, body) = send(&app, "POST", "/api/v1/orders", Some(Uuid::new_v4()), Some(order_body(&product, 6, None))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["message"], json!("Insufficient stock for Kashmiri Walnuts (500g)"));

    let missing = Product::new(Uuid::new_v4(), "Ghost", vec![]).unwrap();
    let (status, body) = send(&app, "POST", "/api/v1/orders", Some(Uuid::new_v4()), Some(order_body(&missing, 1, None))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], json!("NOT_FOUND_ERROR"));

    let (status, _) = send(&app, "POST", "/api/v1/orders", Some(Uuid::new_v4()), Some(json!({ "items": "nope" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_coupon_preview_and_cart_merge() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);

    let (status, body) = send(&app, "POST", "/api/v1/coupons/validate", None, Some(json!({ "code": "welcome", "subtotal": "100" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["discount"], json!("25.00"));

    let mut guest = Cart::for_session("guest-token");
    guest.add_item(CartItem { product_id: product.id, weight: VariantWeight::new("500g").unwrap(), quantity: Quantity::new(2).unwrap() });
    store.insert_cart(guest).await;
    let user = Uuid::new_v4();

    for expected in [1, 0] {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/cart/merge")
            .header("x-user-id", user.to_string())
            .header("x-session-token", "guest-token")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["data"]["mergedLines"], json!(expected));
    }
    let cart = store.cart_of(&CartOwner::User(user)).await.unwrap();
    assert_eq!(cart.items()[0].quantity.value(), 2);
}

#[tokio::test]
async fn test_failure_callback_requires_owner_or_signature() {
    let store = MemoryStore::new();
    let product = seed(&store).await;
    let app = app(&store);
    let user = Uuid::new_v4();

    let (_, body) = send(&app, "POST", "/api/v1/orders", Some(user), Some(order_body(&product, 1, None))).await;
    let order_id = body["data"]["orderId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "POST", "/api/v1/payments/failure", None, Some(json!({ "orderId": order_id }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], json!("SIGNATURE_INVALID"));

    let (status, _) = send(&app, "POST", "/api/v1/payments/failure", Some(Uuid::new_v4()), Some(json!({ "orderId": order_id }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/v1/payments/failure", Some(user), Some(json!({ "orderId": order_id }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["paymentStatus"], json!("FAILED"));

    let signature = SignatureVerifier::new(SECRET).sign_failure(&order_id).unwrap();
    let (status, body) = send(&app, "POST", "/api/v1/payments/failure", None, Some(json!({ "orderId": order_id, "signature": signature }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["paymentStatus"], json!("FAILED"));
}
