//! HTTP surface.

pub mod dto;
pub mod error;
pub mod extract;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::services::{CheckoutReceipt, ConfirmPayment, CouponQuote, FailPayment, MergeOutcome, Services};
use dto::{AbandonParams, CouponPreviewBody, CreateOrderBody};
use error::{ok, ApiResponse, ApiResult};
use extract::{ApiJson, CurrentUser, MaybeUser, SessionToken};

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-engine"})) }))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", delete(abandon_order))
        .route("/api/v1/payments/confirm", post(confirm_payment))
        .route("/api/v1/payments/failure", post(payment_failure))
        .route("/api/v1/coupons/validate", post(validate_coupon))
        .route("/api/v1/cart/merge", post(merge_cart))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

async fn create_order(
    State(s): State<Services>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<CreateOrderBody>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CheckoutReceipt>>)> {
    let request = body.into_request()?;
    let receipt = s.checkout.create_order(user, request).await?;
    Ok((StatusCode::CREATED, ok(receipt)))
}

async fn abandon_order(
    State(s): State<Services>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(params): Query<AbandonParams>,
) -> Reply<serde_json::Value> {
    s.checkout.abandon_order(user, id, params.payment_attempted).await?;
    Ok(ok(json!({ "orderId": id, "deleted": true })))
}

async fn confirm_payment(State(s): State<Services>, ApiJson(cmd): ApiJson<ConfirmPayment>) -> Reply<Order> {
    Ok(ok(s.payments.confirm(cmd).await?))
}

async fn payment_failure(State(s): State<Services>, MaybeUser(user): MaybeUser, ApiJson(cmd): ApiJson<FailPayment>) -> Reply<Order> {
    Ok(ok(s.payments.fail(user, cmd).await?))
}

async fn validate_coupon(State(s): State<Services>, ApiJson(body): ApiJson<CouponPreviewBody>) -> Reply<CouponQuote> {
    let subtotal = body.subtotal()?;
    Ok(ok(s.checkout.preview_coupon(&body.code, subtotal).await?))
}

async fn merge_cart(State(s): State<Services>, CurrentUser(user): CurrentUser, SessionToken(token): SessionToken) -> Reply<MergeOutcome> {
    Ok(ok(s.carts.merge(user, &token).await?))
}
