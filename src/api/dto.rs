//! Wire shapes of request bodies and their conversion into service commands.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::error::ApiError;
use crate::domain::aggregates::Address;
use crate::domain::value_objects::{Money, Quantity, VariantWeight};
use crate::services::{CreateOrderRequest, OrderLine};

fn invalid(e: ValidationErrors) -> ApiError {
    ApiError::validation(format!("Invalid request: {e}"))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    #[validate(length(min = 1, max = 50, message = "order must contain between 1 and 50 items"))]
    pub items: Vec<OrderLineBody>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    #[validate(length(max = 40))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineBody {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub variant_weight: String,
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

impl CreateOrderBody {
    pub fn into_request(self) -> Result<CreateOrderRequest, ApiError> {
        self.validate().map_err(invalid)?;
        self.shipping_address.validate().map_err(invalid)?;
        if let Some(billing) = &self.billing_address {
            billing.validate().map_err(invalid)?;
        }

        let items = self
            .items
            .into_iter()
            .map(|line| {
                line.validate().map_err(invalid)?;
                Ok(OrderLine {
                    product_id: line.product_id,
                    weight: VariantWeight::new(line.variant_weight).map_err(|e| ApiError::validation(e.to_string()))?,
                    quantity: Quantity::new(line.quantity).map_err(|e| ApiError::validation(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        Ok(CreateOrderRequest {
            items,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            coupon_code: self.coupon_code,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonParams {
    #[serde(default)]
    pub payment_attempted: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CouponPreviewBody {
    #[validate(length(min = 1, max = 40))]
    pub code: String,
    pub subtotal: Decimal,
}

impl CouponPreviewBody {
    pub fn subtotal(&self) -> Result<Money, ApiError> {
        self.validate().map_err(invalid)?;
        if self.subtotal.is_sign_negative() {
            return Err(ApiError::validation("subtotal must not be negative"));
        }
        Ok(Money::new(self.subtotal))
    }
}
