//! REST client for a hosted-checkout orders API (`POST {base}/orders`,
//! HTTP basic auth with the key id and secret, amounts in minor units).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use super::{GatewayError, GatewayOrder, PaymentGateway};
use crate::domain::value_objects::Money;

pub struct HttpGateway {
    client: reqwest::Client,
    api_base: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(api_base: impl Into<String>, key_id: impl Into<String>, key_secret: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Malformed(format!("client setup: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initiate(&self, amount: Money, currency: &str, receipt: &str) -> Result<GatewayOrder, GatewayError> {
        let amount_minor = amount.minor_units().map_err(|e| GatewayError::Rejected(e.to_string()))?;
        let resp = self.client
            .post(format!("{}/orders", self.api_base))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({ "amount": amount_minor, "currency": currency, "receipt": receipt }))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Unavailable(format!("status {status}")));
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !status.is_success() {
            let reason = body["error"]["description"].as_str().unwrap_or("no description");
            return Err(GatewayError::Rejected(format!("status {status}: {reason}")));
        }

        let gateway_order_id = body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| GatewayError::Malformed(format!("order response without id: {body}")))?;
        tracing::debug!(gateway_order_id = %gateway_order_id, receipt, amount_minor, "Gateway order created");

        Ok(GatewayOrder { gateway_order_id, public_key: self.key_id.clone(), amount_minor, currency: currency.to_string() })
    }
}
