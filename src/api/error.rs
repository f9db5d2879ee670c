//! Result envelope and error mapping for the HTTP surface.
//!
//! Every response body has the same shape:
//!
//! ```json
//! { "success": true,  "data": { ... } }
//! { "success": false, "error": { "kind": "BUSINESS_RULE_VIOLATION", "message": "Coupon has expired" } }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{EngineError, ErrorKind};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data: Some(data), error: None })
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Please sign in first")]
    Unauthenticated,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Engine(EngineError::Validation(msg.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Unauthenticated => ErrorKind::Unauthenticated,
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFoundError => StatusCode::NOT_FOUND,
        ErrorKind::BusinessRuleViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ConflictError => StatusCode::CONFLICT,
        ErrorKind::SignatureInvalid | ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::TransientError => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match &self {
            ApiError::Engine(e) => {
                match kind {
                    ErrorKind::InternalError => tracing::error!(error = %e, "Internal error"),
                    ErrorKind::ConflictError | ErrorKind::TransientError => tracing::warn!(error = %e, "Retryable failure"),
                    _ => tracing::debug!(error = %e, "Request rejected"),
                }
                e.public_message()
            }
            other => other.to_string(),
        };

        let body = Json(ApiResponse::<()> { success: false, data: None, error: Some(ErrorBody { kind, message }) });
        (status_for(kind), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (EngineError::CouponExpired, StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::Conflict("dup".into()), StatusCode::CONFLICT),
            (EngineError::SignatureInvalid, StatusCode::UNAUTHORIZED),
            (EngineError::Transient("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(ApiError::Unauthenticated.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody { kind: ErrorKind::NotFoundError, message: "gone".into() }),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "error": { "kind": "NOT_FOUND_ERROR", "message": "gone" } }));
    }
}
