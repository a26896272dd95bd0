use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::domain::order::{LifecycleError, OrderError};

// ============================================================================
// API Errors
// ============================================================================
//
// 400  business-rule rejections and request validation
// 404  unknown order or product
// 409  lock/version conflict that outlived the internal retries
// 503  store unavailable after the internal retries
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(#[from] OrderError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("{0}")]
    NotFound(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Rejected(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::Lifecycle(LifecycleError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Lifecycle(LifecycleError::ConcurrentModification(_)) => StatusCode::CONFLICT,
            ApiError::Lifecycle(LifecycleError::PersistenceFailure(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Rejected(rejection) => rejection_body(rejection),
            ApiError::NotFound(message) => json!({ "error": "NotFound", "message": message }),
            ApiError::Lifecycle(error) => {
                let code = match error {
                    LifecycleError::NotFound(_) => "NotFound",
                    LifecycleError::ConcurrentModification(_) => "ConcurrentModification",
                    LifecycleError::PersistenceFailure(_) => "PersistenceFailure",
                };
                json!({ "error": code, "message": error.to_string() })
            }
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Guard failures carry the data the admin UI needs to show which rule
/// failed and, for stock, which product is short
fn rejection_body(rejection: &OrderError) -> serde_json::Value {
    match rejection {
        OrderError::InvalidTransition { from, to } => json!({
            "error": rejection.reason(),
            "from": from,
            "to": to,
        }),
        OrderError::InsufficientStock {
            product_id,
            requested,
            available,
        } => json!({
            "error": rejection.reason(),
            "productId": product_id,
            "requested": requested,
            "available": available,
        }),
        other => json!({
            "error": other.reason(),
            "message": other.to_string(),
        }),
    }
}
