use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::domain::order::{NewOrder, Order, OrderStatus, Outcome};
use super::dto::{
    CreateOrderRequest, PaymentRequest, RefundRequest, RestockRequest, SetStockRequest,
    StatusChangeRequest, UpdateItemsRequest,
};
use super::error::ApiError;
use super::AppState;

const ACTOR_HEADER: &str = "X-Actor";
const DEFAULT_ACTOR: &str = "admin";

fn actor(req: &HttpRequest) -> &str {
    req.headers()
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
}

/// Applied and no-op outcomes both answer with the current order
fn respond(outcome: Outcome<Order>, status: StatusCode) -> Result<HttpResponse, ApiError> {
    match outcome {
        Outcome::Applied(order) => Ok(HttpResponse::build(status).json(order)),
        Outcome::Unchanged(order) => Ok(HttpResponse::Ok().json(order)),
        Outcome::Rejected(rejection) => Err(rejection.into()),
    }
}

// ============================================================================
// Orders
// ============================================================================

pub async fn create_order(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    let new_order = NewOrder::from(body.into_inner());
    let outcome = state.service.create_order(&new_order, actor(&req)).await?;
    respond(outcome, StatusCode::CREATED)
}

pub async fn get_order(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let order = state.service.get_order(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

pub async fn change_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<StatusChangeRequest>,
) -> Result<HttpResponse, ApiError> {
    let order_id = path.into_inner();
    let StatusChangeRequest { status, note } = body.into_inner();
    let requested: OrderStatus = status.parse()?;

    tracing::debug!(order_id = %order_id, requested = %requested, "Status change requested");

    let outcome = state
        .service
        .change_status(order_id, requested, note.as_deref(), actor(&req))
        .await?;
    respond(outcome, StatusCode::OK)
}

pub async fn update_items(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<UpdateItemsRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .service
        .update_items(path.into_inner(), &body.items, actor(&req))
        .await?;
    respond(outcome, StatusCode::OK)
}

pub async fn refund(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: Option<web::Json<RefundRequest>>,
) -> Result<HttpResponse, ApiError> {
    let note = body.and_then(|body| body.into_inner().note);
    let outcome = state
        .service
        .refund(path.into_inner(), note.as_deref(), actor(&req))
        .await?;
    respond(outcome, StatusCode::OK)
}

pub async fn record_payment(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state
        .service
        .record_payment(path.into_inner(), body.outcome)
        .await?;
    respond(outcome, StatusCode::OK)
}

// ============================================================================
// Inventory
// ============================================================================

pub async fn get_inventory(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let product_id = path.into_inner();
    match state.service.get_inventory(product_id).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Err(ApiError::NotFound(format!("No inventory for product {product_id}"))),
    }
}

pub async fn set_stock(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<SetStockRequest>,
) -> Result<HttpResponse, ApiError> {
    let record = state
        .service
        .set_stock(path.into_inner(), body.available, body.threshold)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

pub async fn restock(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<RestockRequest>,
) -> Result<HttpResponse, ApiError> {
    let record = state.service.restock(path.into_inner(), body.quantity).await?;
    Ok(HttpResponse::Ok().json(record))
}

// ============================================================================
// Handler Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::domain::order::{OrderLifecycleService, OrderNumberGenerator, TaxRate};
    use crate::metrics::Metrics;
    use crate::store::{InMemorySequenceStore, InMemoryStore};
    use crate::utils::RetryConfig;
    use actix_web::{test, App};
    use chrono::FixedOffset;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> web::Data<AppState> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let numbers = OrderNumberGenerator::new(
            Arc::new(InMemorySequenceStore::new()),
            "DH",
            FixedOffset::east_opt(7 * 3600).unwrap(),
        );
        let service = OrderLifecycleService::new(
            Arc::new(InMemoryStore::new(Duration::from_secs(1))),
            numbers,
            metrics.clone(),
            RetryConfig::default(),
            TaxRate::ZERO,
        );
        web::Data::new(AppState {
            service: Arc::new(service),
            metrics,
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(configure)).await
        };
    }

    #[actix_web::test]
    async fn test_order_flow_over_http() {
        let state = state();
        let app = app!(state);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        for product in [a, b] {
            let req = test::TestRequest::put()
                .uri(&format!("/inventory/{product}"))
                .set_json(json!({ "available": 5, "threshold": 1 }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header(("X-Actor", "checkout"))
            .set_json(json!({
                "items": [
                    { "productId": a, "unitPrice": 100, "quantity": 2 },
                    { "productId": b, "unitPrice": 50, "quantity": 1 }
                ],
                "shippingFee": 10
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let order: Value = test::read_body_json(resp).await;
        assert_eq!(order["subtotal"], 250);
        assert_eq!(order["total"], 260);
        assert_eq!(order["status"], "pending");
        assert_eq!(order["timeline"][0]["triggeredBy"], "checkout");
        let order_id = order["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{order_id}/status"))
            .set_json(json!({ "status": "confirmed", "note": "Đã gọi xác nhận" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let order: Value = test::read_body_json(resp).await;
        assert_eq!(order["status"], "confirmed");
        assert_eq!(order["timeline"][1]["triggeredBy"], "admin");

        let req = test::TestRequest::get().uri(&format!("/inventory/{a}")).to_request();
        let record: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(record["available"], 3);
        assert_eq!(record["reserved"], 2);
    }

    #[actix_web::test]
    async fn test_guard_failures_are_400_with_details() {
        let state = state();
        let app = app!(state);
        let product = Uuid::new_v4();

        let req = test::TestRequest::put()
            .uri(&format!("/inventory/{product}"))
            .set_json(json!({ "available": 1 }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({
                "items": [{ "productId": product, "unitPrice": 100, "quantity": 3 }]
            }))
            .to_request();
        let order: Value = test::call_and_read_body_json(&app, req).await;
        let order_id = order["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{order_id}/status"))
            .set_json(json!({ "status": "confirmed" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({
                "error": "InsufficientStock",
                "productId": product,
                "requested": 3,
                "available": 1
            })
        );

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{order_id}/status"))
            .set_json(json!({ "status": "delivered" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "error": "InvalidTransition", "from": "pending", "to": "delivered" })
        );

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{order_id}/status"))
            .set_json(json!({ "status": "lost" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "UnknownStatus");
    }

    #[actix_web::test]
    async fn test_refund_through_status_endpoint_is_rejected() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({
                "items": [{ "productId": Uuid::new_v4(), "unitPrice": 100, "quantity": 1 }]
            }))
            .to_request();
        let order: Value = test::call_and_read_body_json(&app, req).await;
        let order_id = order["id"].as_str().unwrap().to_string();

        for status in ["cancelled", "refunded"] {
            let req = test::TestRequest::put()
                .uri(&format!("/orders/{order_id}/status"))
                .set_json(json!({ "status": status }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            if status == "cancelled" {
                assert_eq!(resp.status(), StatusCode::OK);
            } else {
                assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            }
        }

        let req = test::TestRequest::post()
            .uri(&format!("/orders/{order_id}/refund"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "NotRefundable");
    }

    #[actix_web::test]
    async fn test_missing_resources_are_404() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{}/status", Uuid::new_v4()))
            .set_json(json!({ "status": "confirmed" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri(&format!("/inventory/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_malformed_body_is_400() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({ "items": "none" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "InvalidBody");
    }

    #[actix_web::test]
    async fn test_restock_and_metrics() {
        let state = state();
        let app = app!(state);
        let product = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri(&format!("/inventory/{product}/restock"))
            .set_json(json!({ "quantity": 12 }))
            .to_request();
        let record: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(record["available"], 12);

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("inventory_operations_total"));

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
