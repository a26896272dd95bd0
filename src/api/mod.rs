// ============================================================================
// HTTP API - admin and checkout endpoints over the lifecycle service
// ============================================================================
//
// Routes:
//   POST /orders                       create (checkout)
//   GET  /orders/{id}                  read
//   PUT  /orders/{id}/status           status change (admin UI)
//   PUT  /orders/{id}/items            replace items of a pending order
//   POST /orders/{id}/refund           refund a cancelled/delivered order
//   POST /orders/{id}/payment          payment gateway callback
//   GET  /inventory/{productId}        stock levels
//   PUT  /inventory/{productId}        set stock levels (back-office)
//   POST /inventory/{productId}/restock
//   GET  /metrics, GET /health
//
// The acting user comes from the `X-Actor` header.
//
// ============================================================================

mod dto;
mod error;
mod handlers;

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::domain::order::OrderLifecycleService;
use crate::metrics::{health_handler, metrics_handler, Metrics};

/// Shared state handed to every handler
pub struct AppState {
    pub service: Arc<OrderLifecycleService>,
    pub metrics: Arc<Metrics>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(
            web::scope("/orders")
                .route("", web::post().to(handlers::create_order))
                .route("/{id}", web::get().to(handlers::get_order))
                .route("/{id}/status", web::put().to(handlers::change_status))
                .route("/{id}/items", web::put().to(handlers::update_items))
                .route("/{id}/refund", web::post().to(handlers::refund))
                .route("/{id}/payment", web::post().to(handlers::record_payment)),
        )
        .service(
            web::scope("/inventory")
                .route("/{product_id}", web::get().to(handlers::get_inventory))
                .route("/{product_id}", web::put().to(handlers::set_stock))
                .route("/{product_id}/restock", web::post().to(handlers::restock)),
        )
        .route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

/// Malformed JSON bodies get the same error shape as every other 400
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = serde_json::json!({
            "error": "InvalidBody",
            "message": err.to_string(),
        });
        actix_web::error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}
