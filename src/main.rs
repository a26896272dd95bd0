use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod domain;
mod metrics;
mod store;
mod utils;

use api::AppState;
use config::AppConfig;
use domain::order::{OrderLifecycleService, OrderNumberGenerator};
use store::{
    InMemorySequenceStore, InMemoryStore, OrderStore, PostgresSequenceStore, PostgresStore,
    RedisSequenceStore, SequenceStore,
};
use utils::{retry_with_backoff, RetryConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_lifecycle=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order lifecycle engine");

    let config = AppConfig::from_env()?;

    // === 1. Storage ===
    let (store, sequences): (Arc<dyn OrderStore>, Arc<dyn SequenceStore>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let postgres = retry_with_backoff(RetryConfig::conservative(), |_| {
                PostgresStore::connect(url, config.database_max_connections, config.lock_timeout)
            })
            .await
            .into_result()?;
            postgres.ensure_schema().await?;

            let sequences: Arc<dyn SequenceStore> = Arc::new(PostgresSequenceStore::new(postgres.pool()));
            let store: Arc<dyn OrderStore> = Arc::new(postgres);
            (store, sequences)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store (state is lost on exit)");
            let store: Arc<dyn OrderStore> = Arc::new(InMemoryStore::new(config.lock_timeout));
            let sequences: Arc<dyn SequenceStore> = Arc::new(InMemorySequenceStore::new());
            (store, sequences)
        }
    };

    let sequences: Arc<dyn SequenceStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisSequenceStore::connect(url).await?),
        None => sequences,
    };

    // === 2. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Lifecycle service ===
    let numbers = OrderNumberGenerator::new(
        sequences,
        config.order_number_prefix.clone(),
        config.order_number_offset()?,
    );
    let service = Arc::new(OrderLifecycleService::new(
        store,
        numbers,
        metrics.clone(),
        config.retry.clone(),
        config.default_tax_rate,
    ));

    let state = web::Data::new(AppState { service, metrics });

    // === 4. HTTP server ===
    tracing::info!(
        "🌐 Listening on http://{}:{} (metrics at /metrics)",
        config.http_host,
        config.http_port
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind((config.http_host.as_str(), config.http_port))?
        .run()
        .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}
