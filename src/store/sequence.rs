use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use sqlx::PgPool;

use super::StoreError;

// ============================================================================
// Sequence Stores - durable per-key counters for order numbers
// ============================================================================
//
// `next_value` increments and returns the counter for `key` atomically.
// The first call for a key returns 1. Increments are committed on their own
// and are never rolled back together with an order.
//
// ============================================================================

#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn next_value(&self, key: &str) -> Result<u64, StoreError>;
}

/// Process-local counters, for tests and database-less runs
#[derive(Default)]
pub struct InMemorySequenceStore {
    counters: DashMap<String, u64>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn next_value(&self, key: &str) -> Result<u64, StoreError> {
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

pub struct PostgresSequenceStore {
    pool: PgPool,
}

impl PostgresSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceStore for PostgresSequenceStore {
    async fn next_value(&self, key: &str) -> Result<u64, StoreError> {
        // Runs on the pool, never inside an order transaction
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO order_sequences (sequence_key, value) VALUES ($1, 1) \
             ON CONFLICT (sequence_key) DO UPDATE SET value = order_sequences.value + 1 \
             RETURNING value",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(value)
            .map_err(|_| StoreError::Corrupt(format!("negative sequence value {value} for {key}")))
    }
}

/// Daily keys are only needed for the day they name
const REDIS_KEY_TTL_SECS: i64 = 3 * 24 * 60 * 60;

pub struct RedisSequenceStore {
    connection: MultiplexedConnection,
}

impl RedisSequenceStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(redis_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)?;

        tracing::info!("✅ Connected to Redis for order number sequences");
        Ok(Self { connection })
    }
}

#[async_trait]
impl SequenceStore for RedisSequenceStore {
    async fn next_value(&self, key: &str) -> Result<u64, StoreError> {
        let redis_key = format!("order_sequence:{key}");
        let mut connection = self.connection.clone();

        let value: u64 = connection.incr(&redis_key, 1u64).await.map_err(redis_error)?;
        if value == 1 {
            let _: () = connection
                .expire(&redis_key, REDIS_KEY_TTL_SECS)
                .await
                .map_err(redis_error)?;
        }

        Ok(value)
    }
}

fn redis_error(error: redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("redis: {error}"))
}
