//! Test fixtures for integration tests.

use sqlx::PgPool;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

use flow_indexer::store::PostgresStore;

/// A test database instance with pool and container.
///
/// The container is kept alive as long as this struct exists. When dropped,
/// the container is automatically stopped.
pub struct TestDb {
    /// The connection pool to the test database.
    pub pool: PgPool,
    /// The `PostgresStore` wrapping the pool.
    pub store: PostgresStore,
    /// The container (kept alive for the duration of the test).
    _container: ContainerAsync<Postgres>,
}

impl TestDb {
    /// Start a fresh Postgres container, connect, and run all migrations.
    ///
    /// # Panics
    ///
    /// Panics if container startup, connection, or migrations fail.
    pub async fn new() -> Self {
        let container = Postgres::default().start().await.expect("failed to start postgres container");

        let host = container.get_host().await.expect("failed to get host");
        let port = container.get_host_port_ipv4(5432).await.expect("failed to get port");
        let connection_string = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = connect_with_retries(&connection_string, 30).await.expect("failed to connect to database");
        let store = PostgresStore::new(pool.clone());
        store.run_migrations().await.expect("failed to run migrations");

        Self { pool, store, _container: container }
    }
}

/// Connect to the database with retries; the container's "ready" log line
/// can land slightly before Postgres actually accepts connections.
async fn connect_with_retries(url: &str, max_attempts: u32) -> Result<PgPool, sqlx::Error> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match PgPool::connect(url).await {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => return Ok(pool),
                Err(e) if attempts < max_attempts => {
                    tracing::debug!("connection verify failed (attempt {attempts}): {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            },
            Err(e) if attempts < max_attempts => {
                tracing::debug!("connection failed (attempt {attempts}): {e}");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Builders for raw chain-data fixtures: blocks, transactions, and events.
pub mod chain_fixtures {
    use chrono::Utc;
    use serde_json::json;

    use flow_indexer::types::{Block, Event, EventKind, FlowAddress, FlowId, Height, Transaction, TransactionStatus};

    fn id_from_u64(tag: u8, value: u64) -> FlowId {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        FlowId::new(bytes)
    }

    /// A deterministic block id derived from its height, so fork
    /// divergence can be simulated by varying the tag byte.
    #[must_use]
    pub fn block_id(height: u64) -> FlowId {
        id_from_u64(1, height)
    }

    /// A deterministic, alternate-chain block id at the same height.
    #[must_use]
    pub fn forked_block_id(height: u64) -> FlowId {
        id_from_u64(2, height)
    }

    /// Build a block at `height` whose `id`/`parent_id` chain back to
    /// genesis via [`block_id`].
    #[must_use]
    pub fn block(height: u64) -> Block {
        let parent_id = if height == 0 { FlowId::ZERO } else { block_id(height - 1) };
        Block {
            id: block_id(height),
            height: Height::new(height),
            parent_id,
            timestamp: Utc::now(),
            collection_ids: Vec::new(),
            spork_id: "test-spork".to_string(),
        }
    }

    /// Build a single successful transaction sealed in `block`.
    #[must_use]
    pub fn transaction(block: &Block, index_in_block: u32) -> Transaction {
        Transaction {
            id: id_from_u64(3, block.height.value() * 1000 + u64::from(index_in_block)),
            block_id: block.id,
            block_height: block.height,
            collection_id: id_from_u64(4, block.height.value()),
            index_in_block,
            payer: FlowAddress::new([0x01; 8]),
            authorizers: vec![FlowAddress::new([0x01; 8])],
            status: TransactionStatus::Sealed,
            gas_used: 100,
        }
    }

    /// Build a `TokensDeposited` style event for `tx`.
    #[must_use]
    pub fn token_deposited_event(tx: &Transaction, event_index: u32, receiver: FlowAddress, amount: &str) -> Event {
        Event {
            tx_id: tx.id,
            block_height: tx.block_height,
            event_index,
            event_type: "A.1654653399040a61.FlowToken.TokensDeposited".to_string(),
            payload: json!({ "amount": amount, "to": receiver.to_hex() }),
            kind: EventKind::FungibleTokenTransfer,
        }
    }
}
