//! PostgreSQL implementation of store ports using SQLx.
//!
//! Raw and Phase 1 tables are range-partitioned by `height`/`block_height`
//! (see `migrations/`), not TimescaleDB hypertables. Phase 2 tables are
//! plain current-state tables with height-guarded upserts.
//!
//! # Type Conversions
//!
//! PostgreSQL uses signed integers for numeric columns while the domain
//! uses unsigned newtypes. These casts are safe because:
//! - Heights won't exceed i64::MAX (~9 quintillion)
//! - Event/tx indices within a block won't exceed i32::MAX
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::use_self
)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, postgres::PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{InfraError, Result};
use crate::ports::{CheckpointStore, DerivedStore, ErrorLogStore, LeaseStore, RawStore};
use crate::types::{
    AccountCatalogEntry, AccountKeyEvent, AddressTxIndexEntry, Block, BlockIdIndexEntry,
    Checkpoint, Collection, DailyBalanceAggregate, DefiEvent, ErrorEntry, Event, EventKind,
    EvmTxMapping, ExecutionResult, FlowAddress, FlowId, FtHolding, Height, Lease, LeaseStatus,
    NftOwnership, ScriptBody, StakingEvent, TokenAmount, TokenTransfer, Transaction,
    TransactionStatus, TxIdIndexEntry, TxMetrics, TxTag,
};

// ═══════════════════════════════════════════════════════════════════════════════
// POSTGRES STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-based store implementation.
///
/// Implements all storage port traits (`CheckpointStore`, `LeaseStore`,
/// `ErrorLogStore`, `RawStore`, `DerivedStore`) using SQLx for database
/// access.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Internal(format!("Migration error: {e}")))?;
        Ok(())
    }
}

fn flow_id(bytes: &[u8]) -> std::result::Result<FlowId, InfraError> {
    FlowId::from_slice(bytes).map_err(|e| InfraError::Internal(format!("corrupt flow id: {e}")))
}

fn flow_address(bytes: &[u8]) -> std::result::Result<FlowAddress, InfraError> {
    FlowAddress::from_slice(bytes)
        .map_err(|e| InfraError::Internal(format!("corrupt flow address: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct CheckpointRow {
    name: String,
    height: i64,
    updated_at: DateTime<Utc>,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(r: CheckpointRow) -> Self {
        Self {
            name: r.name,
            height: Height::new(r.height as u64),
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl CheckpointStore for PostgresStore {
    #[instrument(skip(self), fields(name = name))]
    async fn get(&self, name: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT name, height, updated_at FROM checkpoints WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(name = name, height = height.value()))]
    async fn set(&self, name: &str, height: Height) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO checkpoints (name, height, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE SET height = EXCLUDED.height, updated_at = now()
            ",
        )
        .bind(name)
        .bind(height.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        debug!("Checkpoint set");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT name, height, updated_at FROM checkpoints ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct LeaseRow {
    id: Uuid,
    queue: String,
    item_key: String,
    worker_id: String,
    status: LeaseStatus,
    attempt: i32,
    expires_at: DateTime<Utc>,
    acquired_at: DateTime<Utc>,
}

impl From<LeaseRow> for Lease {
    fn from(r: LeaseRow) -> Self {
        Self {
            id: r.id,
            queue: r.queue,
            item_key: r.item_key,
            worker_id: r.worker_id,
            status: r.status,
            attempt: r.attempt as u32,
            expires_at: r.expires_at,
            acquired_at: r.acquired_at,
        }
    }
}

#[async_trait]
impl LeaseStore for PostgresStore {
    #[instrument(skip(self), fields(queue = queue, item_key = item_key, worker_id = worker_id))]
    async fn acquire(
        &self,
        queue: &str,
        item_key: &str,
        worker_id: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<Lease>> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + ttl;

        let row = sqlx::query_as::<_, LeaseRow>(
            r"
            INSERT INTO leases (id, queue, item_key, worker_id, status, attempt, expires_at, acquired_at)
            VALUES ($1, $2, $3, $4, 'Active', 1, $5, $6)
            ON CONFLICT (queue, item_key) DO UPDATE SET
                worker_id = EXCLUDED.worker_id,
                status = 'Active',
                attempt = leases.attempt + 1,
                expires_at = EXCLUDED.expires_at,
                acquired_at = EXCLUDED.acquired_at
            WHERE leases.status IN ('Failed', 'Expired', 'Done')
            RETURNING id, queue, item_key, worker_id, status, attempt, expires_at, acquired_at
            ",
        )
        .bind(id)
        .bind(queue)
        .bind(item_key)
        .bind(worker_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(id = %id, worker_id = worker_id))]
    async fn renew(&self, id: Uuid, worker_id: &str, ttl: chrono::Duration) -> Result<()> {
        let expires_at = Utc::now() + ttl;

        let result = sqlx::query(
            r"
            UPDATE leases SET expires_at = $1
            WHERE id = $2 AND worker_id = $3 AND status = 'Active'
            ",
        )
        .bind(expires_at)
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        if result.rows_affected() == 0 {
            return Err(InfraError::NotFound.into());
        }

        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn release(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE leases SET status = 'Done' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        debug!("Lease released");
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE leases SET status = 'Failed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        debug!("Lease marked failed");
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn mark_dead_letter(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE leases SET status = 'DeadLettered' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        debug!("Lease dead-lettered");
        Ok(())
    }

    #[instrument(skip(self), fields(queue = queue, limit = limit))]
    async fn reap_expired(&self, queue: &str, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>> {
        let rows = sqlx::query_as::<_, LeaseRow>(
            r"
            UPDATE leases SET status = 'Failed'
            WHERE id IN (
                SELECT id FROM leases
                WHERE queue = $1 AND status = 'Active' AND expires_at < $2
                ORDER BY expires_at ASC
                LIMIT $3
            )
            RETURNING id, queue, item_key, worker_id, status, attempt, expires_at, acquired_at
            ",
        )
        .bind(queue)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(queue = queue, limit = limit))]
    async fn list_completed(&self, queue: &str, limit: u32) -> Result<Vec<Lease>> {
        let rows = sqlx::query_as::<_, LeaseRow>(
            r"
            SELECT id, queue, item_key, worker_id, status, attempt, expires_at, acquired_at
            FROM leases
            WHERE queue = $1 AND status = 'Done'
            ORDER BY acquired_at ASC
            LIMIT $2
            ",
        )
        .bind(queue)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(queue = queue))]
    async fn list_dead_lettered(&self, queue: &str) -> Result<Vec<Lease>> {
        let rows = sqlx::query_as::<_, LeaseRow>(
            r"
            SELECT id, queue, item_key, worker_id, status, attempt, expires_at, acquired_at
            FROM leases
            WHERE queue = $1 AND status = 'DeadLettered'
            ORDER BY acquired_at ASC
            ",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn fail_all_active(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE leases SET status = 'Failed' WHERE status = 'Active'")
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        debug!(count = result.rows_affected(), "Failed all active leases for rollback");
        Ok(result.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR LOG STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ErrorLogStore for PostgresStore {
    #[instrument(skip(self, entry), fields(source = %entry.source, from = entry.from_height.value(), to = entry.to_height.value()))]
    async fn record(&self, entry: &ErrorEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO error_log (id, source, from_height, to_height, message, attempt, created_at, last_attempt_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source, from_height, to_height) DO UPDATE SET
                message = EXCLUDED.message,
                attempt = error_log.attempt + 1,
                last_attempt_at = EXCLUDED.last_attempt_at
            ",
        )
        .bind(entry.id)
        .bind(&entry.source)
        .bind(entry.from_height.value() as i64)
        .bind(entry.to_height.value() as i64)
        .bind(&entry.message)
        .bind(entry.attempt as i32)
        .bind(entry.created_at)
        .bind(entry.last_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }

    #[instrument(skip(self), fields(source = source, limit = limit))]
    async fn list_for_source(&self, source: &str, limit: u32) -> Result<Vec<ErrorEntry>> {
        let rows = sqlx::query_as::<_, ErrorEntryRow>(
            r"
            SELECT id, source, from_height, to_height, message, attempt, created_at, last_attempt_at
            FROM error_log
            WHERE source = $1
            ORDER BY last_attempt_at DESC
            LIMIT $2
            ",
        )
        .bind(source)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, FromRow)]
struct ErrorEntryRow {
    id: Uuid,
    source: String,
    from_height: i64,
    to_height: i64,
    message: String,
    attempt: i32,
    created_at: DateTime<Utc>,
    last_attempt_at: DateTime<Utc>,
}

impl From<ErrorEntryRow> for ErrorEntry {
    fn from(r: ErrorEntryRow) -> Self {
        Self {
            id: r.id,
            source: r.source,
            from_height: Height::new(r.from_height as u64),
            to_height: Height::new(r.to_height as u64),
            message: r.message,
            attempt: r.attempt as u32,
            created_at: r.created_at,
            last_attempt_at: r.last_attempt_at,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct BlockRow {
    id: Vec<u8>,
    height: i64,
    parent_id: Vec<u8>,
    timestamp: DateTime<Utc>,
    collection_ids: Vec<Vec<u8>>,
    spork_id: String,
}

impl TryFrom<BlockRow> for Block {
    type Error = InfraError;

    fn try_from(r: BlockRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: flow_id(&r.id)?,
            height: Height::new(r.height as u64),
            parent_id: flow_id(&r.parent_id)?,
            timestamp: r.timestamp,
            collection_ids: r
                .collection_ids
                .iter()
                .map(|b| flow_id(b))
                .collect::<std::result::Result<_, _>>()?,
            spork_id: r.spork_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Vec<u8>,
    block_id: Vec<u8>,
    block_height: i64,
    collection_id: Vec<u8>,
    index_in_block: i32,
    payer: Vec<u8>,
    authorizers: Vec<Vec<u8>>,
    status: String,
    error_message: Option<String>,
    gas_used: i64,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = InfraError;

    fn try_from(r: TransactionRow) -> std::result::Result<Self, Self::Error> {
        let status = match (r.status.as_str(), r.error_message) {
            ("sealed", _) => TransactionStatus::Sealed,
            ("failed", Some(error_message)) => TransactionStatus::Failed { error_message },
            ("failed", None) => TransactionStatus::Failed {
                error_message: String::new(),
            },
            _ => TransactionStatus::Pending,
        };

        Ok(Self {
            id: flow_id(&r.id)?,
            block_id: flow_id(&r.block_id)?,
            block_height: Height::new(r.block_height as u64),
            collection_id: flow_id(&r.collection_id)?,
            index_in_block: r.index_in_block as u32,
            payer: flow_address(&r.payer)?,
            authorizers: r
                .authorizers
                .iter()
                .map(|b| flow_address(b))
                .collect::<std::result::Result<_, _>>()?,
            status,
            gas_used: r.gas_used as u64,
        })
    }
}

fn status_columns(status: &TransactionStatus) -> (&'static str, Option<&str>) {
    match status {
        TransactionStatus::Sealed => ("sealed", None),
        TransactionStatus::Failed { error_message } => ("failed", Some(error_message.as_str())),
        TransactionStatus::Pending => ("pending", None),
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    tx_id: Vec<u8>,
    block_height: i64,
    event_index: i32,
    event_type: String,
    payload: serde_json::Value,
    kind: EventKind,
}

impl TryFrom<EventRow> for Event {
    type Error = InfraError;

    fn try_from(r: EventRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            tx_id: flow_id(&r.tx_id)?,
            block_height: Height::new(r.block_height as u64),
            event_index: r.event_index as u32,
            event_type: r.event_type,
            payload: r.payload,
            kind: r.kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct BlockIdIndexRow {
    height: i64,
    block_id: Vec<u8>,
}

impl TryFrom<BlockIdIndexRow> for BlockIdIndexEntry {
    type Error = InfraError;

    fn try_from(r: BlockIdIndexRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            height: Height::new(r.height as u64),
            block_id: flow_id(&r.block_id)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct TxIdIndexRow {
    tx_id: Vec<u8>,
    block_height: i64,
}

impl TryFrom<TxIdIndexRow> for TxIdIndexEntry {
    type Error = InfraError;

    fn try_from(r: TxIdIndexRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            tx_id: flow_id(&r.tx_id)?,
            block_height: Height::new(r.block_height as u64),
        })
    }
}

#[async_trait]
impl RawStore for PostgresStore {
    #[instrument(skip_all, fields(height = block.height.value(), tx_count = transactions.len(), event_count = events.len()))]
    async fn insert_block(
        &self,
        block: &Block,
        transactions: &[Transaction],
        events: &[Event],
        execution_result: Option<&ExecutionResult>,
        collections: &[Collection],
        scripts: &[ScriptBody],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        sqlx::query(
            r"
            INSERT INTO blocks (id, height, parent_id, timestamp, collection_ids, spork_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (height) DO UPDATE SET
                id = EXCLUDED.id,
                parent_id = EXCLUDED.parent_id,
                timestamp = EXCLUDED.timestamp,
                collection_ids = EXCLUDED.collection_ids,
                spork_id = EXCLUDED.spork_id
            ",
        )
        .bind(block.id.as_slice())
        .bind(block.height.value() as i64)
        .bind(block.parent_id.as_slice())
        .bind(block.timestamp)
        .bind(
            block
                .collection_ids
                .iter()
                .map(FlowId::as_slice)
                .map(<[u8]>::to_vec)
                .collect::<Vec<_>>(),
        )
        .bind(&block.spork_id)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        sqlx::query(
            "INSERT INTO block_id_index (height, block_id) VALUES ($1, $2) ON CONFLICT (height) DO UPDATE SET block_id = EXCLUDED.block_id",
        )
        .bind(block.height.value() as i64)
        .bind(block.id.as_slice())
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        for t in transactions {
            let (status, error_message) = status_columns(&t.status);
            sqlx::query(
                r"
                INSERT INTO transactions
                    (id, block_id, block_height, collection_id, index_in_block, payer, authorizers, status, error_message, gas_used)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(t.id.as_slice())
            .bind(t.block_id.as_slice())
            .bind(t.block_height.value() as i64)
            .bind(t.collection_id.as_slice())
            .bind(t.index_in_block as i32)
            .bind(t.payer.as_slice())
            .bind(
                t.authorizers
                    .iter()
                    .map(FlowAddress::as_slice)
                    .map(<[u8]>::to_vec)
                    .collect::<Vec<_>>(),
            )
            .bind(status)
            .bind(error_message)
            .bind(t.gas_used as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;

            sqlx::query(
                "INSERT INTO tx_id_index (tx_id, block_height) VALUES ($1, $2) ON CONFLICT (tx_id) DO NOTHING",
            )
            .bind(t.id.as_slice())
            .bind(t.block_height.value() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        for e in events {
            sqlx::query(
                r"
                INSERT INTO events (tx_id, block_height, event_index, event_type, payload, kind)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tx_id, event_index) DO NOTHING
                ",
            )
            .bind(e.tx_id.as_slice())
            .bind(e.block_height.value() as i64)
            .bind(e.event_index as i32)
            .bind(&e.event_type)
            .bind(&e.payload)
            .bind(e.kind)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        if let Some(result) = execution_result {
            sqlx::query(
                r"
                INSERT INTO execution_results (block_id, previous_result_id, block_state_commitment)
                VALUES ($1, $2, $3)
                ON CONFLICT (block_id) DO UPDATE SET
                    previous_result_id = EXCLUDED.previous_result_id,
                    block_state_commitment = EXCLUDED.block_state_commitment
                ",
            )
            .bind(result.block_id.as_slice())
            .bind(result.previous_result_id.as_slice())
            .bind(&result.block_state_commitment)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        for c in collections {
            sqlx::query(
                "INSERT INTO collections (id, transaction_ids) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            )
            .bind(c.id.as_slice())
            .bind(
                c.transaction_ids
                    .iter()
                    .map(FlowId::as_slice)
                    .map(<[u8]>::to_vec)
                    .collect::<Vec<_>>(),
            )
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        for s in scripts {
            sqlx::query(
                "INSERT INTO scripts (tx_id, script, arguments) VALUES ($1, $2, $3) ON CONFLICT (tx_id) DO NOTHING",
            )
            .bind(s.tx_id.as_slice())
            .bind(&s.script)
            .bind(&s.arguments)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }

        tx.commit().await.map_err(InfraError::Database)?;

        debug!("Block ingested");
        Ok(())
    }

    #[instrument(skip(self), fields(height = height.value()))]
    async fn get_block(&self, height: Height) -> Result<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT id, height, parent_id, timestamp, collection_ids, spork_id FROM blocks WHERE height = $1",
        )
        .bind(height.value() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(from = from.value(), to = to.value()))]
    async fn get_events_in_range(&self, from: Height, to: Height) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r"
            SELECT tx_id, block_height, event_index, event_type, payload, kind
            FROM events
            WHERE block_height BETWEEN $1 AND $2
            ORDER BY block_height ASC, event_index ASC
            ",
        )
        .bind(from.value() as i64)
        .bind(to.value() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(from = from.value(), to = to.value()))]
    async fn get_transactions_in_range(&self, from: Height, to: Height) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r"
            SELECT id, block_id, block_height, collection_id, index_in_block, payer, authorizers, status, error_message, gas_used
            FROM transactions
            WHERE block_height BETWEEN $1 AND $2
            ORDER BY block_height ASC, index_in_block ASC
            ",
        )
        .bind(from.value() as i64)
        .bind(to.value() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn highest_ingested_height(&self) -> Result<Height> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(height) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        Ok(max.map_or(Height::ZERO, |h| Height::new(h as u64)))
    }

    #[instrument(skip(self))]
    async fn lowest_ingested_height(&self) -> Result<Option<Height>> {
        let min: Option<i64> = sqlx::query_scalar("SELECT MIN(height) FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        Ok(min.map(|h| Height::new(h as u64)))
    }

    #[instrument(skip(self), fields(from = from.value(), to = to.value()))]
    async fn find_height_gaps(&self, from: Height, to: Height) -> Result<Vec<(Height, Height)>> {
        // Window-function scan: compare each stored height against the next
        // one and surface pairs where the step is greater than one.
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r"
            WITH ordered AS (
                SELECT height, LEAD(height) OVER (ORDER BY height) AS next_height
                FROM blocks
                WHERE height BETWEEN $1 AND $2
            )
            SELECT height + 1 AS gap_start, next_height - 1 AS gap_end
            FROM ordered
            WHERE next_height IS NOT NULL AND next_height > height + 1
            ORDER BY height ASC
            ",
        )
        .bind(from.value() as i64)
        .bind(to.value() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(rows
            .into_iter()
            .map(|(start, end)| (Height::new(start as u64), Height::new(end as u64)))
            .collect())
    }

    #[instrument(skip(self), fields(height = height.value()))]
    async fn block_id_at_height(&self, height: Height) -> Result<Option<BlockIdIndexEntry>> {
        let row = sqlx::query_as::<_, BlockIdIndexRow>(
            "SELECT height, block_id FROM block_id_index WHERE height = $1",
        )
        .bind(height.value() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tx_id = %tx_id))]
    async fn tx_index_entry(&self, tx_id: FlowId) -> Result<Option<TxIdIndexEntry>> {
        let row = sqlx::query_as::<_, TxIdIndexRow>(
            "SELECT tx_id, block_height FROM tx_id_index WHERE tx_id = $1",
        )
        .bind(tx_id.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(height = height.value()))]
    async fn delete_above_height(&self, height: Height) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let h = height.value() as i64;

        let mut total = 0u64;

        for table in ["blocks", "block_id_index", "transactions", "tx_id_index", "events"] {
            let column = if table == "blocks" || table == "block_id_index" {
                "height"
            } else {
                "block_height"
            };
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE {column} > $1"))
                .bind(h)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            total += result.rows_affected();
        }

        tx.commit().await.map_err(InfraError::Database)?;

        debug!(rows_deleted = total, "Rolled back raw store above height");
        Ok(total)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DERIVED STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct FtHoldingRow {
    address: Vec<u8>,
    token_type: String,
    balance: sqlx::types::BigDecimal,
    as_of_height: i64,
}

impl TryFrom<FtHoldingRow> for FtHolding {
    type Error = InfraError;

    fn try_from(r: FtHoldingRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            address: flow_address(&r.address)?,
            token_type: r.token_type,
            balance: TokenAmount::from_bigdecimal(&r.balance),
            as_of_height: Height::new(r.as_of_height as u64),
        })
    }
}

#[derive(Debug, FromRow)]
struct NftOwnershipRow {
    collection_type: String,
    token_id: i64,
    owner: Option<Vec<u8>>,
    as_of_height: i64,
}

impl TryFrom<NftOwnershipRow> for NftOwnership {
    type Error = InfraError;

    fn try_from(r: NftOwnershipRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            collection_type: r.collection_type,
            token_id: r.token_id as u64,
            owner: r.owner.as_deref().map(flow_address).transpose()?,
            as_of_height: Height::new(r.as_of_height as u64),
        })
    }
}

#[derive(Debug, FromRow)]
struct AddressTxIndexRow {
    address: Vec<u8>,
    tx_id: Vec<u8>,
    block_height: i64,
}

impl TryFrom<AddressTxIndexRow> for AddressTxIndexEntry {
    type Error = InfraError;

    fn try_from(r: AddressTxIndexRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            address: flow_address(&r.address)?,
            tx_id: flow_id(&r.tx_id)?,
            block_height: Height::new(r.block_height as u64),
        })
    }
}

#[async_trait]
impl DerivedStore for PostgresStore {
    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_token_transfers(&self, rows: &[TokenTransfer]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO token_transfers
                    (tx_id, block_height, from_address, to_address, token_type, amount, withdrawn_event_index, deposited_event_index)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.from.as_ref().map(FlowAddress::as_slice))
            .bind(r.to.as_ref().map(FlowAddress::as_slice))
            .bind(&r.token_type)
            .bind(r.amount.to_bigdecimal())
            .bind(r.withdrawn_event_index.map(|i| i as i32))
            .bind(r.deposited_event_index.map(|i| i as i32))
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_evm_mappings(&self, rows: &[EvmTxMapping]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO evm_tx_mappings
                    (flow_tx_id, block_height, evm_tx_hash, evm_from, evm_to, evm_success, evm_gas_consumed, value, nonce, position_in_tx)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (flow_tx_id) DO NOTHING
                ",
            )
            .bind(r.flow_tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.evm_tx_hash.as_slice())
            .bind(r.evm_from.as_slice())
            .bind(r.evm_to.as_ref().map(<[u8; 20]>::as_slice))
            .bind(r.evm_success)
            .bind(r.evm_gas_consumed as i64)
            .bind(r.value.as_decimal())
            .bind(r.nonce as i64)
            .bind(r.position_in_tx as i32)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_tx_tags(&self, rows: &[TxTag]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                "INSERT INTO tx_tags (tx_id, block_height, tag) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(&r.tag)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn upsert_account_catalog(&self, rows: &[AccountCatalogEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO account_catalog (address, first_seen_height, last_seen_height, transaction_count)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (address) DO UPDATE SET
                    last_seen_height = GREATEST(account_catalog.last_seen_height, EXCLUDED.last_seen_height),
                    transaction_count = account_catalog.transaction_count + EXCLUDED.transaction_count
                ",
            )
            .bind(r.address.as_slice())
            .bind(r.first_seen_height.value() as i64)
            .bind(r.last_seen_height.value() as i64)
            .bind(r.transaction_count as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_tx_metrics(&self, rows: &[TxMetrics]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO tx_metrics (tx_id, block_height, gas_used, event_count)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tx_id) DO NOTHING
                ",
            )
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.gas_used as i64)
            .bind(r.event_count as i32)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_staking_events(&self, rows: &[StakingEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO staking_events (tx_id, block_height, node_address, action, amount)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.node_address.as_slice())
            .bind(&r.action)
            .bind(r.amount.as_ref().map(TokenAmount::to_bigdecimal))
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_defi_events(&self, rows: &[DefiEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO defi_events (tx_id, block_height, protocol, action, payload)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.protocol.as_slice())
            .bind(&r.action)
            .bind(&r.payload)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_address_tx_index(&self, rows: &[AddressTxIndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO address_tx_index (address, tx_id, block_height)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(r.address.as_slice())
            .bind(r.tx_id.as_slice())
            .bind(r.block_height.value() as i64)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn insert_account_key_events(&self, rows: &[AccountKeyEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        for r in rows {
            sqlx::query(
                r"
                INSERT INTO account_key_events (address, block_height, key_index, action)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(r.address.as_slice())
            .bind(r.block_height.value() as i64)
            .bind(r.key_index as i32)
            .bind(&r.action)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    #[instrument(skip(self, row), fields(address = %row.address, token_type = %row.token_type, as_of_height = row.as_of_height.value()))]
    async fn upsert_ft_holding(&self, row: &FtHolding) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO ft_holdings (address, token_type, balance, as_of_height)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (address, token_type) DO UPDATE SET
                balance = EXCLUDED.balance,
                as_of_height = EXCLUDED.as_of_height
            WHERE ft_holdings.as_of_height < EXCLUDED.as_of_height
            ",
        )
        .bind(row.address.as_slice())
        .bind(&row.token_type)
        .bind(row.balance.to_bigdecimal())
        .bind(row.as_of_height.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, row), fields(collection_type = %row.collection_type, token_id = row.token_id, as_of_height = row.as_of_height.value()))]
    async fn upsert_nft_ownership(&self, row: &NftOwnership) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO nft_ownership (collection_type, token_id, owner, as_of_height)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (collection_type, token_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                as_of_height = EXCLUDED.as_of_height
            WHERE nft_ownership.as_of_height < EXCLUDED.as_of_height
            ",
        )
        .bind(&row.collection_type)
        .bind(row.token_id as i64)
        .bind(row.owner.as_ref().map(FlowAddress::as_slice))
        .bind(row.as_of_height.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, row), fields(address = %row.address, token_type = %row.token_type, day = %row.day, as_of_height = row.as_of_height.value()))]
    async fn upsert_daily_balance(&self, row: &DailyBalanceAggregate) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO daily_balance_aggregates (address, token_type, day, closing_balance, as_of_height)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address, token_type, day) DO UPDATE SET
                closing_balance = EXCLUDED.closing_balance,
                as_of_height = EXCLUDED.as_of_height
            WHERE daily_balance_aggregates.as_of_height < EXCLUDED.as_of_height
            ",
        )
        .bind(row.address.as_slice())
        .bind(&row.token_type)
        .bind(row.day)
        .bind(row.closing_balance.to_bigdecimal())
        .bind(row.as_of_height.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(address = %address, token_type = token_type))]
    async fn get_ft_holding(&self, address: &FlowAddress, token_type: &str) -> Result<Option<FtHolding>> {
        let row = sqlx::query_as::<_, FtHoldingRow>(
            "SELECT address, token_type, balance, as_of_height FROM ft_holdings WHERE address = $1 AND token_type = $2",
        )
        .bind(address.as_slice())
        .bind(token_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(collection_type = collection_type, token_id = token_id))]
    async fn get_nft_owner(&self, collection_type: &str, token_id: u64) -> Result<Option<NftOwnership>> {
        let row = sqlx::query_as::<_, NftOwnershipRow>(
            "SELECT collection_type, token_id, owner, as_of_height FROM nft_ownership WHERE collection_type = $1 AND token_id = $2",
        )
        .bind(collection_type)
        .bind(token_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(address = %address, limit = limit))]
    async fn get_address_transactions(&self, address: &FlowAddress, limit: u32) -> Result<Vec<AddressTxIndexEntry>> {
        let rows = sqlx::query_as::<_, AddressTxIndexRow>(
            r"
            SELECT address, tx_id, block_height FROM address_tx_index
            WHERE address = $1
            ORDER BY block_height DESC
            LIMIT $2
            ",
        )
        .bind(address.as_slice())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self), fields(height = height.value()))]
    async fn delete_phase1_from_height(&self, height: Height) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let h = height.value() as i64;
        let mut total = 0u64;

        for table in [
            "token_transfers",
            "evm_tx_mappings",
            "tx_tags",
            "tx_metrics",
            "staking_events",
            "defi_events",
            "address_tx_index",
            "account_key_events",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE block_height >= $1"))
                .bind(h)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            total += result.rows_affected();
        }

        tx.commit().await.map_err(InfraError::Database)?;
        debug!(rows_deleted = total, height = h, "deleted phase 1 rows from height");
        Ok(total)
    }

    #[instrument(skip(self), fields(height = height.value()))]
    async fn delete_phase2_from_height(&self, height: Height) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        let h = height.value() as i64;
        let mut total = 0u64;

        for table in ["ft_holdings", "nft_ownership", "daily_balance_aggregates"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE as_of_height >= $1"))
                .bind(h)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
            total += result.rows_affected();
        }

        tx.commit().await.map_err(InfraError::Database)?;
        debug!(rows_deleted = total, height = h, "deleted phase 2 rows from height");
        Ok(total)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // Full integration tests require a PostgreSQL database and live in
    // tests/store_integration.rs, driven against testcontainers.

    #[test]
    fn postgres_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresStore>();
    }
}
