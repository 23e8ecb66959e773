//! Storage port traits for data persistence.
//!
//! These traits define the contract for persisting and retrieving pipeline
//! state and domain entities. Infrastructure adapters implement these traits
//! using concrete storage backends (Postgres, in the production binary).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    AccountCatalogEntry, AccountKeyEvent, AddressTxIndexEntry, Block, BlockIdIndexEntry,
    Checkpoint, Collection, DailyBalanceAggregate, DefiEvent, ErrorEntry, Event, EvmTxMapping,
    ExecutionResult, FlowAddress, FlowId, FtHolding, Height, Lease, NftOwnership, ScriptBody,
    StakingEvent, TokenTransfer, Transaction, TxIdIndexEntry, TxMetrics, TxTag,
};

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for checkpoint persistence.
///
/// Every ingester, deriver, and per-processor cursor advances through a named
/// checkpoint. Checkpoints are monotone outside of the Rollback Engine.
///
/// # Implementation Notes
///
/// Implementations should upsert on `set`, keyed by `name`, and must not
/// allow a caller to silently decrease a checkpoint's height; that is the
/// Rollback Engine's job via [`RawStore::delete_above_height`] and an
/// explicit `set`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Get the named checkpoint, if it has ever been set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get(&self, name: &str) -> Result<Option<Checkpoint>>;

    /// Set (upsert) a named checkpoint to the given height.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set(&self, name: &str, height: Height) -> Result<()>;

    /// List all known checkpoints, for the operator status endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn list(&self) -> Result<Vec<Checkpoint>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for lease persistence, backing the Async Worker's queue-shaped work
/// distribution (NFT ownership reconciliation, daily aggregate backfill).
///
/// # Implementation Notes
///
/// `acquire` must be implemented as an insert-if-absent (or
/// insert-on-conflict-do-nothing) so that concurrent workers racing for the
/// same `item_key` never both succeed.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Attempt to acquire a lease on `item_key` within `queue`.
    ///
    /// Returns `None` if another worker already holds an active,
    /// non-expired lease on the same item.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn acquire(
        &self,
        queue: &str,
        item_key: &str,
        worker_id: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<Lease>>;

    /// Renew an actively held lease, extending its expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease does not exist, is not held by
    /// `worker_id`, or the database operation fails.
    async fn renew(&self, id: Uuid, worker_id: &str, ttl: chrono::Duration) -> Result<()>;

    /// Release a lease as successfully completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn release(&self, id: Uuid) -> Result<()>;

    /// Mark a lease `Failed` immediately after its job returned an error,
    /// so it is eligible for reclaim without waiting out the full lease
    /// TTL. Distinct from a reaped deadline expiry, though both land in the
    /// same `Failed` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn mark_failed(&self, id: Uuid) -> Result<()>;

    /// Move a lease to the dead letter state after exceeding its retry
    /// budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn mark_dead_letter(&self, id: Uuid) -> Result<()>;

    /// Find leases in `queue` that have expired without completion, marking
    /// them `Failed` and returning up to `limit` of them so the Async
    /// Worker can re-acquire and retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn reap_expired(&self, queue: &str, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>>;

    /// List completed leases in `queue` ordered by acquisition time, for
    /// the Committer's gap-detection window scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn list_completed(&self, queue: &str, limit: u32) -> Result<Vec<Lease>>;

    /// List leases currently in the dead letter state, for the Committer's
    /// critical-alert loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn list_dead_lettered(&self, queue: &str) -> Result<Vec<Lease>>;

    /// Fail every active lease, system-wide, as part of rollback surgery.
    ///
    /// Leases in this codebase key on an opaque `item_key` rather than a
    /// height range, so a rollback can't target only the leases that
    /// overlap `[R, ∞)` precisely; failing every active lease and letting
    /// workers re-acquire and re-derive is the conservative substitute.
    /// Returns the number of leases failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn fail_all_active(&self) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR LOG STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the durable error log.
///
/// Entries are an audit trail, not servable state, and are never deleted by
/// the Rollback Engine.
#[async_trait]
pub trait ErrorLogStore: Send + Sync {
    /// Record a failure, or bump the attempt counter of an existing entry
    /// covering the same `source`/range.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record(&self, entry: &ErrorEntry) -> Result<()>;

    /// List entries for a source, most recent first, for operator review.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn list_for_source(&self, source: &str, limit: u32) -> Result<Vec<ErrorEntry>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for raw chain data persistence: blocks, transactions, events, and
/// the supporting id indexes the Rollback Engine walks during fork-point
/// detection.
///
/// # Implementation Notes
///
/// Implementations should store blocks/transactions/events in tables
/// range-partitioned by height, and perform `insert_block` as a single
/// transaction per ingested block so partial ingestion never becomes
/// visible to derivers.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Persist a fully-ingested block: the block header, its transactions,
    /// and their events, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database transaction fails.
    async fn insert_block(
        &self,
        block: &Block,
        transactions: &[Transaction],
        events: &[Event],
        execution_result: Option<&ExecutionResult>,
        collections: &[Collection],
        scripts: &[ScriptBody],
    ) -> Result<()>;

    /// Fetch a block by height.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_block(&self, height: Height) -> Result<Option<Block>>;

    /// Fetch all events emitted within a height range, in block/tx/event
    /// order, for a deriver to process.
    ///
    /// # Errors
    ///
    /// Returns an error if `from > to` or the database query fails.
    async fn get_events_in_range(&self, from: Height, to: Height) -> Result<Vec<Event>>;

    /// Fetch all transactions within a height range.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_transactions_in_range(&self, from: Height, to: Height) -> Result<Vec<Transaction>>;

    /// The highest height for which a block has been ingested.
    ///
    /// Returns `Height::ZERO` if nothing has been ingested yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn highest_ingested_height(&self) -> Result<Height>;

    /// The lowest height for which a block has been ingested, for the
    /// Backward Ingester to resume from.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn lowest_ingested_height(&self) -> Result<Option<Height>>;

    /// Find gaps in the ingested height range `[from, to]`, i.e. heights
    /// with no stored block, via a window-function scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn find_height_gaps(&self, from: Height, to: Height) -> Result<Vec<(Height, Height)>>;

    /// Look up the block id stored at `height`, for reorg comparison.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn block_id_at_height(&self, height: Height) -> Result<Option<BlockIdIndexEntry>>;

    /// Resolve the height a transaction was sealed at.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn tx_index_entry(&self, tx_id: FlowId) -> Result<Option<TxIdIndexEntry>>;

    /// Delete all raw and derived data above `height` (exclusive), as the
    /// last step of a rollback.
    ///
    /// # Safety
    ///
    /// This operation is destructive and must only be invoked by the
    /// Rollback Engine after a fork point has been confirmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database transaction fails.
    async fn delete_above_height(&self, height: Height) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// DERIVED STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for derived-projection persistence, covering both Phase 1
/// append-only tables and Phase 2 height-guarded current-state tables.
///
/// # Implementation Notes
///
/// Phase 2 upserts (`upsert_ft_holding`, `upsert_nft_ownership`,
/// `upsert_daily_balance`) must discard the write when the stored
/// `as_of_height` is already greater than or equal to the incoming height;
/// this makes out-of-order re-derivation (e.g. after a partial rollback)
/// safe to replay.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    /// Batch-insert decoded token transfers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_token_transfers(&self, rows: &[TokenTransfer]) -> Result<()>;

    /// Batch-insert EVM transaction mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_evm_mappings(&self, rows: &[EvmTxMapping]) -> Result<()>;

    /// Batch-insert transaction tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_tx_tags(&self, rows: &[TxTag]) -> Result<()>;

    /// Batch-insert or update account catalog entries, bumping
    /// `last_seen_height` and `transaction_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_account_catalog(&self, rows: &[AccountCatalogEntry]) -> Result<()>;

    /// Batch-insert per-transaction resource metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_tx_metrics(&self, rows: &[TxMetrics]) -> Result<()>;

    /// Batch-insert decoded staking events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_staking_events(&self, rows: &[StakingEvent]) -> Result<()>;

    /// Batch-insert decoded DeFi events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_defi_events(&self, rows: &[DefiEvent]) -> Result<()>;

    /// Batch-insert per-address transaction index entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_address_tx_index(&self, rows: &[AddressTxIndexEntry]) -> Result<()>;

    /// Batch-insert account-key-management events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_account_key_events(&self, rows: &[AccountKeyEvent]) -> Result<()>;

    /// Height-guarded upsert of a fungible-token holding.
    ///
    /// Returns `true` if the row was applied, `false` if discarded because
    /// a higher or equal `as_of_height` was already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_ft_holding(&self, row: &FtHolding) -> Result<bool>;

    /// Height-guarded upsert of an NFT ownership record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_nft_ownership(&self, row: &NftOwnership) -> Result<bool>;

    /// Height-guarded upsert of a daily balance aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_daily_balance(&self, row: &DailyBalanceAggregate) -> Result<bool>;

    /// Current fungible-token balance for an address/token pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_ft_holding(&self, address: &FlowAddress, token_type: &str) -> Result<Option<FtHolding>>;

    /// Current owner of an NFT.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_nft_owner(&self, collection_type: &str, token_id: u64) -> Result<Option<NftOwnership>>;

    /// All transactions touching an address, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_address_transactions(&self, address: &FlowAddress, limit: u32) -> Result<Vec<AddressTxIndexEntry>>;

    /// Delete Phase 1 (event-sourced, append-only) derived rows at or
    /// above `height`, as part of rollback surgery. Returns the number of
    /// rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_phase1_from_height(&self, height: Height) -> Result<u64>;

    /// Delete Phase 2 (current-state) rows whose `as_of_height` is at or
    /// above `height`, as part of rollback surgery. Unlike Phase 1 this is
    /// surgical, not a truncation: a row with `as_of_height < height`
    /// reflects state the rollback doesn't invalidate and is left alone.
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn delete_phase2_from_height(&self, height: Height) -> Result<u64>;
}
