//! Domain entities for database persistence.
//!
//! These structs represent the indexer's core domain objects: the raw chain
//! data ingested from the Access API, the bookkeeping entities that drive the
//! pipeline (checkpoints, leases, error log entries), and the derived
//! projections produced by Phase 1 and Phase 2 processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EventKind, LeaseStatus, Phase};
use super::primitives::{FlowAddress, FlowId, Height, TokenAmount};

// ═══════════════════════════════════════════════════════════════════════════════
// RAW STORE ENTITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// A Flow block header, as returned by the Access API's `GetBlockByHeight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier (hash of the canonical encoding).
    pub id: FlowId,
    /// Block height.
    pub height: Height,
    /// Identifier of the parent block.
    pub parent_id: FlowId,
    /// Block timestamp, as reported by the proposer.
    pub timestamp: DateTime<Utc>,
    /// Collection guarantees included in this block, in index order.
    pub collection_ids: Vec<FlowId>,
    /// Which spork this block belongs to.
    pub spork_id: String,
}

/// A Flow transaction, as returned alongside `TransactionResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier.
    pub id: FlowId,
    /// Block this transaction was sealed in.
    pub block_id: FlowId,
    /// Block height (denormalized for range queries).
    pub block_height: Height,
    /// Collection this transaction belongs to.
    pub collection_id: FlowId,
    /// Index of the transaction within its block.
    pub index_in_block: u32,
    /// Payer account address.
    pub payer: FlowAddress,
    /// Proposer and authorizer addresses, in authorization order.
    pub authorizers: Vec<FlowAddress>,
    /// `Ok` or `Error` status, with the error message if failed.
    pub status: TransactionStatus,
    /// Gas consumed (execution effort).
    pub gas_used: u64,
}

/// Outcome of executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Transaction executed without error.
    Sealed,
    /// Transaction was sealed but execution failed.
    Failed {
        /// Cadence runtime error message.
        error_message: String,
    },
    /// Transaction is known but not yet sealed (should not persist past ingestion).
    Pending,
}

impl TransactionStatus {
    /// Whether this transaction succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Sealed)
    }
}

/// A single Cadence event emitted during transaction execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Transaction that emitted this event.
    pub tx_id: FlowId,
    /// Block height (denormalized for range queries and partitioning).
    pub block_height: Height,
    /// Index of the event within the transaction's event list.
    pub event_index: u32,
    /// Fully-qualified Cadence event type, e.g.
    /// `A.1654653399040a61.FlowToken.TokensDeposited`.
    pub event_type: String,
    /// JSON-Cadence encoded event payload.
    pub payload: serde_json::Value,
    /// Coarse routing classification, assigned at ingestion time.
    pub kind: EventKind,
}

/// A collection of transactions guaranteed by a cluster of collector nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection identifier.
    pub id: FlowId,
    /// Transaction identifiers, in execution order.
    pub transaction_ids: Vec<FlowId>,
}

/// The sealed execution result for a block (statuses and computed state commitment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Block this result seals.
    pub block_id: FlowId,
    /// Previous execution result this one extends.
    pub previous_result_id: FlowId,
    /// Final state commitment after applying this block.
    pub block_state_commitment: Vec<u8>,
}

/// The raw Cadence source of a script or transaction, kept for audit/debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBody {
    /// Transaction (or script invocation) this source belongs to.
    pub tx_id: FlowId,
    /// Raw Cadence source text.
    pub script: String,
    /// JSON-Cadence encoded arguments, in order.
    pub arguments: Vec<serde_json::Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK-ID / TX-ID INDEX (used by the Rollback Engine's fork-point walk)
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps a height to the block id observed there, so the Rollback Engine can
/// detect divergence by comparing a freshly-fetched id against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdIndexEntry {
    /// Height of the indexed block.
    pub height: Height,
    /// Block id observed at that height when it was ingested.
    pub block_id: FlowId,
}

/// Maps a transaction id to the height it was ingested at, to let Phase 2
/// processors and the Async Worker resolve a transaction's position quickly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIdIndexEntry {
    /// Transaction identifier.
    pub tx_id: FlowId,
    /// Height the transaction was sealed at.
    pub block_height: Height,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress marker for one named consumer of the chain (an ingester, a
/// deriver, or a processor within a deriver).
///
/// Checkpoints are monotone: a checkpoint must never be set to a height lower
/// than its current value without going through the Rollback Engine first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the consumer this checkpoint tracks, e.g. `"forward_ingester"`,
    /// `"live_deriver:token_transfer"`.
    pub name: String,
    /// Last height fully processed by this consumer.
    pub height: Height,
    /// Last update time, for staleness monitoring.
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// A work lease held by the Async Worker over a queue-shaped unit of work
/// (e.g. a single NFT's ownership reconciliation, not a contiguous height
/// range).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique lease identifier.
    pub id: Uuid,
    /// Name of the work queue this lease belongs to, e.g.
    /// `"nft_reconciliation"`.
    pub queue: String,
    /// Opaque work-item key (e.g. a serialized NFT collection/id pair).
    pub item_key: String,
    /// Identifier of the worker currently holding the lease.
    pub worker_id: String,
    /// Current lease status.
    pub status: LeaseStatus,
    /// Number of attempts made on this work item so far.
    pub attempt: u32,
    /// When the lease expires if not renewed or released.
    pub expires_at: DateTime<Utc>,
    /// When the lease was first acquired.
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has passed its expiry and can be reclaimed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// A durable record of a processing failure, kept for operator visibility
/// and retry bookkeeping. Never deleted by the Rollback Engine: it is an
/// audit trail, not servable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Name of the processor or component that failed.
    pub source: String,
    /// Height range (or single height) the failure occurred in.
    pub from_height: Height,
    /// End of the failed range (inclusive).
    pub to_height: Height,
    /// Human-readable error message.
    pub message: String,
    /// Number of retry attempts made so far.
    pub attempt: u32,
    /// When the failure was first recorded.
    pub created_at: DateTime<Utc>,
    /// When this entry was last retried.
    pub last_attempt_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PHASE 1 DERIVED PROJECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A decoded fungible-token transfer (paired `Withdrawn`/`Deposited` events).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    /// Originating transaction.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// Sender address (`None` for mints).
    pub from: Option<FlowAddress>,
    /// Recipient address (`None` for burns).
    pub to: Option<FlowAddress>,
    /// Fully-qualified vault type, e.g. `A.1654653399040a61.FlowToken.Vault`.
    pub token_type: String,
    /// Amount transferred.
    pub amount: TokenAmount,
    /// Event index of the `Withdrawn` half of the pair (tie-break key).
    pub withdrawn_event_index: Option<u32>,
    /// Event index of the `Deposited` half of the pair.
    pub deposited_event_index: Option<u32>,
}

/// Maps a Flow transaction to the EVM transaction it wraps, decoded from
/// `EVM.TransactionExecuted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTxMapping {
    /// Flow transaction that submitted the EVM transaction.
    pub flow_tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// 32-byte EVM transaction hash.
    pub evm_tx_hash: [u8; 32],
    /// 20-byte EVM sender address.
    pub evm_from: [u8; 20],
    /// 20-byte EVM recipient address (`None` for contract creation).
    pub evm_to: Option<[u8; 20]>,
    /// Whether the EVM transaction itself succeeded.
    pub evm_success: bool,
    /// Gas consumed on the EVM side.
    pub evm_gas_consumed: u64,
    /// Value transferred, in wei, decoded from the RLP transaction payload.
    pub value: TokenAmount,
    /// Sender-side nonce, decoded from the RLP transaction payload.
    pub nonce: u64,
    /// Position of this EVM transaction within the batch the wrapping Flow
    /// transaction submitted (a COA can batch several in one direct call).
    pub position_in_tx: u32,
}

/// A free-text tag attached to a transaction by a tagging processor
/// (e.g. `"nft_marketplace"`, `"dex_swap"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTag {
    /// Tagged transaction.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// Tag value.
    pub tag: String,
}

/// First-seen/last-seen catalog entry for an account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCatalogEntry {
    /// Account address.
    pub address: FlowAddress,
    /// Height the address was first observed at.
    pub first_seen_height: Height,
    /// Height the address was most recently observed at.
    pub last_seen_height: Height,
    /// Number of transactions this address has authorized or paid for.
    pub transaction_count: u64,
}

/// Per-transaction resource-usage metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetrics {
    /// Transaction this row describes.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// Gas used (execution effort).
    pub gas_used: u64,
    /// Number of events emitted.
    pub event_count: u32,
}

/// A decoded staking-contract event (`TokensCommitted`, `DelegatorRewarded`, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingEvent {
    /// Originating transaction.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// Node operator or delegator address.
    pub node_address: FlowAddress,
    /// Staking action name, e.g. `"TokensCommitted"`.
    pub action: String,
    /// Amount involved, if applicable.
    pub amount: Option<TokenAmount>,
}

/// A decoded DeFi protocol event (swap, liquidity add/remove).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefiEvent {
    /// Originating transaction.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
    /// Protocol contract address.
    pub protocol: FlowAddress,
    /// Event kind, e.g. `"Swap"`, `"AddLiquidity"`.
    pub action: String,
    /// JSON-encoded event-specific payload.
    pub payload: serde_json::Value,
}

/// Denormalized per-address transaction index, enabling "all transactions
/// touching this address" queries without scanning the full transaction
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTxIndexEntry {
    /// Address this index entry is for.
    pub address: FlowAddress,
    /// Transaction touching the address.
    pub tx_id: FlowId,
    /// Block height.
    pub block_height: Height,
}

/// A decoded account-key-management event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeyEvent {
    /// Account the key belongs to.
    pub address: FlowAddress,
    /// Block height.
    pub block_height: Height,
    /// Key index within the account.
    pub key_index: u32,
    /// `"added"` or `"revoked"`.
    pub action: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PHASE 2 DERIVED PROJECTIONS (current-state, height-guarded upserts)
// ═══════════════════════════════════════════════════════════════════════════════

/// Current fungible-token balance for one address and token type.
///
/// Updated via a height-guarded upsert: a write is discarded if the stored
/// `as_of_height` is already greater than or equal to the incoming height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtHolding {
    /// Holder address.
    pub address: FlowAddress,
    /// Fully-qualified vault type.
    pub token_type: String,
    /// Current balance.
    pub balance: TokenAmount,
    /// Height this balance reflects.
    pub as_of_height: Height,
}

/// Current owner of a non-fungible token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftOwnership {
    /// Fully-qualified NFT collection type.
    pub collection_type: String,
    /// Token identifier within the collection.
    pub token_id: u64,
    /// Current owner (`None` if burned).
    pub owner: Option<FlowAddress>,
    /// Height this ownership reflects.
    pub as_of_height: Height,
}

/// Daily aggregate of an address's fungible-token balance, for charting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBalanceAggregate {
    /// Holder address.
    pub address: FlowAddress,
    /// Token type.
    pub token_type: String,
    /// Calendar day (UTC) this aggregate covers.
    pub day: chrono::NaiveDate,
    /// Closing balance for the day.
    pub closing_balance: TokenAmount,
    /// Height the closing balance was observed at.
    pub as_of_height: Height,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn transaction_status_success() {
        assert!(TransactionStatus::Sealed.is_success());
        assert!(!TransactionStatus::Failed {
            error_message: "panic".into()
        }
        .is_success());
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            id: Uuid::new_v4(),
            queue: "nft_reconciliation".into(),
            item_key: "A.0x1.Foo#1".into(),
            worker_id: "worker-1".into(),
            status: LeaseStatus::Active,
            attempt: 1,
            expires_at: now - chrono::Duration::seconds(1),
            acquired_at: now - chrono::Duration::minutes(5),
        };
        assert!(lease.is_expired(now));
    }
}
