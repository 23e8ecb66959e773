//! Enumerations shared across the ingestion and derivation pipeline.

use serde::{Deserialize, Serialize};
use sqlx::Type;

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR PHASE
// ═══════════════════════════════════════════════════════════════════════════════

/// Which phase a processor belongs to.
///
/// Phase 1 processors read only raw ingested data. Phase 2 processors read
/// Phase 1 outputs and update current-state projections, so they must never
/// run ahead of the Phase 1 processors they depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
pub enum Phase {
    /// Reads only raw ingested data (blocks, transactions, events).
    One = 1,
    /// Reads Phase 1 outputs to update current-state projections.
    Two = 2,
}

impl Phase {
    /// Numeric ordinal, for ordering dependency checks.
    #[must_use]
    pub const fn ordinal(self) -> i16 {
        self as i16
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEASE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a work lease held by the Async Worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "varchar")]
pub enum LeaseStatus {
    /// Actively held by a worker.
    Active,
    /// Completed successfully and released.
    Done,
    /// The job ran and returned an error, or the active lease's deadline
    /// elapsed before completion. Eligible for reclaim while `attempt` is
    /// below the attempt cap.
    Failed,
    /// Exceeded its retry budget; moved to the dead letter queue.
    DeadLettered,
    /// Expired without completion; eligible for reclaim.
    ///
    /// Retained for rows written before the `Failed` state existed; the
    /// reaper now promotes elapsed active leases straight to `Failed`.
    Expired,
}

impl LeaseStatus {
    /// Whether a lease in this status can be re-acquired.
    #[must_use]
    pub const fn is_reclaimable(self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INGESTION DIRECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Direction an ingester walks the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestDirection {
    /// Walking from the current tip backward toward genesis (gap-filling / backfill).
    Backward,
    /// Walking from the last ingested height forward toward the live tip.
    Forward,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROLLBACK OUTCOME
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a rollback (reorg recovery) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    /// No divergence found; chain was already consistent.
    NoOpConsistent,
    /// Rolled back successfully to the given common ancestor height.
    RolledBack,
    /// Divergence exceeds the configured maximum reorg depth; operator
    /// intervention required.
    ExceedsMaxDepth,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT KIND (coarse classification used for routing and tagging)
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse classification of a Flow event's originating contract family.
///
/// This is a routing hint for Phase 1 processors, not a replacement for the
/// fully-qualified Flow event type string stored on the raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "varchar")]
#[non_exhaustive]
pub enum EventKind {
    /// `FlowToken`/fungible-token `Deposit`/`Withdraw` events.
    FungibleTokenTransfer,
    /// Non-fungible-token `Deposit`/`Withdraw` events.
    NonFungibleTokenTransfer,
    /// `EVM.TransactionExecuted` (Flow's native EVM environment).
    EvmTransactionExecuted,
    /// Staking-contract events (`DelegatorRewarded`, `TokensCommitted`, …).
    Staking,
    /// DeFi protocol events (swaps, liquidity changes).
    Defi,
    /// Account-key-management events (`AccountKeyAdded`, `AccountKeyRemoved`).
    AccountKey,
    /// Anything not recognized by a concrete processor.
    Unclassified,
}

impl EventKind {
    /// Classify a fully-qualified Cadence event type by suffix, e.g.
    /// `A.1654653399040a61.FlowToken.TokensWithdrawn` -> `FungibleTokenTransfer`.
    ///
    /// This is a coarse ingestion-time routing hint; concrete Phase 1
    /// processors still inspect the full type string to decide how to
    /// decode the payload.
    #[must_use]
    pub fn classify(event_type: &str) -> Self {
        if event_type == "A.e467b9dd11fa00df.EVM.TransactionExecuted" {
            return Self::EvmTransactionExecuted;
        }

        let Some(suffix) = event_type.rsplit('.').next() else {
            return Self::Unclassified;
        };

        match suffix {
            "TokensWithdrawn" | "TokensDeposited" => Self::FungibleTokenTransfer,
            "Withdraw" | "Deposit" => Self::NonFungibleTokenTransfer,
            "TokensCommitted" | "TokensUnstaked" | "DelegatorRewarded" | "NodeRewarded" => {
                Self::Staking
            }
            "Swap" | "AddLiquidity" | "RemoveLiquidity" => Self::Defi,
            "AccountKeyAdded" | "AccountKeyRemoved" => Self::AccountKey,
            _ => Self::Unclassified,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordering() {
        assert!(Phase::One.ordinal() < Phase::Two.ordinal());
    }

    #[test]
    fn lease_reclaimable() {
        assert!(LeaseStatus::Failed.is_reclaimable());
        assert!(LeaseStatus::Expired.is_reclaimable());
        assert!(!LeaseStatus::Active.is_reclaimable());
        assert!(!LeaseStatus::DeadLettered.is_reclaimable());
    }

    #[test]
    fn classify_fungible_token_transfer() {
        assert_eq!(
            EventKind::classify("A.1654653399040a61.FlowToken.TokensWithdrawn"),
            EventKind::FungibleTokenTransfer
        );
    }

    #[test]
    fn classify_evm_transaction_executed() {
        assert_eq!(
            EventKind::classify("A.e467b9dd11fa00df.EVM.TransactionExecuted"),
            EventKind::EvmTransactionExecuted
        );
    }

    #[test]
    fn classify_unrecognized_falls_back() {
        assert_eq!(
            EventKind::classify("A.1234.SomeContract.SomeEvent"),
            EventKind::Unclassified
        );
    }
}
