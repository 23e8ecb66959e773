//! Domain types for the Flow indexer.
//!
//! - [`enums`] - Pipeline enumerations (`Phase`, `LeaseStatus`, `EventKind`, …)
//! - [`primitives`] - Validated newtypes (`FlowId`, `FlowAddress`, `TokenAmount`, `Height`)
//! - [`events`] - Raw decoded event wire type
//! - [`entities`] - Raw-store and derived-store domain entities

pub mod entities;
pub mod enums;
pub mod events;
pub mod primitives;

pub use entities::{
    AccountCatalogEntry, AccountKeyEvent, AddressTxIndexEntry, Block, BlockIdIndexEntry,
    Checkpoint, Collection, DailyBalanceAggregate, DefiEvent, ErrorEntry, Event, EvmTxMapping,
    ExecutionResult, FtHolding, Lease, NftOwnership, ScriptBody, StakingEvent, Transaction,
    TransactionStatus, TxIdIndexEntry, TxMetrics, TxTag, TokenTransfer,
};
pub use enums::{EventKind, IngestDirection, LeaseStatus, Phase, RollbackOutcome};
pub use events::{EventMetadata, FlowEvent};
pub use primitives::{FlowAddress, FlowId, Height, TokenAmount};
