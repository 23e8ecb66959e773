//! Phase 1 processors: append-only projections derived purely from raw
//! ingested data (a transaction and the events it emitted).

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::shared::{
    cadence_address_opt, cadence_amount, cadence_bytes, cadence_fixed_bytes, cadence_string,
    cadence_u64, resource_type_from_event_type,
};
use super::Processor;
use crate::error::{InfraError, Result};
use crate::ports::DerivedStore;
use crate::types::{
    AccountCatalogEntry, AccountKeyEvent, AddressTxIndexEntry, DefiEvent, EventKind, EvmTxMapping,
    FlowAddress, FlowEvent, StakingEvent, Transaction, TokenAmount, TokenTransfer, TxMetrics, TxTag, Phase,
};

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN TRANSFER
// ═══════════════════════════════════════════════════════════════════════════════

/// Pairs `TokensWithdrawn`/`TokensDeposited` events into [`TokenTransfer`] rows.
///
/// Mints have no `Withdrawn` half (`from` is `None`); burns have no
/// `Deposited` half (`to` is `None`). Events are paired by resource type
/// within the transaction, not by event index, since a single transaction
/// can move several vault types.
pub struct TokenTransferProcessor<D> {
    store: Arc<D>,
}

impl<D> TokenTransferProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for TokenTransferProcessor<D> {
    fn name(&self) -> &'static str {
        "token_transfer"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let transfers: Vec<FlowEvent> = events
            .iter()
            .filter(|e| e.kind == EventKind::FungibleTokenTransfer)
            .cloned()
            .collect();

        if transfers.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::new();
        let mut withdrawals: Vec<&FlowEvent> = Vec::new();
        let mut deposits: Vec<&FlowEvent> = Vec::new();

        for event in &transfers {
            match event.short_name() {
                "TokensWithdrawn" => withdrawals.push(event),
                "TokensDeposited" => deposits.push(event),
                other => warn!(event_type = other, "unexpected fungible-token-transfer event"),
            }
        }

        for withdrawn in &withdrawals {
            let token_type = resource_type_from_event_type(&withdrawn.event_type);
            let amount = cadence_amount(&withdrawn.payload, "amount")?;
            let from = cadence_address_opt(&withdrawn.payload, "from");

            let paired_deposit = deposits.iter().position(|d| {
                resource_type_from_event_type(&d.event_type) == token_type
            });

            let (to, deposited_event_index) = match paired_deposit {
                Some(idx) => {
                    let deposit = deposits.remove(idx);
                    (
                        cadence_address_opt(&deposit.payload, "to"),
                        Some(deposit.meta.event_index),
                    )
                }
                None => (None, None),
            };

            rows.push(TokenTransfer {
                tx_id: tx.id,
                block_height: tx.block_height,
                from,
                to,
                token_type,
                amount,
                withdrawn_event_index: Some(withdrawn.meta.event_index),
                deposited_event_index,
            });
        }

        // Any deposits left unpaired are pure mints.
        for deposit in deposits {
            let token_type = resource_type_from_event_type(&deposit.event_type);
            let amount = cadence_amount(&deposit.payload, "amount")?;
            let to = cadence_address_opt(&deposit.payload, "to");

            rows.push(TokenTransfer {
                tx_id: tx.id,
                block_height: tx.block_height,
                from: None,
                to,
                token_type,
                amount,
                withdrawn_event_index: None,
                deposited_event_index: Some(deposit.meta.event_index),
            });
        }

        self.store.insert_token_transfers(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVM MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Decodes `EVM.TransactionExecuted` into [`EvmTxMapping`] rows, linking the
/// wrapping Flow transaction to the EVM transaction it submitted.
pub struct EvmMappingProcessor<D> {
    store: Arc<D>,
}

impl<D> EvmMappingProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

/// `type` byte flow-go assigns a COA direct call: a value transfer or
/// contract call the COA resource issues itself, with no signature and no
/// standard Ethereum transaction envelope around it.
const DIRECT_CALL_TX_TYPE: u8 = 0xff;

/// Decode `nonce` and `value` out of an EVM transaction's RLP payload.
///
/// `payload` is the event's raw `payload` bytes, already stripped of the
/// leading type byte (`type_byte` is carried as its own Cadence field).
/// Direct calls RLP-encode `DirectCall{Type, SubType, From, To, Data, Value,
/// GasLimit, Nonce}`; legacy and EIP-2930/1559 transactions RLP-encode the
/// standard field list for their type, which only differs in where `nonce`
/// and `value` land once `chainId` is (or isn't) the leading field.
fn decode_rlp_tx_fields(type_byte: u8, payload: &[u8]) -> Result<(TokenAmount, u64)> {
    let rlp = rlp::Rlp::new(payload);

    let (nonce_idx, value_idx) = if type_byte == DIRECT_CALL_TX_TYPE {
        (7, 5)
    } else {
        match type_byte {
            0 => (0, 4),
            1 => (1, 5),
            2 => (1, 6),
            other => return Err(InfraError::EventDecoding(format!("unsupported EVM tx type {other}")).into()),
        }
    };

    let nonce: u64 = rlp
        .val_at(nonce_idx)
        .map_err(|e| InfraError::EventDecoding(format!("decoding tx nonce: {e}")))?;
    let value_bytes: Vec<u8> = rlp
        .val_at(value_idx)
        .map_err(|e| InfraError::EventDecoding(format!("decoding tx value: {e}")))?;

    Ok((TokenAmount::from_wei_be(&value_bytes), nonce))
}

#[async_trait]
impl<D: DerivedStore> Processor for EvmMappingProcessor<D> {
    fn name(&self) -> &'static str {
        "evm_mapping"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut rows = Vec::new();

        for event in events.iter().filter(|e| e.kind == EventKind::EvmTransactionExecuted) {
            let evm_tx_hash: [u8; 32] = cadence_fixed_bytes(&event.payload, "hash")?;
            let evm_from: [u8; 20] = cadence_fixed_bytes(&event.payload, "from")?;
            let evm_to: Option<[u8; 20]> = cadence_fixed_bytes(&event.payload, "to").ok();
            let error_code = cadence_u64(&event.payload, "errorCode").unwrap_or(0);
            let gas_used = cadence_u64(&event.payload, "gasConsumed").unwrap_or(0);
            let position_in_tx = cadence_u64(&event.payload, "index").unwrap_or(0) as u32;
            let type_byte = cadence_u64(&event.payload, "type").unwrap_or(0) as u8;
            let raw_payload = cadence_bytes(&event.payload, "payload").unwrap_or_default();

            let (value, nonce) = if raw_payload.is_empty() {
                (TokenAmount::zero(), 0)
            } else {
                decode_rlp_tx_fields(type_byte, &raw_payload).unwrap_or_else(|e| {
                    warn!(evm_tx_hash = %hex::encode(evm_tx_hash), error = %e, "failed to decode EVM transaction RLP payload");
                    (TokenAmount::zero(), 0)
                })
            };

            rows.push(EvmTxMapping {
                flow_tx_id: tx.id,
                block_height: tx.block_height,
                evm_tx_hash,
                evm_from,
                evm_to,
                evm_success: error_code == 0,
                evm_gas_consumed: gas_used,
                value,
                nonce,
                position_in_tx,
            });
        }

        if rows.is_empty() {
            return Ok(());
        }

        self.store.insert_evm_mappings(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TX TAG
// ═══════════════════════════════════════════════════════════════════════════════

/// Attaches coarse free-text tags to a transaction based on the kinds of
/// events it emitted, so operators can filter transactions without
/// re-deriving from raw events.
pub struct TxTagProcessor<D> {
    store: Arc<D>,
}

impl<D> TxTagProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for TxTagProcessor<D> {
    fn name(&self) -> &'static str {
        "tx_tag"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut tags = BTreeSet::new();

        for event in events {
            match event.kind {
                EventKind::FungibleTokenTransfer => tags.insert("fungible_token_transfer"),
                EventKind::NonFungibleTokenTransfer => tags.insert("nft_transfer"),
                EventKind::EvmTransactionExecuted => tags.insert("evm"),
                EventKind::Staking => tags.insert("staking"),
                EventKind::Defi => tags.insert("dex"),
                EventKind::AccountKey => tags.insert("account_key_management"),
                EventKind::Unclassified => false,
            };
        }

        let rows: Vec<TxTag> = tags
            .into_iter()
            .map(|tag| TxTag {
                tx_id: tx.id,
                block_height: tx.block_height,
                tag: tag.to_string(),
            })
            .collect();

        if rows.is_empty() {
            return Ok(());
        }

        self.store.insert_tx_tags(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT CATALOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Maintains a first-seen/last-seen catalog entry for every address that
/// pays for or authorizes a transaction.
pub struct AccountCatalogProcessor<D> {
    store: Arc<D>,
}

impl<D> AccountCatalogProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for AccountCatalogProcessor<D> {
    fn name(&self) -> &'static str {
        "account_catalog"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, _events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut addresses: BTreeSet<FlowAddress> = tx.authorizers.iter().copied().collect();
        addresses.insert(tx.payer);

        let rows: Vec<AccountCatalogEntry> = addresses
            .into_iter()
            .map(|address| AccountCatalogEntry {
                address,
                first_seen_height: tx.block_height,
                last_seen_height: tx.block_height,
                transaction_count: 1,
            })
            .collect();

        self.store.upsert_account_catalog(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TX METRICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Records per-transaction resource-usage metrics.
pub struct TxMetricsProcessor<D> {
    store: Arc<D>,
}

impl<D> TxMetricsProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for TxMetricsProcessor<D> {
    fn name(&self) -> &'static str {
        "tx_metrics"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let row = TxMetrics {
            tx_id: tx.id,
            block_height: tx.block_height,
            gas_used: tx.gas_used,
            event_count: u32::try_from(events.len()).unwrap_or(u32::MAX),
        };

        self.store.insert_tx_metrics(&[row]).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STAKING EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Decodes staking-contract events into [`StakingEvent`] rows.
pub struct StakingEventProcessor<D> {
    store: Arc<D>,
}

impl<D> StakingEventProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for StakingEventProcessor<D> {
    fn name(&self) -> &'static str {
        "staking_event"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut rows = Vec::new();

        for event in events.iter().filter(|e| e.kind == EventKind::Staking) {
            let node_address = cadence_address_opt(&event.payload, "address").unwrap_or(tx.payer);
            let amount = cadence_amount(&event.payload, "amount").ok();

            rows.push(StakingEvent {
                tx_id: tx.id,
                block_height: tx.block_height,
                node_address,
                action: event.short_name().to_string(),
                amount,
            });
        }

        if rows.is_empty() {
            return Ok(());
        }

        self.store.insert_staking_events(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFI EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Decodes DeFi protocol events (swaps, liquidity changes) into [`DefiEvent`]
/// rows, keeping the full payload for downstream analytics rather than
/// decoding protocol-specific field shapes here.
pub struct DefiEventProcessor<D> {
    store: Arc<D>,
}

impl<D> DefiEventProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for DefiEventProcessor<D> {
    fn name(&self) -> &'static str {
        "defi_event"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut rows = Vec::new();

        for event in events.iter().filter(|e| e.kind == EventKind::Defi) {
            let protocol = event
                .contract_address_hex()
                .and_then(|hex| FlowAddress::from_hex(hex).ok())
                .unwrap_or(FlowAddress::ZERO);

            rows.push(DefiEvent {
                tx_id: tx.id,
                block_height: tx.block_height,
                protocol,
                action: event.short_name().to_string(),
                payload: event.payload.clone(),
            });
        }

        if rows.is_empty() {
            return Ok(());
        }

        self.store.insert_defi_events(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS TX INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Denormalizes a per-address "transactions touching this address" index
/// from the payer, authorizers, and any transfer counterparties.
pub struct AddressTxIndexProcessor<D> {
    store: Arc<D>,
}

impl<D> AddressTxIndexProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for AddressTxIndexProcessor<D> {
    fn name(&self) -> &'static str {
        "address_tx_index"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut addresses: BTreeSet<FlowAddress> = tx.authorizers.iter().copied().collect();
        addresses.insert(tx.payer);

        for event in events.iter().filter(|e| {
            matches!(
                e.kind,
                EventKind::FungibleTokenTransfer | EventKind::NonFungibleTokenTransfer
            )
        }) {
            if let Some(addr) = cadence_address_opt(&event.payload, "from") {
                addresses.insert(addr);
            }
            if let Some(addr) = cadence_address_opt(&event.payload, "to") {
                addresses.insert(addr);
            }
        }

        let rows: Vec<AddressTxIndexEntry> = addresses
            .into_iter()
            .map(|address| AddressTxIndexEntry {
                address,
                tx_id: tx.id,
                block_height: tx.block_height,
            })
            .collect();

        self.store.insert_address_tx_index(&rows).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// Decodes account-key-management events into [`AccountKeyEvent`] rows.
pub struct AccountKeyProcessor<D> {
    store: Arc<D>,
}

impl<D> AccountKeyProcessor<D> {
    /// Construct a processor backed by `store`.
    pub const fn new(store: Arc<D>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<D: DerivedStore> Processor for AccountKeyProcessor<D> {
    fn name(&self) -> &'static str {
        "account_key"
    }

    fn phase(&self) -> Phase {
        Phase::One
    }

    async fn process(&self, tx: &Transaction, events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
        let mut rows = Vec::new();

        for event in events.iter().filter(|e| e.kind == EventKind::AccountKey) {
            let address = cadence_address_opt(&event.payload, "address").unwrap_or(tx.payer);
            let key_index = cadence_u64(&event.payload, "keyIndex").unwrap_or(0);
            let action = match event.short_name() {
                "AccountKeyAdded" => "added",
                "AccountKeyRemoved" => "revoked",
                other => {
                    warn!(event_type = other, "unexpected account-key event");
                    "unknown"
                }
            };

            rows.push(AccountKeyEvent {
                address,
                block_height: tx.block_height,
                key_index: u32::try_from(key_index).unwrap_or(u32::MAX),
                action: action.to_string(),
            });
        }

        if rows.is_empty() {
            return Ok(());
        }

        self.store.insert_account_key_events(&rows).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::types::{EventMetadata, FlowId, Height, TransactionStatus};

    fn sample_tx() -> Transaction {
        Transaction {
            id: FlowId::ZERO,
            block_id: FlowId::ZERO,
            block_height: Height::new(100),
            collection_id: FlowId::ZERO,
            index_in_block: 0,
            payer: FlowAddress::from_hex("0xf233dcee88fe0abe").unwrap(),
            authorizers: vec![],
            status: TransactionStatus::Sealed,
            gas_used: 10,
        }
    }

    fn withdrawn_event() -> FlowEvent {
        FlowEvent {
            meta: EventMetadata {
                block_height: Height::new(100),
                block_id: FlowId::ZERO,
                tx_id: FlowId::ZERO,
                tx_index: 0,
                event_index: 0,
                timestamp: Utc::now(),
            },
            event_type: "A.1654653399040a61.FlowToken.TokensWithdrawn".to_string(),
            payload: json!({
                "value": {
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "5.00000000"}},
                        {"name": "from", "value": {"type": "Optional", "value": {"type": "Address", "value": "0xf233dcee88fe0abe"}}},
                    ]
                }
            }),
            kind: EventKind::FungibleTokenTransfer,
        }
    }

    fn deposited_event() -> FlowEvent {
        FlowEvent {
            meta: EventMetadata {
                block_height: Height::new(100),
                block_id: FlowId::ZERO,
                tx_id: FlowId::ZERO,
                tx_index: 0,
                event_index: 1,
                timestamp: Utc::now(),
            },
            event_type: "A.1654653399040a61.FlowToken.TokensDeposited".to_string(),
            payload: json!({
                "value": {
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "5.00000000"}},
                        {"name": "to", "value": {"type": "Optional", "value": {"type": "Address", "value": "0x0000000000000002"}}},
                    ]
                }
            }),
            kind: EventKind::FungibleTokenTransfer,
        }
    }

    #[test]
    fn resource_type_substitution_matches_across_pair() {
        let w = resource_type_from_event_type(&withdrawn_event().event_type);
        let d = resource_type_from_event_type(&deposited_event().event_type);
        assert_eq!(w, d);
        assert_eq!(w, "A.1654653399040a61.FlowToken.Vault");
    }

    #[test]
    fn tx_tag_classification_is_deterministic() {
        let tx = sample_tx();
        let events = [withdrawn_event(), deposited_event()];
        let mut tags = BTreeSet::new();
        for event in &events {
            if event.kind == EventKind::FungibleTokenTransfer {
                tags.insert("fungible_token_transfer");
            }
        }
        assert_eq!(tags.len(), 1);
        assert_eq!(tx.block_height, Height::new(100));
    }
}
