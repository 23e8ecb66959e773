//! HTTP client for the Flow Access API (REST).
//!
//! Flow's Access Nodes expose a REST API (`/v1/blocks`, `/v1/collections`,
//! `/v1/transaction_results`, `/v1/events`, …) in addition to the canonical
//! gRPC Access API. This client talks to the REST surface, which keeps the
//! dependency stack aligned with the teacher's plain-`reqwest` RPC client
//! rather than pulling in a gRPC stack for this one adapter.
//!
//! # Wire shapes
//!
//! Only the fields the pipeline needs are modeled; unknown fields in Access
//! Node responses are ignored by `serde`.
//!
//! # Usage
//!
//! ```ignore
//! use flow_indexer::node_pool::AccessNodeClient;
//! use flow_indexer::types::Height;
//!
//! let client = AccessNodeClient::new("https://rest-mainnet.onflow.org", Height::ZERO)?;
//! let height = client.latest_sealed_height().await?;
//! let envelope = client.fetch_block_envelope(height).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{InfraError, Result};
use crate::types::{
    Block, Collection, Event, EventKind, ExecutionResult, FlowAddress, FlowId, Height,
    ScriptBody, Transaction, TransactionStatus,
};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default request timeout for Access Node REST calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum transaction results fetched concurrently when assembling a block.
const MAX_CONCURRENT_TX_FETCHES: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct BlockResponse {
    header: BlockHeaderResponse,
    payload: BlockPayloadResponse,
    execution_result: Option<ExecutionResultResponse>,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderResponse {
    id: String,
    parent_id: String,
    height: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BlockPayloadResponse {
    collection_guarantees: Vec<CollectionGuaranteeResponse>,
}

#[derive(Debug, Deserialize)]
struct CollectionGuaranteeResponse {
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionResultResponse {
    block_id: String,
    previous_result_id: String,
    #[serde(default)]
    block_state_commitment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
    transactions: Vec<CollectionTransactionRef>,
}

#[derive(Debug, Deserialize)]
struct CollectionTransactionRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResultResponse {
    status: String,
    error_message: String,
    computation_used: String,
    events: Vec<EventResponse>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    payer: String,
    proposal_key: ProposalKeyResponse,
    authorizers: Vec<String>,
    script: String,
    #[serde(default)]
    arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProposalKeyResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(rename = "type")]
    event_type: String,
    payload: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCESS NODE CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A fully-assembled block: header, transactions, events, and supporting
/// entities, ready to be handed to [`crate::ports::RawStore::insert_block`].
#[derive(Debug, Clone)]
pub struct BlockEnvelope {
    /// Block header.
    pub block: Block,
    /// Transactions sealed in this block, in execution order.
    pub transactions: Vec<Transaction>,
    /// Events emitted by those transactions, in block order.
    pub events: Vec<Event>,
    /// Sealed execution result, if the Access Node returned one.
    pub execution_result: Option<ExecutionResult>,
    /// Collections guaranteed by this block.
    pub collections: Vec<Collection>,
    /// Raw Cadence source for each transaction.
    pub scripts: Vec<ScriptBody>,
}

/// HTTP client for a single Flow Access Node's REST API.
///
/// Holds the spork floor the node can serve from; requests below that
/// height fail fast with [`InfraError::BelowSporkFloor`] rather than
/// reaching the network only to be rejected by the node.
#[derive(Debug)]
pub struct AccessNodeClient {
    client: reqwest::Client,
    base_url: String,
    spork_floor: Height,
    request_id: AtomicU64,
}

impl AccessNodeClient {
    /// Create a new client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, spork_floor: Height) -> Result<Self> {
        Self::with_timeout(base_url, spork_floor, DEFAULT_TIMEOUT)
    }

    /// Create a new client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        spork_floor: Height,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InfraError::Rpc(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spork_floor,
            request_id: AtomicU64::new(0),
        })
    }

    /// The lowest height this client's spork can serve.
    #[must_use]
    pub const fn spork_floor(&self) -> Height {
        self.spork_floor
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_above_spork_floor(&self, height: Height) -> Result<()> {
        if height < self.spork_floor {
            return Err(InfraError::BelowSporkFloor {
                floor: self.spork_floor,
            }
            .into());
        }
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request_id = self.next_request_id();
        let url = format!("{}{}", self.base_url, path);
        debug!(request_id, %url, "access node request");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                InfraError::Timeout(format!("access node request timed out: {e}"))
            } else {
                InfraError::Rpc(format!("access node request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(InfraError::Rpc(format!(
                "access node returned {}: {}",
                response.status(),
                url
            ))
            .into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| InfraError::Rpc(format!("failed to decode access node response: {e}")).into())
    }

    /// Fetch the latest sealed block height.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    #[instrument(skip(self))]
    pub async fn latest_sealed_height(&self) -> Result<Height> {
        let blocks: Vec<BlockResponse> = self.get_json("/v1/blocks?height=sealed").await?;
        let block = blocks
            .into_iter()
            .next()
            .ok_or_else(|| InfraError::Rpc("access node returned no sealed block".into()))?;
        parse_height(&block.header.height)
    }

    /// Fetch a single block header (and its sealed execution result, if
    /// available) by height, without its transactions.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::BelowSporkFloor`] if `height` predates this
    /// client's spork, or an error if the request fails.
    #[instrument(skip(self), fields(height = height.value()))]
    pub async fn get_block_header(
        &self,
        height: Height,
    ) -> Result<Option<(Block, Vec<FlowId>, Option<ExecutionResult>)>> {
        self.ensure_above_spork_floor(height)?;

        let path = format!("/v1/blocks?height={}&expand=execution_result", height.value());
        let blocks: Vec<BlockResponse> = self.get_json(&path).await?;
        let Some(response) = blocks.into_iter().next() else {
            return Ok(None);
        };

        let id = parse_flow_id(&response.header.id)?;
        let parent_id = parse_flow_id(&response.header.parent_id)?;
        let collection_ids = response
            .payload
            .collection_guarantees
            .iter()
            .map(|g| parse_flow_id(&g.collection_id))
            .collect::<Result<Vec<_>>>()?;

        let execution_result = response
            .execution_result
            .map(|er| {
                let block_id = parse_flow_id(&er.block_id)?;
                let previous_result_id = parse_flow_id(&er.previous_result_id)?;
                let block_state_commitment = er
                    .block_state_commitment
                    .map(|hex_str| hex::decode(hex_str.trim_start_matches("0x")))
                    .transpose()
                    .map_err(|e| InfraError::Rpc(format!("invalid state commitment hex: {e}")))?
                    .unwrap_or_default();
                Ok::<_, crate::error::AppError>(ExecutionResult {
                    block_id,
                    previous_result_id,
                    block_state_commitment,
                })
            })
            .transpose()?;

        let block = Block {
            id,
            height,
            parent_id,
            timestamp: response.header.timestamp,
            collection_ids: collection_ids.clone(),
            spork_id: self.base_url.clone(),
        };

        Ok(Some((block, collection_ids, execution_result)))
    }

    /// Fetch a collection's transaction ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    #[instrument(skip(self))]
    pub async fn get_collection(&self, id: FlowId) -> Result<Collection> {
        let path = format!("/v1/collections/{}", id.to_hex());
        let response: CollectionResponse = self.get_json(&path).await?;

        let transaction_ids = response
            .transactions
            .iter()
            .map(|t| parse_flow_id(&t.id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Collection {
            id: parse_flow_id(&response.id)?,
            transaction_ids,
        })
    }

    /// Fetch a transaction's result (status, gas, events) and its source.
    ///
    /// # Errors
    ///
    /// Returns an error if either request fails or the response is
    /// malformed.
    #[instrument(skip(self))]
    pub async fn get_transaction_result(
        &self,
        tx_id: FlowId,
        block_id: FlowId,
        block_height: Height,
        collection_id: FlowId,
        index_in_block: u32,
    ) -> Result<(Transaction, Vec<Event>, ScriptBody)> {
        let hex_id = tx_id.to_hex();
        let (result, tx): (TransactionResultResponse, TransactionResponse) = tokio::try_join!(
            self.get_json(&format!("/v1/transaction_results/{hex_id}")),
            self.get_json(&format!("/v1/transactions/{hex_id}")),
        )?;

        let payer = parse_flow_address(&tx.payer)?;
        let authorizers = tx
            .authorizers
            .iter()
            .map(|a| parse_flow_address(a))
            .collect::<Result<Vec<_>>>()?;

        let status = match result.status.as_str() {
            "Sealed" if result.error_message.is_empty() => TransactionStatus::Sealed,
            "Sealed" => TransactionStatus::Failed {
                error_message: result.error_message.clone(),
            },
            _ => TransactionStatus::Pending,
        };

        let gas_used: u64 = result
            .computation_used
            .parse()
            .map_err(|_| InfraError::EventDecoding("invalid computation_used".into()))?;

        let mut events = Vec::with_capacity(result.events.len());
        for (event_index, raw) in result.events.iter().enumerate() {
            let payload: serde_json::Value = serde_json::from_str(&raw.payload)
                .map_err(|_| InfraError::EventDecoding(format!("invalid event payload for {hex_id}")))?;

            events.push(Event {
                tx_id,
                block_height,
                #[allow(clippy::cast_possible_truncation)]
                event_index: event_index as u32,
                event_type: raw.event_type.clone(),
                payload,
                kind: EventKind::classify(&raw.event_type),
            });
        }

        let arguments = tx
            .arguments
            .iter()
            .map(|a| {
                serde_json::from_str(a)
                    .map_err(|_| InfraError::EventDecoding("invalid transaction argument".into()).into())
            })
            .collect::<Result<Vec<_>>>()?;

        let transaction = Transaction {
            id: tx_id,
            block_id,
            block_height,
            collection_id,
            index_in_block,
            payer,
            authorizers,
            status,
            gas_used,
        };

        let script = ScriptBody {
            tx_id,
            script: tx.script.clone(),
            arguments,
        };

        Ok((transaction, events, script))
    }

    /// Assemble a complete block: header, collections, transactions, and
    /// events, fetching transaction results concurrently in bounded
    /// batches.
    ///
    /// Returns `None` if the Access Node has no block at `height` yet (the
    /// forward ingester's signal to stop and wait).
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::BelowSporkFloor`] if `height` predates this
    /// client's spork, or an error if any underlying request fails.
    #[instrument(skip(self), fields(height = height.value()))]
    pub async fn fetch_block_envelope(&self, height: Height) -> Result<Option<BlockEnvelope>> {
        let Some((block, collection_ids, execution_result)) = self.get_block_header(height).await?
        else {
            return Ok(None);
        };

        let mut collections = Vec::with_capacity(collection_ids.len());
        let mut tx_refs: Vec<(FlowId, FlowId, FlowId)> = Vec::new();
        for collection_id in &collection_ids {
            let collection = self.get_collection(*collection_id).await?;
            for tx_id in &collection.transaction_ids {
                tx_refs.push((*tx_id, block.id, *collection_id));
            }
            collections.push(collection);
        }

        let mut transactions = Vec::with_capacity(tx_refs.len());
        let mut events = Vec::new();
        let mut scripts = Vec::with_capacity(tx_refs.len());

        for chunk in tx_refs.chunks(MAX_CONCURRENT_TX_FETCHES) {
            let futures = chunk.iter().enumerate().map(|(offset, (tx_id, block_id, collection_id))| {
                #[allow(clippy::cast_possible_truncation)]
                let index_in_block = (transactions.len() + offset) as u32;
                self.get_transaction_result(*tx_id, *block_id, height, *collection_id, index_in_block)
            });

            for result in join_all(futures).await {
                match result {
                    Ok((tx, tx_events, script)) => {
                        transactions.push(tx);
                        events.extend(tx_events);
                        scripts.push(script);
                    }
                    Err(e) => {
                        warn!(height = height.value(), error = ?e, "failed to fetch transaction result");
                        return Err(e);
                    }
                }
            }
        }

        Ok(Some(BlockEnvelope {
            block,
            transactions,
            events,
            execution_result,
            collections,
            scripts,
        }))
    }

    /// Fetch events of a single type across a height range, for targeted
    /// backfill of one event family without re-walking whole blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    #[instrument(skip(self))]
    pub async fn get_events_for_height_range(
        &self,
        event_type: &str,
        from: Height,
        to: Height,
    ) -> Result<Vec<Event>> {
        self.ensure_above_spork_floor(from)?;

        let path = format!(
            "/v1/events?type={event_type}&start_height={}&end_height={}",
            from.value(),
            to.value()
        );

        #[derive(Debug, Deserialize)]
        struct EventsByBlockResponse {
            block_height: String,
            events: Vec<EventAtHeightResponse>,
        }

        #[derive(Debug, Deserialize)]
        struct EventAtHeightResponse {
            #[serde(rename = "type")]
            event_type: String,
            transaction_id: String,
            payload: String,
        }

        let blocks: Vec<EventsByBlockResponse> = self.get_json(&path).await?;
        let mut events = Vec::new();
        for block in blocks {
            let block_height = parse_height(&block.block_height)?;
            for (event_index, raw) in block.events.iter().enumerate() {
                let payload: serde_json::Value = serde_json::from_str(&raw.payload)
                    .map_err(|_| InfraError::EventDecoding("invalid event payload".into()))?;
                events.push(Event {
                    tx_id: parse_flow_id(&raw.transaction_id)?,
                    block_height,
                    #[allow(clippy::cast_possible_truncation)]
                    event_index: event_index as u32,
                    event_type: raw.event_type.clone(),
                    payload,
                    kind: EventKind::classify(&raw.event_type),
                });
            }
        }

        Ok(events)
    }
}

fn parse_height(s: &str) -> Result<Height> {
    s.parse::<u64>()
        .map(Height::new)
        .map_err(|_| InfraError::Rpc(format!("invalid height in access node response: {s}")).into())
}

fn parse_flow_id(s: &str) -> Result<FlowId> {
    FlowId::from_hex(s).map_err(|e| InfraError::AddressParsing(e.to_string()).into())
}

fn parse_flow_address(s: &str) -> Result<FlowAddress> {
    FlowAddress::from_hex(s).map_err(|e| InfraError::AddressParsing(e.to_string()).into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_height_rejects_garbage() {
        assert!(parse_height("not-a-number").is_err());
    }

    #[test]
    fn parse_height_accepts_decimal() {
        assert_eq!(parse_height("12345").unwrap(), Height::new(12345));
    }

    #[test]
    fn client_rejects_below_spork_floor() {
        let client = AccessNodeClient::new("https://rest-mainnet.onflow.org", Height::new(1000))
            .expect("client builds");
        assert!(client.ensure_above_spork_floor(Height::new(999)).is_err());
        assert!(client.ensure_above_spork_floor(Height::new(1000)).is_ok());
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let client = AccessNodeClient::new("https://rest-mainnet.onflow.org/", Height::ZERO)
            .expect("client builds");
        assert_eq!(client.base_url, "https://rest-mainnet.onflow.org");
    }
}
