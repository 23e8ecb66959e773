//! Unified wire representation of a raw Flow event, decoded from a
//! transaction's JSON-Cadence event payload.
//!
//! Unlike the teacher's `GhostnetEvent`, which modeled one Rust variant per
//! Solidity event signature, `FlowEvent` models the raw, un-interpreted shape
//! the Access API returns: type name, payload, and position. Turning a raw
//! event into a concrete derived row (a `TokenTransfer`, a `StakingEvent`, …)
//! is the job of the processors in [`crate::processors`], not this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::EventKind;
use super::primitives::{FlowId, Height};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Positional metadata attached to every ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Block height the event was emitted in.
    pub block_height: Height,
    /// Id of the block containing this event.
    pub block_id: FlowId,
    /// Transaction id that emitted this event.
    pub tx_id: FlowId,
    /// Index of the transaction within the block.
    pub tx_index: u32,
    /// Index of the event within the transaction's event list.
    pub event_index: u32,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLOW EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A single raw event emitted during transaction execution.
///
/// `non_exhaustive` because Cadence contracts evolve independently of this
/// indexer; new event types appear without a corresponding code change here
/// until a processor is written to interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FlowEvent {
    /// Positional metadata.
    pub meta: EventMetadata,
    /// Fully-qualified Cadence event type, e.g.
    /// `A.1654653399040a61.FlowToken.TokensWithdrawn`.
    pub event_type: String,
    /// JSON-Cadence encoded payload (fields are contract-defined).
    pub payload: serde_json::Value,
    /// Coarse routing classification, assigned at ingestion time by matching
    /// `event_type` against the configured event-kind table.
    pub kind: EventKind,
}

impl FlowEvent {
    /// Short name of the event, stripped of its contract-address prefix
    /// (e.g. `"TokensWithdrawn"` from `A.1654653399040a61.FlowToken.TokensWithdrawn`).
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.event_type.rsplit('.').next().unwrap_or(&self.event_type)
    }

    /// Address of the contract that emitted this event, if the type string
    /// follows the standard `A.<address>.<contract>.<event>` shape.
    #[must_use]
    pub fn contract_address_hex(&self) -> Option<&str> {
        let mut parts = self.event_type.split('.');
        if parts.next()? != "A" {
            return None;
        }
        parts.next()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(event_type: &str) -> FlowEvent {
        FlowEvent {
            meta: EventMetadata {
                block_height: Height::new(100),
                block_id: FlowId::ZERO,
                tx_id: FlowId::ZERO,
                tx_index: 0,
                event_index: 0,
                timestamp: Utc::now(),
            },
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            kind: EventKind::Unclassified,
        }
    }

    #[test]
    fn short_name_strips_prefix() {
        let event = sample_event("A.1654653399040a61.FlowToken.TokensWithdrawn");
        assert_eq!(event.short_name(), "TokensWithdrawn");
    }

    #[test]
    fn contract_address_extraction() {
        let event = sample_event("A.1654653399040a61.FlowToken.TokensWithdrawn");
        assert_eq!(event.contract_address_hex(), Some("1654653399040a61"));
    }

    #[test]
    fn contract_address_none_for_non_contract_events() {
        let event = sample_event("flow.AccountCreated");
        assert_eq!(event.contract_address_hex(), None);
    }
}
