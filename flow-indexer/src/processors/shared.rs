//! Shared JSON-Cadence payload decoding helpers.
//!
//! Flow encodes event payloads as [JSON-Cadence][spec]: every value is a
//! `{"type": ..., "value": ...}` envelope, and composite values (events,
//! structs) carry their fields as a `fields: [{"name", "value"}]` array
//! rather than a flat object. These helpers pull typed Rust values out of
//! that shape so individual processors stay free of JSON plumbing.
//!
//! [spec]: https://cadencelang.dev/docs/json-cadence-spec

use serde_json::Value;

use crate::error::{InfraError, Result};
use crate::types::{FlowAddress, TokenAmount};

/// Find a named field within a JSON-Cadence composite event payload and
/// return its inner `value` envelope.
#[must_use]
pub fn cadence_field<'a>(payload: &'a Value, name: &str) -> Option<&'a Value> {
    payload
        .get("value")?
        .get("fields")?
        .as_array()?
        .iter()
        .find(|f| f.get("name").and_then(Value::as_str) == Some(name))?
        .get("value")
}

/// Unwrap a JSON-Cadence `Optional` envelope, returning `None` for `nil`
/// and the inner envelope otherwise.
#[must_use]
pub fn cadence_unwrap_optional(envelope: &Value) -> Option<&Value> {
    if envelope.get("type").and_then(Value::as_str) == Some("Optional") {
        let inner = envelope.get("value")?;
        if inner.is_null() { None } else { Some(inner) }
    } else {
        Some(envelope)
    }
}

/// Decode a named `UFix64`/`Fix64` field as a [`TokenAmount`].
///
/// # Errors
///
/// Returns [`InfraError::EventDecoding`] if the field is missing or not a
/// valid fixed-point literal.
pub fn cadence_amount(payload: &Value, name: &str) -> Result<TokenAmount> {
    let envelope = cadence_field(payload, name)
        .ok_or_else(|| InfraError::EventDecoding(format!("missing field `{name}`")))?;
    let raw = envelope
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| InfraError::EventDecoding(format!("field `{name}` is not a string literal")))?;
    TokenAmount::parse(raw)
        .map_err(|e| InfraError::EventDecoding(format!("invalid amount in `{name}`: {e}")).into())
}

/// Decode a named `Address` field, following through an `Optional` wrapper
/// if present. Returns `None` if the field is absent or `nil` (mints and
/// burns have no sender/recipient address).
#[must_use]
pub fn cadence_address_opt(payload: &Value, name: &str) -> Option<FlowAddress> {
    let envelope = cadence_field(payload, name)?;
    let envelope = cadence_unwrap_optional(envelope)?;
    let raw = envelope.get("value")?.as_str()?;
    FlowAddress::from_hex(raw).ok()
}

/// Decode a named `UInt64`-ish integer field.
///
/// # Errors
///
/// Returns [`InfraError::EventDecoding`] if the field is missing or not a
/// valid integer literal.
pub fn cadence_u64(payload: &Value, name: &str) -> Result<u64> {
    let envelope = cadence_field(payload, name)
        .ok_or_else(|| InfraError::EventDecoding(format!("missing field `{name}`")))?;
    let raw = envelope
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| InfraError::EventDecoding(format!("field `{name}` is not a string literal")))?;
    raw.parse()
        .map_err(|_| InfraError::EventDecoding(format!("invalid integer in `{name}`")).into())
}

/// Decode a named string field (e.g. a resource identifier or type name).
///
/// # Errors
///
/// Returns [`InfraError::EventDecoding`] if the field is missing or not a
/// `String` value.
pub fn cadence_string(payload: &Value, name: &str) -> Result<String> {
    let envelope = cadence_field(payload, name)
        .ok_or_else(|| InfraError::EventDecoding(format!("missing field `{name}`")))?;
    envelope
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InfraError::EventDecoding(format!("field `{name}` is not a string")).into())
}

/// Decode a named hex-string field (with or without `0x` prefix) into a
/// fixed-size byte array, e.g. an EVM transaction hash or address.
///
/// # Errors
///
/// Returns [`InfraError::EventDecoding`] if the field is missing, not a
/// string, not valid hex, or not exactly `N` bytes long.
pub fn cadence_fixed_bytes<const N: usize>(payload: &Value, name: &str) -> Result<[u8; N]> {
    let raw = cadence_string(payload, name)?;
    let raw = raw.strip_prefix("0x").unwrap_or(&raw);
    let bytes = hex::decode(raw)
        .map_err(|_| InfraError::EventDecoding(format!("field `{name}` is not valid hex")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| InfraError::EventDecoding(format!("field `{name}` has {} bytes, expected {N}", b.len())).into())
}

/// Decode a named `[UInt8]` field into raw bytes, e.g. an EVM transaction's
/// RLP-encoded `payload`.
///
/// # Errors
///
/// Returns [`InfraError::EventDecoding`] if the field is missing, not an
/// array, or contains a non-byte element.
pub fn cadence_bytes(payload: &Value, name: &str) -> Result<Vec<u8>> {
    let envelope = cadence_field(payload, name)
        .ok_or_else(|| InfraError::EventDecoding(format!("missing field `{name}`")))?;
    let items = envelope
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| InfraError::EventDecoding(format!("field `{name}` is not an array")))?;
    items
        .iter()
        .map(|item| {
            item.get("value")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<u8>().ok())
                .ok_or_else(|| InfraError::EventDecoding(format!("field `{name}` contains a non-byte element")).into())
        })
        .collect()
}

/// Extract the fully-qualified vault/collection type from a transfer
/// event's type string, e.g.
/// `A.1654653399040a61.FlowToken.TokensWithdrawn` -> `A.1654653399040a61.FlowToken.Vault`.
///
/// Cadence transfer events name the type after the vault/collection they
/// move, not the event itself, so the last path segment is replaced with
/// the resource name the pair of events shares.
#[must_use]
pub fn resource_type_from_event_type(event_type: &str) -> String {
    let mut parts: Vec<&str> = event_type.split('.').collect();
    if let Some(last) = parts.last_mut() {
        *last = resource_name_hint(last);
    }
    parts.join(".")
}

fn resource_name_hint(_event_name: &str) -> &'static str {
    "Vault"
}

/// Extract the fully-qualified NFT collection type from a `Withdraw`/
/// `Deposit` event's type string, e.g.
/// `A.329feb3ab062d289.ExampleNFT.Withdraw` -> `A.329feb3ab062d289.ExampleNFT.NFT`.
#[must_use]
pub fn nft_collection_type_from_event_type(event_type: &str) -> String {
    let mut parts: Vec<&str> = event_type.split('.').collect();
    if let Some(last) = parts.last_mut() {
        *last = "NFT";
    }
    parts.join(".")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "type": "Event",
            "value": {
                "id": "A.1654653399040a61.FlowToken.TokensWithdrawn",
                "fields": [
                    {"name": "amount", "value": {"type": "UFix64", "value": "12.50000000"}},
                    {"name": "from", "value": {"type": "Optional", "value": {"type": "Address", "value": "0xf233dcee88fe0abe"}}},
                    {"name": "to", "value": {"type": "Optional", "value": null}},
                ]
            }
        })
    }

    #[test]
    fn decodes_amount() {
        let amount = cadence_amount(&sample_payload(), "amount").unwrap();
        assert_eq!(amount.to_string(), "12.50000000");
    }

    #[test]
    fn decodes_present_optional_address() {
        let addr = cadence_address_opt(&sample_payload(), "from").unwrap();
        assert_eq!(addr.to_hex(), "0xf233dcee88fe0abe");
    }

    #[test]
    fn nil_optional_address_is_none() {
        assert!(cadence_address_opt(&sample_payload(), "to").is_none());
    }

    #[test]
    fn missing_field_is_none() {
        assert!(cadence_field(&sample_payload(), "nonexistent").is_none());
    }
}
