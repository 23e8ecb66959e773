//! Validated primitive types for domain entities.
//!
//! These newtypes provide:
//! - Type safety (can't accidentally pass a height as a tx index)
//! - Validation at construction time
//! - Domain semantics in function signatures

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// FLOW IDENTIFIER (32-byte block/tx/collection/execution-result id)
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte Flow identifier (block id, transaction id, collection id, …).
///
/// Flow identifies entities by the SHA3-256 hash of their canonical encoding.
/// All identity fields in the raw store are byte sequences; hex is only a
/// presentation-layer concern.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlowId([u8; 32]);

impl FlowId {
    /// The zero identifier, used as the parent of the spork root block.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidFlowId::WrongLength` if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidFlowId> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| InvalidFlowId::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from hex string (with or without 0x prefix).
    ///
    /// # Errors
    /// Returns `InvalidFlowId` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidFlowId> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 64 {
            return Err(InvalidFlowId::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidFlowId::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get as a byte slice (for binding into SQL queries).
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to lowercase hex string without a 0x prefix (Flow convention).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowId({})", self.to_hex())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<FlowId> for String {
    fn from(id: FlowId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for FlowId {
    type Error = InvalidFlowId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl TryFrom<&str> for FlowId {
    type Error = InvalidFlowId;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for FlowId {
    fn from(bytes: [u8; 32]) -> Self {
        Self::new(bytes)
    }
}

/// Error for invalid Flow identifiers.
#[derive(Debug, Clone, Error)]
pub enum InvalidFlowId {
    /// Identifier has wrong byte length.
    #[error("wrong length: expected 32 bytes, got {0}")]
    WrongLength(usize),
    /// Identifier contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLOW ADDRESS (8-byte account address)
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated 8-byte Flow account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlowAddress([u8; 8]);

impl FlowAddress {
    /// The zero address.
    pub const ZERO: Self = Self([0u8; 8]);

    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidAddress::WrongLength` if the slice is not exactly 8 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidAddress> {
        let bytes: [u8; 8] = slice
            .try_into()
            .map_err(|_| InvalidAddress::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from hex string (with or without 0x prefix).
    ///
    /// # Errors
    /// Returns `InvalidAddress` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidAddress> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 16 {
            return Err(InvalidAddress::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidAddress::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Get as a byte slice.
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to lowercase hex string with 0x prefix (Flow convention).
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Check if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Debug for FlowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlowAddress({})", self.to_hex())
    }
}

impl fmt::Display for FlowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<FlowAddress> for String {
    fn from(addr: FlowAddress) -> Self {
        addr.to_hex()
    }
}

impl TryFrom<String> for FlowAddress {
    type Error = InvalidAddress;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

/// Error for invalid Flow addresses.
#[derive(Debug, Clone, Error)]
pub enum InvalidAddress {
    /// Address has wrong byte length.
    #[error("wrong length: expected 8 bytes, got {0}")]
    WrongLength(usize),
    /// Address contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN AMOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-negative token amount with arbitrary precision.
///
/// Backed by `BigDecimal` for exact arithmetic (Flow fungible token balances
/// are `UFix64`, a fixed-point type with 8 decimal places of precision, so
/// floating point is never appropriate here).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(BigDecimal);

impl TokenAmount {
    /// Zero amount.
    #[must_use]
    pub fn zero() -> Self {
        Self(BigDecimal::from(0))
    }

    /// Create from `BigDecimal`, validating non-negative.
    ///
    /// # Errors
    /// Returns `InvalidAmount::Negative` if value is negative.
    pub fn new(value: BigDecimal) -> Result<Self, InvalidAmount> {
        if value.sign() == bigdecimal::num_bigint::Sign::Minus {
            return Err(InvalidAmount::Negative);
        }
        Ok(Self(value))
    }

    /// Build from a big-endian unsigned byte string, e.g. an EVM `value`
    /// field (wei, no fixed-point scaling unlike the native `UFix64` side).
    #[must_use]
    pub fn from_wei_be(bytes: &[u8]) -> Self {
        let magnitude = bigdecimal::num_bigint::BigUint::from_bytes_be(bytes);
        Self(BigDecimal::from(bigdecimal::num_bigint::BigInt::from(magnitude)))
    }

    /// Parse from string representation (e.g. a `UFix64` literal like `"1.50000000"`).
    ///
    /// # Errors
    /// Returns `InvalidAmount` if parsing fails or value is negative.
    pub fn parse(s: &str) -> Result<Self, InvalidAmount> {
        let value = BigDecimal::from_str(s).map_err(|_| InvalidAmount::ParseError)?;
        Self::new(value)
    }

    /// Get the underlying `BigDecimal`.
    #[must_use]
    pub const fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    /// Check if zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.sign() == bigdecimal::num_bigint::Sign::NoSign
    }

    /// Saturating addition.
    #[must_use]
    pub fn saturating_add(&self, other: &Self) -> Self {
        Self(&self.0 + &other.0)
    }

    /// Saturating subtraction (floors at zero).
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let result = &self.0 - &other.0;
        if result.sign() == bigdecimal::num_bigint::Sign::Minus {
            Self::zero()
        } else {
            Self(result)
        }
    }

    /// Convert to `sqlx::types::BigDecimal` for database storage.
    #[must_use]
    pub fn to_bigdecimal(&self) -> sqlx::types::BigDecimal {
        self.0.to_string().parse().unwrap_or_default()
    }

    /// Create from `sqlx::types::BigDecimal`.
    #[must_use]
    pub fn from_bigdecimal(value: &sqlx::types::BigDecimal) -> Self {
        let s = value.to_string();
        Self::parse(&s).unwrap_or_else(|_| Self::zero())
    }
}

impl fmt::Debug for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenAmount({})", self.0)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TokenAmount> for String {
    fn from(amount: TokenAmount) -> Self {
        amount.0.to_string()
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = InvalidAmount;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl Default for TokenAmount {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialOrd for TokenAmount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TokenAmount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// Error for invalid token amounts.
#[derive(Debug, Clone, Error)]
pub enum InvalidAmount {
    /// Amount cannot be negative.
    #[error("amount cannot be negative")]
    Negative,
    /// Failed to parse amount string.
    #[error("failed to parse amount")]
    ParseError,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEIGHT (block height newtype for clarity)
// ═══════════════════════════════════════════════════════════════════════════════

/// Block height newtype for clarity in function signatures.
///
/// Heights are monotone chain-wide within a spork but are not assumed to be
/// comparable across a spork boundary (see the glossary entry on sporks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Height(u64);

impl Height {
    /// The genesis/spork-root height.
    pub const ZERO: Self = Self(0);

    /// Create a new height.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Alias for `get()` for consistency with other newtypes.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next height (saturating at `u64::MAX`).
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous height (saturating at 0).
    #[must_use]
    pub const fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Number of heights between `self` (inclusive) and `other` (exclusive).
    #[must_use]
    pub fn distance_to(&self, other: Self) -> u64 {
        other.0.saturating_sub(self.0)
    }
}

impl From<u64> for Height {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl From<Height> for u64 {
    fn from(h: Height) -> Self {
        h.0
    }
}

impl From<Height> for i64 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(h: Height) -> Self {
        h.0 as Self
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod flow_id_tests {
        use super::*;

        #[test]
        fn from_hex_roundtrip() {
            let id = FlowId::from_hex(
                "1234567890123456789012345678901234567890123456789012345678901a",
            )
            .unwrap();
            assert_eq!(
                id.to_hex(),
                "1234567890123456789012345678901234567890123456789012345678901a"
            );
        }

        #[test]
        fn from_hex_wrong_length() {
            assert!(FlowId::from_hex("0x1234").is_err());
        }

        #[test]
        fn zero_id() {
            assert_eq!(FlowId::ZERO.as_bytes(), &[0u8; 32]);
        }
    }

    mod flow_address_tests {
        use super::*;

        #[test]
        fn from_hex_with_prefix() {
            let addr = FlowAddress::from_hex("0xf233dcee88fe0abe").unwrap();
            assert_eq!(addr.to_hex(), "0xf233dcee88fe0abe");
        }

        #[test]
        fn from_hex_wrong_length() {
            assert!(FlowAddress::from_hex("0x1234").is_err());
        }

        #[test]
        fn zero_address() {
            assert!(FlowAddress::ZERO.is_zero());
        }
    }

    mod token_amount_tests {
        use super::*;

        #[test]
        fn zero_is_zero() {
            assert!(TokenAmount::zero().is_zero());
        }

        #[test]
        fn parse_decimal() {
            let amount = TokenAmount::parse("123.456").unwrap();
            assert_eq!(amount.to_string(), "123.456");
        }

        #[test]
        fn parse_negative_fails() {
            assert!(TokenAmount::parse("-100").is_err());
        }

        #[test]
        fn saturating_sub_underflow() {
            let a = TokenAmount::parse("30").unwrap();
            let b = TokenAmount::parse("100").unwrap();
            assert!(a.saturating_sub(&b).is_zero());
        }
    }

    mod height_tests {
        use super::*;

        #[test]
        fn next_and_prev() {
            let h = Height::new(100);
            assert_eq!(h.next().get(), 101);
            assert_eq!(h.prev().get(), 99);
        }

        #[test]
        fn prev_saturates_at_zero() {
            assert_eq!(Height::ZERO.prev(), Height::ZERO);
        }

        #[test]
        fn distance_to() {
            assert_eq!(Height::new(10).distance_to(Height::new(15)), 5);
        }
    }
}
