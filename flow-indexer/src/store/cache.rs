//! In-memory cache implementation using moka and dashmap.
//!
//! Provides fast access to hot current-state projections without database
//! round-trips.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         MemoryCache                                  │
//! │                                                                     │
//! │   ┌─────────────────┐  ┌─────────────────┐                          │
//! │   │  FT Holding     │  │  NFT Ownership  │                          │
//! │   │  Cache (moka)   │  │  Cache (moka)   │                          │
//! │   └─────────────────┘  └─────────────────┘                          │
//! │                                                                     │
//! │   ┌─────────────────┐                                               │
//! │   │  Rate Limiter   │                                               │
//! │   │  (dashmap)      │                                               │
//! │   └─────────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # TTL Strategy
//!
//! | Cache | TTL | Max Size | Rationale |
//! |-------|-----|----------|-----------|
//! | FT holdings | 1 min | 50,000 | Phase 2 projections change on every transfer |
//! | NFT ownership | 1 min | 50,000 | Same; superseded continuously by later heights |
//!
//! # Rate Limiting
//!
//! Uses dashmap for high-concurrency rate limiting with a fixed window:
//! - Key format: `{identifier}:{window_start}`
//! - Windows are never explicitly cleaned; stale entries are overwritten
//!   the next time their window recurs, and `cleanup_rate_limits` can be
//!   called periodically to bound memory growth.
//!
//! # Usage
//!
//! ```ignore
//! use flow_indexer::store::MemoryCache;
//! use flow_indexer::ports::Cache;
//!
//! let cache = MemoryCache::new();
//!
//! cache.set_ft_holding(holding);
//!
//! if cache.check_rate_limit("ip:192.168.1.1", 100, 60) {
//!     // Process request
//! } else {
//!     // Return 429
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache as MokaCache;
use tracing::debug;

use crate::ports::{Cache, CacheStats};
use crate::types::{FlowAddress, FtHolding, NftOwnership};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// FT holding cache TTL (1 minute) — Phase 2 rows are continuously superseded.
const FT_HOLDING_TTL: Duration = Duration::from_secs(60);
/// FT holding cache max capacity.
const FT_HOLDING_MAX_CAPACITY: u64 = 50_000;

/// NFT ownership cache TTL (1 minute).
const NFT_OWNERSHIP_TTL: Duration = Duration::from_secs(60);
/// NFT ownership cache max capacity.
const NFT_OWNERSHIP_MAX_CAPACITY: u64 = 50_000;

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// High-performance in-memory cache using moka and dashmap.
///
/// Implements the `Cache` port trait with production-ready features:
/// - TTL-based expiration
/// - LRU eviction when capacity is reached
/// - Thread-safe concurrent access
/// - Hit/miss statistics for monitoring
///
/// # Thread Safety
///
/// All operations are thread-safe. The cache can be shared across tasks
/// via `Arc<MemoryCache>`.
#[derive(Debug)]
pub struct MemoryCache {
    /// FT holding cache, keyed by (address, token type).
    ft_holdings: MokaCache<(FlowAddress, String), FtHolding>,

    /// NFT ownership cache, keyed by (collection type, token id).
    nft_ownership: MokaCache<(String, u64), NftOwnership>,

    /// Rate limiter: key -> (window_start, count).
    rate_limits: Arc<DashMap<String, (u64, u32)>>,

    /// Cache hit counter.
    hits: AtomicU64,

    /// Cache miss counter.
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a new memory cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ft_holdings: MokaCache::builder()
                .max_capacity(FT_HOLDING_MAX_CAPACITY)
                .time_to_live(FT_HOLDING_TTL)
                .build(),

            nft_ownership: MokaCache::builder()
                .max_capacity(NFT_OWNERSHIP_MAX_CAPACITY)
                .time_to_live(NFT_OWNERSHIP_TTL)
                .build(),

            rate_limits: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache with custom TTLs for testing.
    #[must_use]
    pub fn with_ttls(ft_holding_ttl: Duration, nft_ownership_ttl: Duration) -> Self {
        Self {
            ft_holdings: MokaCache::builder()
                .max_capacity(FT_HOLDING_MAX_CAPACITY)
                .time_to_live(ft_holding_ttl)
                .build(),

            nft_ownership: MokaCache::builder()
                .max_capacity(NFT_OWNERSHIP_MAX_CAPACITY)
                .time_to_live(nft_ownership_ttl)
                .build(),

            rate_limits: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RATE LIMITING (Extended API)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Clean up old rate limit entries.
    ///
    /// Should be called periodically (e.g., every minute) to prevent memory
    /// growth from short-lived window keys.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub fn cleanup_rate_limits(&self, max_age_secs: u64) -> usize {
        let now = current_timestamp();
        let cutoff = now.saturating_sub(max_age_secs);

        let before = self.rate_limits.len();
        self.rate_limits
            .retain(|_, (window_start, _)| *window_start > cutoff);
        let after = self.rate_limits.len();

        let removed = before.saturating_sub(after);
        if removed > 0 {
            debug!(removed, "Cleaned up rate limit entries");
        }
        removed
    }

    /// Get the number of rate limit entries (for monitoring).
    #[must_use]
    pub fn rate_limit_entry_count(&self) -> usize {
        self.rate_limits.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run pending cache maintenance tasks.
    ///
    /// Moka performs maintenance lazily; this forces it to run immediately.
    /// Useful for tests or before taking memory measurements.
    pub fn run_pending_tasks(&self) {
        self.ft_holdings.run_pending_tasks();
        self.nft_ownership.run_pending_tasks();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE TRAIT IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

impl Cache for MemoryCache {
    fn get_ft_holding(&self, address: &FlowAddress, token_type: &str) -> Option<FtHolding> {
        let result = self.ft_holdings.get(&(*address, token_type.to_string()));
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn set_ft_holding(&self, holding: FtHolding) {
        let key = (holding.address, holding.token_type.clone());
        self.ft_holdings.insert(key, holding);
    }

    fn invalidate_ft_holding(&self, address: &FlowAddress, token_type: &str) {
        self.ft_holdings.invalidate(&(*address, token_type.to_string()));
    }

    fn get_nft_ownership(&self, collection_type: &str, token_id: u64) -> Option<NftOwnership> {
        let result = self
            .nft_ownership
            .get(&(collection_type.to_string(), token_id));
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn set_nft_ownership(&self, ownership: NftOwnership) {
        let key = (ownership.collection_type.clone(), ownership.token_id);
        self.nft_ownership.insert(key, ownership);
    }

    fn invalidate_nft_ownership(&self, collection_type: &str, token_id: u64) {
        self.nft_ownership
            .invalidate(&(collection_type.to_string(), token_id));
    }

    fn invalidate_all(&self) {
        self.ft_holdings.invalidate_all();
        self.nft_ownership.invalidate_all();
        debug!("Invalidated all projection caches");
    }

    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        let now = current_timestamp();
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        let mut entry = self
            .rate_limits
            .entry(cache_key)
            .or_insert((window_start, 0));

        if entry.0 != window_start {
            *entry = (window_start, 1);
            true
        } else if entry.1 < limit {
            entry.1 += 1;
            true
        } else {
            false
        }
    }

    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
        let now = current_timestamp();
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        self.rate_limits.get(&cache_key).map(|entry| {
            if entry.0 == window_start {
                limit.saturating_sub(entry.1)
            } else {
                limit
            }
        })
    }

    fn clear_all(&self) {
        self.ft_holdings.invalidate_all();
        self.nft_ownership.invalidate_all();
        self.rate_limits.clear();

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);

        debug!("Cleared all caches");
    }

    fn stats(&self) -> CacheStats {
        #[allow(clippy::cast_possible_truncation)]
        let ft_holding_count = self.ft_holdings.entry_count() as usize;
        #[allow(clippy::cast_possible_truncation)]
        let nft_ownership_count = self.nft_ownership.entry_count() as usize;

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ft_holding_count,
            nft_ownership_count,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Get current Unix timestamp in seconds.
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::thread::sleep;

    use super::*;
    use crate::types::{Height, TokenAmount};

    fn sample_address() -> FlowAddress {
        FlowAddress::from_hex("0xf233dcee88fe0abe").unwrap()
    }

    fn sample_ft_holding(address: FlowAddress) -> FtHolding {
        FtHolding {
            address,
            token_type: "A.1654653399040a61.FlowToken.Vault".into(),
            balance: TokenAmount::parse("100.00000000").unwrap(),
            as_of_height: Height::new(1000),
        }
    }

    fn sample_nft_ownership(address: FlowAddress) -> NftOwnership {
        NftOwnership {
            collection_type: "A.0b2a3299cc857e29.TopShot.NFT".into(),
            token_id: 42,
            owner: Some(address),
            as_of_height: Height::new(1000),
        }
    }

    #[test]
    fn ft_holding_cache_hit() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        let holding = sample_ft_holding(addr);

        cache.set_ft_holding(holding.clone());
        let found = cache.get_ft_holding(&addr, &holding.token_type);

        assert_eq!(found, Some(holding));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn ft_holding_cache_miss() {
        let cache = MemoryCache::new();
        let addr = sample_address();

        let found = cache.get_ft_holding(&addr, "A.1654653399040a61.FlowToken.Vault");

        assert!(found.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn ft_holding_invalidation() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        let holding = sample_ft_holding(addr);
        cache.set_ft_holding(holding.clone());

        cache.invalidate_ft_holding(&addr, &holding.token_type);
        cache.run_pending_tasks();

        assert!(cache.get_ft_holding(&addr, &holding.token_type).is_none());
    }

    #[test]
    fn nft_ownership_cache_hit() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        let ownership = sample_nft_ownership(addr);

        cache.set_nft_ownership(ownership.clone());
        let found = cache.get_nft_ownership(&ownership.collection_type, ownership.token_id);

        assert_eq!(found, Some(ownership));
    }

    #[test]
    fn nft_ownership_invalidation() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        let ownership = sample_nft_ownership(addr);
        cache.set_nft_ownership(ownership.clone());

        cache.invalidate_nft_ownership(&ownership.collection_type, ownership.token_id);
        cache.run_pending_tasks();

        assert!(
            cache
                .get_nft_ownership(&ownership.collection_type, ownership.token_id)
                .is_none()
        );
    }

    #[test]
    fn invalidate_all_clears_both_caches() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        cache.set_ft_holding(sample_ft_holding(addr));
        cache.set_nft_ownership(sample_nft_ownership(addr));

        cache.invalidate_all();
        cache.run_pending_tasks();

        assert_eq!(cache.stats().ft_holding_count, 0);
        assert_eq!(cache.stats().nft_ownership_count, 0);
    }

    #[test]
    fn rate_limit_allows_up_to_limit() {
        let cache = MemoryCache::new();

        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(!cache.check_rate_limit("test", 3, 60));
    }

    #[test]
    fn rate_limit_remaining_quota() {
        let cache = MemoryCache::new();

        assert_eq!(cache.get_rate_limit_remaining("fresh", 5, 60), None);
        cache.check_rate_limit("fresh", 5, 60);
        assert_eq!(cache.get_rate_limit_remaining("fresh", 5, 60), Some(4));
    }

    #[test]
    fn clear_all_resets_counters() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        cache.set_ft_holding(sample_ft_holding(addr));
        cache.get_ft_holding(&addr, "A.1654653399040a61.FlowToken.Vault");

        cache.clear_all();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.ft_holding_count, 0);
    }

    #[test]
    fn ttl_expiry() {
        let cache = MemoryCache::with_ttls(Duration::from_millis(50), Duration::from_secs(60));
        let addr = sample_address();
        cache.set_ft_holding(sample_ft_holding(addr));

        sleep(Duration::from_millis(150));
        cache.run_pending_tasks();

        assert!(cache.get_ft_holding(&addr, "A.1654653399040a61.FlowToken.Vault").is_none());
    }
}
