//! Caching port for in-memory data access.
//!
//! Defines the contract for caching frequently accessed current-state
//! projections to reduce database load on the API layer.

use crate::types::{FlowAddress, FtHolding, NftOwnership};

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for in-memory caching.
///
/// Provides fast access to frequently queried current-state data:
/// - Fungible-token holdings (by address + token type)
/// - NFT ownership (by collection type + token id)
/// - Rate limiting counters for the API layer
///
/// # Cache Invalidation
///
/// The cache uses a write-through pattern:
/// 1. The height-guarded upsert lands in the database first
/// 2. On success, cache is updated
/// 3. On cache miss, database is queried
///
/// # Implementation Notes
///
/// Implementations should:
/// - Use TTL-based expiration, since Phase 2 projections are continuously
///   superseded by later heights
/// - Be thread-safe (this trait requires `Send + Sync`)
pub trait Cache: Send + Sync {
    /// Get a cached FT holding.
    ///
    /// Returns `None` on cache miss.
    fn get_ft_holding(&self, address: &FlowAddress, token_type: &str) -> Option<FtHolding>;

    /// Cache an FT holding.
    fn set_ft_holding(&self, holding: FtHolding);

    /// Invalidate a cached FT holding.
    ///
    /// Call after a `FtHolding` upsert changes the stored balance.
    fn invalidate_ft_holding(&self, address: &FlowAddress, token_type: &str);

    /// Get a cached NFT ownership record.
    ///
    /// Returns `None` on cache miss.
    fn get_nft_ownership(&self, collection_type: &str, token_id: u64) -> Option<NftOwnership>;

    /// Cache an NFT ownership record.
    fn set_nft_ownership(&self, ownership: NftOwnership);

    /// Invalidate a cached NFT ownership record.
    fn invalidate_nft_ownership(&self, collection_type: &str, token_id: u64);

    /// Invalidate all cached projections.
    ///
    /// Call after a rollback, since cached entries may reflect heights that
    /// no longer exist.
    fn invalidate_all(&self);

    /// Check rate limit and record attempt.
    ///
    /// Returns `true` if the request is allowed (under limit).
    /// Returns `false` if rate limited.
    ///
    /// # Arguments
    ///
    /// * `key` - Rate limit key (e.g., IP address, API token)
    /// * `limit` - Maximum requests allowed
    /// * `window_secs` - Time window in seconds
    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool;

    /// Get remaining rate limit quota.
    ///
    /// Returns `None` if key hasn't been seen.
    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32>;

    /// Clear all cached data.
    fn clear_all(&self);

    /// Get cache statistics for monitoring.
    fn stats(&self) -> CacheStats;
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of cached FT holdings.
    pub ft_holding_count: usize,
    /// Number of cached NFT ownership records.
    pub nft_ownership_count: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate as a percentage.
    ///
    /// Precision loss in f64 conversion is acceptable for statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::expect_used,              // Test-only code; panicking on lock poison is acceptable
    clippy::significant_drop_tightening, // Lock patterns are clear in test code
    clippy::clone_on_copy             // Explicit clones are fine in tests
)]
pub mod mocks {
    //! Mock implementations for testing.

    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{Cache, CacheStats, FlowAddress, FtHolding, NftOwnership};

    /// Simple in-memory cache for testing.
    #[derive(Debug, Default)]
    pub struct MockCache {
        ft_holdings: RwLock<HashMap<(FlowAddress, String), FtHolding>>,
        nft_ownership: RwLock<HashMap<(String, u64), NftOwnership>>,
        rate_limits: RwLock<HashMap<String, (u32, u64)>>, // (count, window_start)
        hits: AtomicU64,
        misses: AtomicU64,
    }

    impl MockCache {
        /// Create a new mock cache.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Cache for MockCache {
        fn get_ft_holding(&self, address: &FlowAddress, token_type: &str) -> Option<FtHolding> {
            let holdings = self.ft_holdings.read().expect("lock poisoned");
            let found = holdings.get(&(address.clone(), token_type.to_string())).cloned();
            if found.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            found
        }

        fn set_ft_holding(&self, holding: FtHolding) {
            let mut holdings = self.ft_holdings.write().expect("lock poisoned");
            holdings.insert((holding.address.clone(), holding.token_type.clone()), holding);
        }

        fn invalidate_ft_holding(&self, address: &FlowAddress, token_type: &str) {
            let mut holdings = self.ft_holdings.write().expect("lock poisoned");
            holdings.remove(&(address.clone(), token_type.to_string()));
        }

        fn get_nft_ownership(&self, collection_type: &str, token_id: u64) -> Option<NftOwnership> {
            let ownership = self.nft_ownership.read().expect("lock poisoned");
            let found = ownership.get(&(collection_type.to_string(), token_id)).cloned();
            if found.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            found
        }

        fn set_nft_ownership(&self, ownership: NftOwnership) {
            let mut map = self.nft_ownership.write().expect("lock poisoned");
            map.insert((ownership.collection_type.clone(), ownership.token_id), ownership);
        }

        fn invalidate_nft_ownership(&self, collection_type: &str, token_id: u64) {
            let mut map = self.nft_ownership.write().expect("lock poisoned");
            map.remove(&(collection_type.to_string(), token_id));
        }

        fn invalidate_all(&self) {
            self.ft_holdings.write().expect("lock poisoned").clear();
            self.nft_ownership.write().expect("lock poisoned").clear();
        }

        fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
            let mut limits = self.rate_limits.write().expect("lock poisoned");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_secs();

            let (count, window_start) = limits.entry(key.to_string()).or_insert((0, now));

            if now - *window_start >= window_secs {
                *count = 0;
                *window_start = now;
            }

            if *count < limit {
                *count += 1;
                true
            } else {
                false
            }
        }

        fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
            let limits = self.rate_limits.read().expect("lock poisoned");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_secs();

            limits.get(key).map(|(count, window_start)| {
                if now - *window_start >= window_secs {
                    limit
                } else {
                    limit.saturating_sub(*count)
                }
            })
        }

        fn clear_all(&self) {
            self.ft_holdings.write().expect("lock poisoned").clear();
            self.nft_ownership.write().expect("lock poisoned").clear();
            self.rate_limits.write().expect("lock poisoned").clear();
        }

        fn stats(&self) -> CacheStats {
            CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                ft_holding_count: self.ft_holdings.read().expect("lock poisoned").len(),
                nft_ownership_count: self.nft_ownership.read().expect("lock poisoned").len(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockCache;
    use super::*;

    #[test]
    fn cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ft_holding_count: 10,
            nft_ownership_count: 3,
        };
        assert!((stats.hit_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_stats_hit_rate_zero() {
        let stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mock_cache_rate_limit() {
        let cache = MockCache::new();

        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));

        assert!(!cache.check_rate_limit("test", 3, 60));
    }
}
