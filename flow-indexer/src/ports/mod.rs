//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the pipeline needs.
//! Following hexagonal architecture, adapters (in the infrastructure layer)
//! implement these traits to provide concrete functionality.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Pipeline Layer                             │
//! │                                                                 │
//! │  Uses ports (traits) to define what it needs                   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │ RawStore    │  │DerivedStore │  │CheckpointStore│           │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘            │
//! │         │                │                │                    │
//! └─────────┼────────────────┼────────────────┼────────────────────┘
//!           │                │                │
//!           ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Infrastructure Layer                        │
//! │                                                                 │
//! │  Provides adapters (implementations) for ports                 │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │PostgresStore│  │ PostgresStore│  │PostgresStore│            │
//! │  │(implements  │  │(implements  │  │(implements  │            │
//! │  │  RawStore)  │  │DerivedStore)│  │CheckpointStore)│          │
//! │  └─────────────┘  └─────────────┘  └─────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Port Categories
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Storage | [`RawStore`], [`DerivedStore`], [`CheckpointStore`], [`LeaseStore`], [`ErrorLogStore`] | Data persistence |
//! | Streaming | [`EventPublisher`] | Event broadcasting |
//! | Caching | [`Cache`] | In-memory caching |
//! | Time | [`Clock`] | Testable time operations |
//!
//! # Usage
//!
//! ```ignore
//! use flow_indexer::ports::{RawStore, Clock, SystemClock};
//!
//! // Pipeline code depends on traits, not implementations
//! async fn ingest_block<S: RawStore, C: Clock>(store: &S, clock: &C) -> Result<()> {
//!     let height = store.highest_ingested_height().await?;
//!     let now = clock.now();
//!     // ...
//!     Ok(())
//! }
//!
//! // In production, use real implementations
//! let store = PostgresRawStore::new(pool);
//! let clock = SystemClock;
//!
//! // In tests, use mocks
//! let store = MockRawStore::new();
//! let clock = FakeClock::new(fixed_time);
//! ```

mod cache;
mod clock;
mod store;
mod streaming;

// Re-export all port traits
pub use cache::Cache;
pub use clock::{Clock, SystemClock};
pub use store::{CheckpointStore, DerivedStore, ErrorLogStore, LeaseStore, RawStore};
pub use streaming::EventPublisher;

// Re-export test utilities for tests and downstream crates using test-utils feature
#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ports_are_send_sync() {
        // Compile-time check that all port traits require Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}

        fn check_checkpoint_store<T: CheckpointStore>() {
            assert_send_sync::<T>();
        }
        fn check_lease_store<T: LeaseStore>() {
            assert_send_sync::<T>();
        }
        fn check_error_log_store<T: ErrorLogStore>() {
            assert_send_sync::<T>();
        }
        fn check_raw_store<T: RawStore>() {
            assert_send_sync::<T>();
        }
        fn check_derived_store<T: DerivedStore>() {
            assert_send_sync::<T>();
        }
        fn check_event_publisher<T: EventPublisher>() {
            assert_send_sync::<T>();
        }
        fn check_cache<T: Cache>() {
            assert_send_sync::<T>();
        }
        fn check_clock<T: Clock>() {
            assert_send_sync::<T>();
        }
    }
}
