//! Flow Indexer
//!
//! A high-performance Rust backend service that ingests blocks, transactions,
//! and events from the Flow blockchain's Access API, derives structured
//! projections from them, persists everything to Postgres, streams decoded
//! events via Apache Iggy, and exposes REST/WebSocket APIs over the result.
//!
//! # Architecture
//!
//! The indexer follows a hexagonal architecture, split into an ingestion
//! stage (raw chain data in) and a derivation stage (structured projections
//! out):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         INDEXER CORE                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Forward /   │  │    Live /    │  │  Processor   │          │
//! │  │   Backward    │─▶│   History    │─▶│   Registry   │          │
//! │  │   Ingester    │  │    Deriver   │  │ (Phase 1/2)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                                    │                  │
//! │         ▼                                    ▼                  │
//! │  ┌──────────────┐                     ┌──────────────┐          │
//! │  │   Rollback    │                     │   Committer  │          │
//! │  │    Engine     │                     │              │          │
//! │  └──────────────┘                     └──────┬───────┘          │
//! │                           ┌────────────────────┼──────────────┐ │
//! │                           ▼                    ▼              ▼ │
//! │                    ┌──────────────┐  ┌──────────────┐   ┌─────┐ │
//! │                    │   RawStore   │  │ DerivedStore │   │Cache│ │
//! │                    └──────────────┘  └──────────────┘   └─────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`] - Domain types (enums, events, entities, primitives)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`ports`] - Port traits for storage, streaming, caching, and time
//! - [`node_pool`] - Access Node client and live/historic connection pool
//! - [`indexer`] - Core pipeline: ingesters, derivers, committer, rollback, processor registry
//! - [`processors`] - Concrete Phase 1 / Phase 2 processors
//! - [`store`] - Postgres adapters for the storage ports
//! - [`streaming`] - Apache Iggy integration
//!
//! # Getting Started
//!
//! ```bash
//! # Set up environment
//! cp .env.example .env
//! # Edit .env with your configuration
//!
//! # Run migrations
//! sqlx migrate run
//!
//! # Start the indexer
//! cargo run -- run
//! ```

#![doc(html_root_url = "https://docs.flow-indexer.example/indexer")]

pub mod config;
pub mod error;
pub mod indexer;
pub mod node_pool;
pub mod ports;
pub mod processors;
pub mod store;
pub mod streaming;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
