//! Data persistence layer (adapters for store ports).
//!
//! This module provides concrete implementations of the store ports
//! defined in [`crate::ports::store`]. The primary implementation uses
//! plain `PostgreSQL`, with raw and Phase 1 tables range-partitioned by
//! height rather than TimescaleDB hypertables (see `DESIGN.md` for why).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store Adapters                            │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                  PostgresStore                            │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │  RawStore    │  │ DerivedStore │  │CheckpointStore│   │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   │   ┌──────────────┐  ┌──────────────┐                     │  │
//! │   │   │ LeaseStore   │  │ErrorLogStore │                     │  │
//! │   │   └──────────────┘  └──────────────┘                     │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                               │                                  │
//! │                               ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │              SQLx Connection Pool (PostgreSQL)             │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Range Partitioning
//!
//! Raw and Phase 1 tables are partitioned by `block_height` range, not by
//! timestamp. Height is the natural monotone key for a blockchain indexer
//! and lets the Rollback Engine's `delete_above_height` drop whole
//! partitions instead of scanning a btree index.
//!
//! | Table | Partition Column |
//! |-------|------------------|
//! | `blocks` | `height` |
//! | `transactions` | `block_height` |
//! | `events` | `block_height` |
//!
//! Phase 2 tables (`ft_holdings`, `nft_ownership`, `daily_balance_aggregates`)
//! are plain current-state tables keyed by their natural identity, not
//! partitioned, since they hold one row per entity rather than one row per
//! height.
//!
//! # Usage
//!
//! ```ignore
//! use flow_indexer::store::PostgresStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new()
//!     .max_connections(10)
//!     .connect("postgres://localhost/flow_indexer")
//!     .await?;
//!
//! sqlx::migrate!("./migrations").run(&pool).await?;
//!
//! let store = PostgresStore::new(pool);
//! let height = store.highest_ingested_height().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations are located in `migrations/` and run via `sqlx migrate run`.
//! See individual migration files for schema details.

mod cache;
mod postgres;

pub use cache::MemoryCache;
pub use postgres::PostgresStore;

// Re-export commonly used types for convenience
pub use sqlx::postgres::PgPool;
