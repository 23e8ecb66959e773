//! Core indexing pipeline: ingestion, derivation, and rollback recovery.
//!
//! This module contains the components that:
//! 1. Pull raw block envelopes from the Node Pool and persist them verbatim
//!    (the ingesters)
//! 2. Reconstruct typed events from stored rows and dispatch them to the
//!    processor registry (the derivers)
//! 3. Detect chain divergence and roll raw storage back to the common
//!    ancestor (the rollback engine)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           Indexer Pipeline                            │
//! │                                                                       │
//! │  ┌───────────────────┐        ┌───────────────────┐                  │
//! │  │ Forward Ingester   │──────▶│   Raw Store        │                  │
//! │  │ (tip-following)     │       │                    │                  │
//! │  └───────────────────┘        └─────────┬──────────┘                  │
//! │  ┌───────────────────┐                  │                             │
//! │  │ Backward Ingester   │──────▶──────────┘                             │
//! │  │ (floor-backfilling) │                 │                             │
//! │  └───────────────────┘                   ▼                             │
//! │                                  ┌───────────────────┐                 │
//! │                                  │   DeriverCore      │                 │
//! │                                  │ (event reconstruct │                 │
//! │                                  │  + dispatch)       │                 │
//! │                                  └─────────┬──────────┘                 │
//! │                      ┌─────────────────────┼─────────────────────┐     │
//! │                      ▼                                           ▼     │
//! │              ┌───────────────┐                           ┌───────────────┐
//! │              │ Live Deriver  │                           │ History Deriver│
//! │              └───────────────┘                           └───────────────┘
//! │                      │                                           │
//! │                      ▼                                           ▼
//! │              ┌─────────────────────────────────────────────────────┐
//! │              │               Processor Registry                    │
//! │              └─────────────────────────────────────────────────────┘
//! │                                                                       │
//! │  ┌───────────────────┐                                               │
//! │  │ Rollback Engine     │  triggered on `AppError::ReorgDetected`       │
//! │  └───────────────────┘                                               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use flow_indexer::indexer::{ForwardIngester, LiveDeriver, DeriverCore, default_registry};
//!
//! let cancel = CancellationToken::new();
//! let ingester = ForwardIngester::new(node_pool.clone(), raw_store.clone(), checkpoint_store.clone(), 4, 50);
//! let registry = Arc::new(default_registry(derived_store.clone()));
//! let core = DeriverCore::new(raw_store.clone(), registry, error_log.clone(), checkpoint_store.clone(), live_deriver::CHECKPOINT_NAME);
//! let deriver = LiveDeriver::new(core, raw_store, 10);
//!
//! tokio::try_join!(ingester.run(cancel.clone()), deriver.run(cancel))?;
//! ```

pub mod async_worker;
pub mod backward_ingester;
pub mod checkpoint;
pub mod committer;
pub mod deriver;
pub mod forward_ingester;
pub mod history_deriver;
pub mod live_deriver;
pub mod reorg;

pub use async_worker::{AsyncWorker, ReconciliationJob};
pub use backward_ingester::BackwardIngester;
pub use checkpoint::{CheckpointManager, RecoveryMode};
pub use committer::{Committer, FailureRecorder, QueueSpec};
pub use deriver::{default_registry, DeriverCore};
pub use forward_ingester::ForwardIngester;
pub use history_deriver::HistoryDeriver;
pub use live_deriver::LiveDeriver;
pub use reorg::RollbackEngine;
