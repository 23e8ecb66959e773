//! Committer: background reconciliation over lease-based work queues.
//!
//! Four concerns run on independent tickers for the lifetime of the
//! process: advancing a contiguous completion checkpoint per queue, reaping
//! leases whose worker died without releasing them, detecting gaps in the
//! completed-lease sequence, and raising alerts for dead-lettered leases.
//! None of these block each other; a slow gap scan on one queue doesn't
//! delay reaping on another.
//!
//! [`FailureRecorder`] is the narrower, synchronous piece every deriver and
//! async worker already depends on: it just writes one failure to the
//! durable error log. The background Committer above is layered on top of
//! the same [`ErrorLogStore`]/[`LeaseStore`] ports, not a replacement for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::checkpoint::CheckpointManager;
use crate::error::{AppError, Result};
use crate::ports::{CheckpointStore, ErrorLogStore, LeaseStore};
use crate::types::{ErrorEntry, Height};

const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
const GAP_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const DEAD_LETTER_SCAN_INTERVAL: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE RECORDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Records failures from a single named source to the error log.
pub struct FailureRecorder<E> {
    error_log: Arc<E>,
}

impl<E> FailureRecorder<E>
where
    E: ErrorLogStore,
{
    /// Construct a recorder backed by `error_log`.
    #[must_use]
    pub const fn new(error_log: Arc<E>) -> Self {
        Self { error_log }
    }

    /// Record a failure covering `[from, to]` from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the error log write itself fails.
    pub async fn record(&self, source: &str, from: Height, to: Height, error: &AppError) -> Result<()> {
        warn!(source, from = from.value(), to = to.value(), error = %error, "recording failure");

        let now = Utc::now();
        let entry = ErrorEntry {
            id: Uuid::new_v4(),
            source: source.to_string(),
            from_height: from,
            to_height: to,
            message: error.to_string(),
            attempt: 1,
            created_at: now,
            last_attempt_at: now,
        };

        self.error_log.record(&entry).await
    }

    /// List the most recent failures from `source`, for operator review.
    ///
    /// # Errors
    ///
    /// Returns an error if the error log query fails.
    pub async fn recent_failures(&self, source: &str, limit: u32) -> Result<Vec<ErrorEntry>> {
        self.error_log.list_for_source(source, limit).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMITTER
// ═══════════════════════════════════════════════════════════════════════════════

/// One lease-based queue the Committer reconciles.
pub struct QueueSpec {
    /// Lease queue name (matches [`crate::indexer::async_worker::ReconciliationJob::queue`]).
    pub queue: &'static str,
}

/// Background reconciliation process over one or more lease-based queues.
///
/// Leases in this codebase key on an opaque `item_key`, not a literal
/// height range, so "contiguous checkpoint advancement" and "gap
/// detection" are approximated against the numeric ordinal a queue's
/// `item_key` parses to (e.g. an NFT collection shard index, a day
/// offset) rather than a block height; queues whose `item_key` isn't
/// numeric are still reaped and dead-letter-alerted, just not
/// checkpointed or gap-scanned.
pub struct Committer<L, S, E> {
    lease_store: Arc<L>,
    error_log: Arc<E>,
    checkpoint_store: Arc<S>,
    queues: Vec<QueueSpec>,
}

impl<L, S, E> Committer<L, S, E>
where
    L: LeaseStore,
    S: CheckpointStore,
    E: ErrorLogStore,
{
    /// Construct a committer over `queues`.
    pub fn new(lease_store: Arc<L>, checkpoint_store: Arc<S>, error_log: Arc<E>, queues: Vec<QueueSpec>) -> Self {
        Self {
            lease_store,
            error_log,
            checkpoint_store,
            queues,
        }
    }

    fn checkpoint_name(queue: &str) -> String {
        format!("committer:{queue}")
    }

    /// Walk completed leases for `queue` in acquisition order and advance
    /// its committer checkpoint past the longest contiguous run of numeric
    /// item keys starting just after the current checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    #[instrument(skip(self), fields(queue = spec.queue))]
    async fn advance_contiguous_checkpoint(&self, spec: &QueueSpec) -> Result<()> {
        let manager = CheckpointManager::new(self.checkpoint_store.clone(), Self::checkpoint_name(spec.queue));
        let current = manager.load().await?.unwrap_or(Height::ZERO);

        let completed = self.lease_store.list_completed(spec.queue, 1000).await?;
        let mut ordinals: Vec<u64> = completed.iter().filter_map(|l| l.item_key.parse::<u64>().ok()).collect();
        ordinals.sort_unstable();
        ordinals.dedup();

        let mut next = current.value() + 1;
        let mut advanced = current;
        for ordinal in ordinals {
            if ordinal == next {
                advanced = Height::new(ordinal);
                next += 1;
            } else if ordinal > next {
                break;
            }
        }

        if advanced > current {
            manager.advance(advanced).await?;
            debug!(queue = spec.queue, from = current.value(), to = advanced.value(), "advanced committer checkpoint");
        }

        Ok(())
    }

    /// Reap expired active leases for `queue` so they become eligible for
    /// reclaim by a worker.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    #[instrument(skip(self), fields(queue = spec.queue))]
    async fn reap_queue(&self, spec: &QueueSpec) -> Result<()> {
        let reaped = self.lease_store.reap_expired(spec.queue, Utc::now(), 500).await?;
        if !reaped.is_empty() {
            warn!(queue = spec.queue, count = reaped.len(), "reaped expired leases to Failed");
        }
        Ok(())
    }

    /// Detect gaps in the numeric item-key sequence of completed leases for
    /// `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    #[instrument(skip(self), fields(queue = spec.queue))]
    async fn detect_gaps(&self, spec: &QueueSpec) -> Result<()> {
        let completed = self.lease_store.list_completed(spec.queue, 1000).await?;
        let mut ordinals: Vec<u64> = completed.iter().filter_map(|l| l.item_key.parse::<u64>().ok()).collect();
        ordinals.sort_unstable();
        ordinals.dedup();

        for window in ordinals.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if next > prev + 1 {
                warn!(queue = spec.queue, gap_start = prev + 1, gap_end = next - 1, "gap detected in completed leases");
            }
        }

        Ok(())
    }

    /// Raise a critical alert for every dead-lettered lease on `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    #[instrument(skip(self), fields(queue = spec.queue))]
    async fn alert_dead_letters(&self, spec: &QueueSpec) -> Result<()> {
        let dead = self.lease_store.list_dead_lettered(spec.queue).await?;
        for lease in dead {
            error!(
                queue = spec.queue,
                item_key = %lease.item_key,
                worker_id = %lease.worker_id,
                attempt = lease.attempt,
                "CRITICAL: lease exhausted retry budget and is dead-lettered"
            );
        }
        Ok(())
    }

    /// Record a failure covering `[from, to]` from `source`, delegating to
    /// a [`FailureRecorder`] over the same error log.
    ///
    /// # Errors
    ///
    /// Returns an error if the error log write fails.
    pub async fn record_failure(&self, source: &str, from: Height, to: Height, error: &AppError) -> Result<()> {
        FailureRecorder::new(self.error_log.clone()).record(source, from, to, error).await
    }

    /// Run the four reconciliation loops until `cancel` is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if any underlying store operation fails; callers
    /// should restart the Committer after logging such an error rather
    /// than treating it as fatal to the whole process.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut checkpoint_tick = interval(CHECKPOINT_INTERVAL);
        let mut reap_tick = interval(REAP_INTERVAL);
        let mut gap_tick = interval(GAP_SCAN_INTERVAL);
        let mut dead_letter_tick = interval(DEAD_LETTER_SCAN_INTERVAL);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("committer shutting down");
                    return Ok(());
                }
                _ = checkpoint_tick.tick() => {
                    for spec in &self.queues {
                        self.advance_contiguous_checkpoint(spec).await?;
                    }
                }
                _ = reap_tick.tick() => {
                    for spec in &self.queues {
                        self.reap_queue(spec).await?;
                    }
                }
                _ = gap_tick.tick() => {
                    for spec in &self.queues {
                        self.detect_gaps(spec).await?;
                    }
                }
                _ = dead_letter_tick.tick() => {
                    for spec in &self.queues {
                        self.alert_dead_letters(spec).await?;
                    }
                }
            }
        }
    }
}

