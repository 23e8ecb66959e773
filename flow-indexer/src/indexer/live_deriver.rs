//! Live Deriver: follows the Forward Ingester, deriving each newly ingested
//! height as soon as it lands.
//!
//! The ingester calls [`LiveDeriver::notify_range`] after every batch it
//! persists; concurrent notifications coalesce into a single pending range
//! rather than queueing one wakeup per call, so a burst of small batches
//! collapses into one derive pass over their union. The pending range is
//! walked in [`LiveChunk`]-sized chunks: within a chunk every height's Phase 1
//! processors run concurrently and are awaited together, then every height's
//! Phase 2 processors run concurrently and are awaited together, so a chunk
//! never lets Phase 2 see a height Phase 1 hasn't finished.
//!
//! A chunk (or a single height within it) that fails is pushed onto a bounded
//! retry queue with exponential backoff (5s, 10s, 20s) rather than blocking
//! the main loop; after exhausting its attempts it is dropped with a warning
//! and left for the Committer's gap detection to surface.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use std::sync::Mutex;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::deriver::DeriverCore;
use crate::error::Result;
use crate::ports::{CheckpointStore, ErrorLogStore, RawStore};
use crate::types::{Height, Phase};

/// Polling interval once the deriver has caught up to the highest ingested
/// height and has no pending notification.
const CAUGHT_UP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff schedule for a failed chunk, in attempt order.
const RETRY_BACKOFF: [Duration; 3] = [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)];

/// Checkpoint name prefix for the live deriver.
pub const CHECKPOINT_NAME: &str = "live_deriver";

/// A height range queued for retry after a failed derive pass.
struct RetryItem {
    range: Range<u64>,
    attempt: usize,
}

/// Coalesces concurrent `notify_range` calls into a single pending range.
#[derive(Default)]
struct PendingRange {
    range: Mutex<Option<Range<u64>>>,
    notify: Notify,
}

impl PendingRange {
    fn merge(&self, from: u64, to: u64) {
        let mut guard = self.range.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(match guard.take() {
            Some(existing) => existing.start.min(from)..existing.end.max(to),
            None => from..to,
        });
    }

    fn take(&self) -> Option<Range<u64>> {
        self.range.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }
}

/// Derives newly ingested heights in order, as close to real time as the
/// Forward Ingester allows.
pub struct LiveDeriver<R, S, E> {
    core: DeriverCore<R, S, E>,
    raw_store: Arc<R>,
    pending: PendingRange,
    chunk_size: u64,
}

impl<R, S, E> LiveDeriver<R, S, E>
where
    R: RawStore,
    S: CheckpointStore,
    E: ErrorLogStore,
{
    /// Construct a live deriver over `core`, reading the ingestion frontier
    /// from `raw_store` and chunking pending work by `chunk_size`.
    pub fn new(core: DeriverCore<R, S, E>, raw_store: Arc<R>, chunk_size: u32) -> Self {
        Self {
            core,
            raw_store,
            pending: PendingRange::default(),
            chunk_size: u64::from(chunk_size.max(1)),
        }
    }

    /// Notify the deriver that heights `[from, to]` (inclusive) have been
    /// ingested and are ready to derive. Concurrent calls coalesce into the
    /// union of their ranges rather than each triggering a separate pass.
    pub fn notify_range(&self, from: Height, to: Height) {
        self.pending.merge(from.value(), to.value() + 1);
        self.pending.notify.notify_one();
    }

    async fn checkpoint_start(&self) -> Result<Height> {
        // The slowest processor's checkpoint is the true resume point: no
        // chunk below it can be skipped without leaving that processor
        // permanently behind.
        let mut min = None;
        for cp in self.core.checkpoints() {
            let height = cp.get_start_height().await?;
            min = Some(match min {
                Some(current) => std::cmp::min(current, height),
                None => height,
            });
        }
        Ok(min.unwrap_or(Height::ZERO))
    }

    /// Derive one chunk of heights, running every height's Phase 1
    /// processors concurrently, awaiting them all, then doing the same for
    /// Phase 2.
    ///
    /// Returns `Ok(true)` if every height in the chunk fully succeeded.
    async fn derive_chunk(&self, range: &Range<u64>) -> Result<bool> {
        let heights: Vec<Height> = range.clone().map(Height::new).collect();

        let phase1: Vec<_> = heights.iter().map(|&h| self.core.derive_height_phase(h, Phase::One, CHECKPOINT_NAME)).collect();
        let phase1_results = join_all(phase1).await;
        let mut all_ok = true;
        for result in phase1_results {
            all_ok &= result?;
        }

        let phase2: Vec<_> = heights.iter().map(|&h| self.core.derive_height_phase(h, Phase::Two, CHECKPOINT_NAME)).collect();
        let phase2_results = join_all(phase2).await;
        for result in phase2_results {
            all_ok &= result?;
        }

        Ok(all_ok)
    }

    /// Drive one pass: take whatever is pending (or fall back to scanning
    /// the ingestion frontier if nothing was explicitly notified), chunk it,
    /// and derive each chunk in order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn run_pass(&self, retry_queue: &mut Vec<RetryItem>) -> Result<bool> {
        let mut did_work = false;

        let explicit = self.pending.take();
        let range = match explicit {
            Some(range) => range,
            None => {
                let start = self.checkpoint_start().await?.value();
                let frontier = self.raw_store.highest_ingested_height().await?.value();
                if start > frontier {
                    start..start
                } else {
                    start..(frontier + 1)
                }
            }
        };

        let mut cursor = range.start;
        while cursor < range.end {
            let end = (cursor + self.chunk_size).min(range.end);
            let chunk = cursor..end;
            did_work = true;
            match self.derive_chunk(&chunk).await {
                Ok(true) => debug!(from = chunk.start, to = chunk.end - 1, "derived chunk"),
                Ok(false) => {
                    warn!(from = chunk.start, to = chunk.end - 1, "chunk incomplete, queuing retry");
                    retry_queue.push(RetryItem { range: chunk.clone(), attempt: 0 });
                }
                Err(e) => {
                    warn!(from = chunk.start, to = chunk.end - 1, error = %e, "chunk failed, queuing retry");
                    retry_queue.push(RetryItem { range: chunk.clone(), attempt: 0 });
                }
            }
            cursor = end;
        }

        Ok(did_work)
    }

    async fn drain_retries(&self, retry_queue: &mut Vec<RetryItem>) {
        let mut remaining = Vec::new();
        for item in retry_queue.drain(..) {
            sleep(RETRY_BACKOFF[item.attempt.min(RETRY_BACKOFF.len() - 1)]).await;
            match self.derive_chunk(&item.range).await {
                Ok(true) => debug!(from = item.range.start, to = item.range.end - 1, attempt = item.attempt, "retry succeeded"),
                Ok(false) | Err(_) if item.attempt + 1 < RETRY_BACKOFF.len() => {
                    remaining.push(RetryItem { range: item.range, attempt: item.attempt + 1 });
                }
                Ok(false) | Err(_) => {
                    warn!(from = item.range.start, to = item.range.end - 1, "exhausted retry budget, dropping chunk");
                }
            }
        }
        *retry_queue = remaining;
    }

    /// Run the derivation loop until `cancel` is triggered.
    ///
    /// # Errors
    ///
    /// Propagates storage errors. A processor failure does not stop the
    /// loop; the failing chunk is queued for bounded retry instead.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut retry_queue: Vec<RetryItem> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if !retry_queue.is_empty() {
                self.drain_retries(&mut retry_queue).await;
            }

            let did_work = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.run_pass(&mut retry_queue) => result?,
            };

            if !did_work {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = self.pending.notify.notified() => {}
                    () = sleep(CAUGHT_UP_POLL_INTERVAL) => {}
                }
            }
        }
    }
}
