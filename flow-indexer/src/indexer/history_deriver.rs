//! History Deriver: derives heights backfilled by the Backward Ingester.
//!
//! It runs two independent cursors over the same processor registry:
//!
//! - An **upward** cursor, resuming from its own per-processor checkpoints
//!   and walking toward the tip, bounded above by a *dynamic* worker floor:
//!   the lowest checkpoint among [`HISTORY_WORKER_FLOOR_PROCESSORS`] on the
//!   Live Deriver's core. This cursor must never pass the point the Live
//!   Deriver has actually reached, or the two would derive the same height
//!   twice with no coordination between them.
//! - A **downward** cursor, tracking the Backward Ingester's lowered floor:
//!   as the Backward Ingester walks new heights below whatever it has
//!   already reached, this cursor follows it down, deriving each new height
//!   as it becomes available. It never outruns `raw_store.lowest_ingested_height`.
//!
//! Both cursors chunk their work by [`crate::config::PipelineSettings::history_chunk`],
//! mirroring the Live Deriver's per-chunk Phase 1-then-Phase 2 ordering.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::checkpoint::CheckpointManager;
use super::deriver::{DeriverCore, HISTORY_WORKER_FLOOR_PROCESSORS};
use crate::error::Result;
use crate::ports::{CheckpointStore, ErrorLogStore, RawStore};
use crate::types::{Height, Phase};

/// Polling interval once both cursors have caught up to their respective
/// bounds.
const CAUGHT_UP_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Checkpoint name prefix for the history deriver's upward cursor.
pub const CHECKPOINT_NAME: &str = "history_deriver";

/// Checkpoint holding the downward cursor's lowest fully-derived height.
const DOWNWARD_CURSOR_NAME: &str = "history_deriver:downward_cursor";

/// Derives backfilled heights on two fronts: upward from its own checkpoint
/// floor (bounded by the Live Deriver's progress) and downward behind the
/// Backward Ingester.
pub struct HistoryDeriver<R, S, E> {
    core: DeriverCore<R, S, E>,
    live_core: Arc<DeriverCore<R, S, E>>,
    raw_store: Arc<R>,
    downward_cursor: CheckpointManager<S>,
    chunk_size: u64,
}

impl<R, S, E> HistoryDeriver<R, S, E>
where
    R: RawStore,
    S: CheckpointStore,
    E: ErrorLogStore,
{
    /// Construct a history deriver over `core`, bounded above by
    /// `live_core`'s dynamic worker floor, chunking work by `chunk_size`.
    pub fn new(core: DeriverCore<R, S, E>, live_core: Arc<DeriverCore<R, S, E>>, raw_store: Arc<R>, checkpoint_store: Arc<S>, chunk_size: u32) -> Self {
        Self {
            core,
            live_core,
            raw_store,
            downward_cursor: CheckpointManager::new(checkpoint_store, DOWNWARD_CURSOR_NAME),
            chunk_size: u64::from(chunk_size.max(1)),
        }
    }

    async fn upward_start(&self) -> Result<Height> {
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

    async fn derive_chunk(&self, core: &DeriverCore<R, S, E>, range: &Range<u64>, hint: &str) -> Result<bool> {
        let heights: Vec<Height> = range.clone().map(Height::new).collect();

        let phase1 = join_all(heights.iter().map(|&h| core.derive_height_phase(h, Phase::One, hint))).await;
        let mut all_ok = true;
        for result in phase1 {
            all_ok &= result?;
        }

        let phase2 = join_all(heights.iter().map(|&h| core.derive_height_phase(h, Phase::Two, hint))).await;
        for result in phase2 {
            all_ok &= result?;
        }

        Ok(all_ok)
    }

    /// Walk the upward cursor toward the Live Deriver's dynamic floor.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn run_upward_pass(&self) -> Result<bool> {
        let ceiling = self.live_core.min_checkpoint(HISTORY_WORKER_FLOOR_PROCESSORS).await?;
        let start = self.upward_start().await?;

        if start > ceiling {
            return Ok(false);
        }

        let end = (start.value() + self.chunk_size).min(ceiling.value() + 1);
        if end <= start.value() {
            return Ok(false);
        }

        let chunk = start.value()..end;
        self.derive_chunk(&self.core, &chunk, CHECKPOINT_NAME).await?;
        debug!(from = chunk.start, to = chunk.end - 1, "derived upward history chunk");
        Ok(true)
    }

    /// Walk the downward cursor toward the Backward Ingester's lowered
    /// floor.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    async fn run_downward_pass(&self) -> Result<bool> {
        let floor = self.raw_store.lowest_ingested_height().await?;
        let Some(floor) = floor else {
            return Ok(false);
        };

        let cursor = match self.downward_cursor.load().await? {
            Some(h) => h,
            None => self.upward_start().await?,
        };

        if floor >= cursor {
            return Ok(false);
        }

        let lowest = floor.value().max(cursor.value().saturating_sub(self.chunk_size));
        let chunk = lowest..cursor.value();
        self.derive_chunk(&self.core, &chunk, CHECKPOINT_NAME).await?;
        self.downward_cursor.reset_to(Height::new(lowest)).await?;
        debug!(from = chunk.start, to = chunk.end - 1, "derived downward history chunk");
        Ok(true)
    }

    /// Run both cursors until `cancel` is triggered, idling once each has
    /// caught up to its bound rather than exiting, since both bounds can
    /// move further as the rest of the pipeline progresses.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let upward_progress = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.run_upward_pass() => result?,
            };
            let downward_progress = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.run_downward_pass() => result?,
            };

            if !upward_progress && !downward_progress {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = sleep(CAUGHT_UP_POLL_INTERVAL) => {}
                }
            }
        }
    }
}
