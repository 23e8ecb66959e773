//! Backward Ingester: fills gaps below the lowest ingested height, walking
//! toward genesis (or the configured spork floor) in batches fetched
//! concurrently via a worker pool.
//!
//! Unlike the Forward Ingester, which only ever appends at the tip, the
//! Backward Ingester's job is bounded: once it reaches the floor, or a
//! batch request returns [`crate::error::InfraError::BelowSporkFloor`] with
//! no historic endpoint able to serve it, it has nothing left to do and
//! [`BackwardIngester::backfill_next_batch`] returns `Ok(None)`.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::checkpoint::CheckpointManager;
use crate::error::{AppError, InfraError, Result};
use crate::node_pool::NodePool;
use crate::ports::{CheckpointStore, RawStore};
use crate::types::Height;

/// Polling interval once the floor has been reached and there is nothing
/// left to backfill.
const FLOOR_REACHED_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Named checkpoint this ingester advances; tracks the lowest height still
/// to be filled, counting *down*.
pub const CHECKPOINT_NAME: &str = "backward_ingester";

/// Walks backward from the lowest ingested height toward `floor`, filling
/// gaps a batch of up to `batch_size` heights at a time, fetched
/// concurrently via a `worker_count`-wide pool.
pub struct BackwardIngester<R, C> {
    node_pool: Arc<NodePool>,
    raw_store: Arc<R>,
    checkpoint: CheckpointManager<C>,
    floor: Height,
    batch_size: u64,
    worker_count: usize,
}

impl<R, C> BackwardIngester<R, C>
where
    R: RawStore,
    C: CheckpointStore,
{
    /// Construct a backward ingester bottoming out at `floor` (typically
    /// the oldest spork's genesis height, or an operator-configured cutoff).
    pub fn new(node_pool: Arc<NodePool>, raw_store: Arc<R>, checkpoint_store: Arc<C>, floor: Height, worker_count: u32, batch_size: u32) -> Self {
        Self {
            node_pool,
            raw_store,
            checkpoint: CheckpointManager::new(checkpoint_store, CHECKPOINT_NAME),
            floor,
            batch_size: u64::from(batch_size.max(1)),
            worker_count: worker_count.max(1) as usize,
        }
    }

    /// Ingest one batch of heights below the current low-water mark.
    ///
    /// Returns `Ok(None)` once the floor is reached or no lower heights
    /// remain to be served by any configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or node failure other than running out
    /// of servable history.
    #[instrument(skip(self))]
    pub async fn backfill_next_batch(&self) -> Result<Option<(Height, Height)>> {
        let lowest = self.raw_store.lowest_ingested_height().await?;

        let Some(lowest) = lowest else {
            debug!("nothing ingested yet; forward ingester has not started");
            return Ok(None);
        };

        if lowest <= self.floor {
            debug!(floor = self.floor.value(), "reached configured floor");
            return Ok(None);
        }

        let batch_floor = Height::new(lowest.prev().value().saturating_sub(self.batch_size - 1)).max(self.floor);
        let batch_top = lowest.prev();

        let heights: Vec<Height> = (batch_floor.value()..=batch_top.value()).rev().map(Height::new).collect();

        let mut fetched: Vec<(Height, std::result::Result<Option<crate::node_pool::BlockEnvelope>, AppError>)> = stream::iter(heights)
            .map(|height| {
                let node_pool = Arc::clone(&self.node_pool);
                async move { (height, node_pool.fetch_block_envelope(height).await) }
            })
            .buffer_unordered(self.worker_count)
            .collect()
            .await;
        fetched.sort_by_key(|(height, _)| std::cmp::Reverse(*height));

        let mut last_ingested = None;

        for (height, result) in fetched {
            let envelope = match result {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(AppError::Infra(InfraError::BelowSporkFloor { floor })) => {
                    warn!(height = height.value(), floor = floor.value(), "below every configured spork floor, stopping backfill");
                    break;
                }
                Err(e) => return Err(e),
            };

            self.raw_store
                .insert_block(
                    &envelope.block,
                    &envelope.transactions,
                    &envelope.events,
                    envelope.execution_result.as_ref(),
                    &envelope.collections,
                    &envelope.scripts,
                )
                .await?;

            last_ingested = Some(height);
        }

        if let Some(lowest_filled) = last_ingested {
            self.checkpoint.advance(batch_top).await?;
            info!(from = lowest_filled.value(), to = batch_top.value(), "backfilled batch");
            return Ok(Some((lowest_filled, batch_top)));
        }

        Ok(None)
    }

    /// Find and fill in gaps within already-ingested history (heights
    /// skipped by an earlier partial batch), via the raw store's
    /// window-function gap scan, fetched concurrently per gap.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or node failure.
    #[instrument(skip(self))]
    pub async fn fill_known_gaps(&self, from: Height, to: Height) -> Result<u64> {
        let gaps = self.raw_store.find_height_gaps(from, to).await?;
        let mut filled = 0u64;

        for (gap_from, gap_to) in gaps {
            let heights: Vec<Height> = (gap_from.value()..=gap_to.value()).map(Height::new).collect();
            let fetched: Vec<(Height, Result<Option<crate::node_pool::BlockEnvelope>>)> = stream::iter(heights)
                .map(|height| {
                    let node_pool = Arc::clone(&self.node_pool);
                    async move { (height, node_pool.fetch_block_envelope(height).await) }
                })
                .buffer_unordered(self.worker_count)
                .collect()
                .await;

            let mut ordered = fetched;
            ordered.sort_by_key(|(height, _)| *height);

            for (_, result) in ordered {
                if let Some(envelope) = result? {
                    self.raw_store
                        .insert_block(
                            &envelope.block,
                            &envelope.transactions,
                            &envelope.events,
                            envelope.execution_result.as_ref(),
                            &envelope.collections,
                            &envelope.scripts,
                        )
                        .await?;
                    filled += 1;
                }
            }
        }

        Ok(filled)
    }

    /// Run the backfill loop until `cancel` is triggered, idling once
    /// `floor` is reached rather than exiting, since a later deployment may
    /// lower the floor further.
    ///
    /// # Errors
    ///
    /// Propagates storage or node errors from [`Self::backfill_next_batch`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.backfill_next_batch() => result?,
            };

            match outcome {
                Some((from, to)) => debug!(from = from.value(), to = to.value(), "backfilled range"),
                None => {
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = sleep(FLOOR_REACHED_POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CHECKPOINT_NAME;

    #[test]
    fn checkpoint_name_is_stable() {
        assert_eq!(CHECKPOINT_NAME, "backward_ingester");
    }
}
