//! Forward Ingester: walks from the last ingested height to the live tip,
//! fetching a batch of blocks concurrently through the Node Pool's worker
//! pool and persisting each through [`RawStore`] in height order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ForwardIngester                            │
//! │                                                                  │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌─────────────────┐ │
//! │  │  NodePool   │───▶│ fetch_block_      │───▶│  RawStore       │ │
//! │  │  (round-    │    │ envelope(height)  │    │  .insert_block  │ │
//! │  │  robin)     │    │ (worker pool)     │    │                 │ │
//! │  └─────────────┘    └──────────────────┘    └────────┬────────┘ │
//! │                                                       │          │
//! │                                            ┌──────────▼───────┐  │
//! │                                            │ Checkpoint       │  │
//! │                                            │ advance(height)  │  │
//! │                                            └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fetches within a batch run concurrently, but insertion (and the reorg
//! check it performs) happens strictly in height order, so a concurrently
//! fetched later block is never persisted ahead of an earlier one.
//!
//! If a fetched block's `parent_id` does not match the stored block id at
//! `height.prev()`, a reorg has occurred; the ingester stops advancing and
//! reports [`crate::error::AppError::ReorgDetected`] so the caller can
//! invoke the Rollback Engine before resuming.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::checkpoint::{CheckpointManager, RecoveryMode};
use crate::error::{AppError, Result};
use crate::node_pool::NodePool;
use crate::ports::{CheckpointStore, RawStore};
use crate::types::Height;

/// Polling interval once the ingester has caught up to the live tip.
const CAUGHT_UP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Named checkpoint this ingester advances.
pub const CHECKPOINT_NAME: &str = "forward_ingester";

/// Callback invoked after a batch lands, so a Live Deriver can be notified
/// of newly ingested heights without the ingester depending on its type.
pub type NotifyHook = Arc<dyn Fn(Height, Height) + Send + Sync>;

/// Walks forward from the checkpoint to the live sealed tip in batches of
/// up to `batch_size`, fetching concurrently via a `worker_count`-wide
/// pool, persisting through [`RawStore`] in order, and advancing its
/// checkpoint.
pub struct ForwardIngester<R, C> {
    node_pool: Arc<NodePool>,
    raw_store: Arc<R>,
    checkpoint: CheckpointManager<C>,
    batch_size: u32,
    worker_count: usize,
    on_batch: Option<NotifyHook>,
}

impl<R, C> ForwardIngester<R, C>
where
    R: RawStore,
    C: CheckpointStore,
{
    /// Construct a forward ingester over the given node pool and stores,
    /// fetching up to `batch_size` heights per pass with `worker_count`
    /// concurrent fetches in flight.
    pub fn new(node_pool: Arc<NodePool>, raw_store: Arc<R>, checkpoint_store: Arc<C>, worker_count: u32, batch_size: u32) -> Self {
        Self {
            node_pool,
            raw_store,
            checkpoint: CheckpointManager::new(checkpoint_store, CHECKPOINT_NAME),
            batch_size: batch_size.max(1),
            worker_count: worker_count.max(1) as usize,
            on_batch: None,
        }
    }

    /// Override how the starting height is determined on startup, e.g. to
    /// honor an operator-supplied `--from-height` override.
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.checkpoint = self.checkpoint.with_recovery_mode(mode);
        self
    }

    /// Register a hook invoked with `(from, to)` after each batch is
    /// persisted, so a Live Deriver can be notified of newly ingested
    /// heights instead of polling.
    #[must_use]
    pub fn with_notify_hook(mut self, hook: NotifyHook) -> Self {
        self.on_batch = Some(hook);
        self
    }

    /// Ingest the next batch of heights beyond the checkpoint, up to
    /// `min(checkpoint + batch_size, tip)`.
    ///
    /// Returns `Ok(None)` if the ingester has caught up to the live tip.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ReorgDetected`] if a fetched block's parent does
    /// not match the previously ingested block at the prior height. Returns
    /// other errors on node or storage failure.
    #[instrument(skip(self))]
    pub async fn ingest_next_batch(&self) -> Result<Option<(Height, Height)>> {
        let next_height = self.checkpoint.get_start_height().await?;
        let tip = self.node_pool.latest_sealed_height().await?;

        if next_height > tip {
            debug!(next_height = next_height.value(), tip = tip.value(), "caught up to live tip");
            return Ok(None);
        }

        let batch_top = Height::new((next_height.value() + u64::from(self.batch_size) - 1).min(tip.value()));
        let heights: Vec<Height> = (next_height.value()..=batch_top.value()).map(Height::new).collect();

        let mut fetched = stream::iter(heights)
            .map(|height| {
                let node_pool = Arc::clone(&self.node_pool);
                async move { (height, node_pool.fetch_block_envelope(height).await) }
            })
            .buffer_unordered(self.worker_count)
            .collect::<Vec<_>>()
            .await;
        fetched.sort_by_key(|(height, _)| *height);

        let mut last_ingested = None;

        for (height, result) in fetched {
            let Some(envelope) = result? else {
                break;
            };

            if height > Height::ZERO {
                if let Some(prior) = self.raw_store.block_id_at_height(height.prev()).await? {
                    if prior.block_id != envelope.block.parent_id {
                        warn!(height = height.value(), "parent id mismatch against stored chain; reorg detected");
                        return Err(AppError::ReorgDetected {
                            rollback_height: height.prev(),
                        });
                    }
                }
            }

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

            self.checkpoint.advance(height).await?;
            last_ingested = Some(height);
        }

        if let Some(last) = last_ingested {
            info!(from = next_height.value(), to = last.value(), "ingested batch");
            if let Some(hook) = &self.on_batch {
                hook(next_height, last);
            }
            return Ok(Some((next_height, last)));
        }

        Ok(None)
    }

    /// Run the ingestion loop until `cancel` is triggered, sleeping between
    /// polls once caught up to the live tip.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`Self::ingest_next_batch`] other than
    /// catching up, including [`AppError::ReorgDetected`], to the caller,
    /// who owns invoking the Rollback Engine and restarting the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = self.ingest_next_batch() => result?,
            };

            match outcome {
                Some(_) => continue,
                None => {
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = sleep(CAUGHT_UP_POLL_INTERVAL) => {}
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
        assert_eq!(CHECKPOINT_NAME, "forward_ingester");
    }
}
