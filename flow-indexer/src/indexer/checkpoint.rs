//! Checkpoint management for pipeline progress tracking and recovery.
//!
//! Every ingester and deriver in the pipeline is a *named* consumer of the
//! chain: `"forward_ingester"`, `"backward_ingester"`. Within a deriver,
//! each registered processor owns its own checkpoint, named
//! `"{deriver}:{processor}"` (see [`super::deriver::DeriverCore`]) — it only
//! advances past a height once that processor has succeeded for every
//! transaction at that height, so a slow or failing processor delays only
//! its own progress, never its peers'. Failures still land in the error log
//! individually (see [`super::committer::FailureRecorder`]) so an operator
//! can see which processor is behind.
//!
//! # Checkpoint Strategy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Checkpoint Flow                              │
//! │                                                                     │
//! │  ┌──────────────────┐    ┌──────────────────┐    ┌───────────────┐ │
//! │  │  Process Height  │───▶│  Advance Named   │───▶│  Commit to    │ │
//! │  │  Successfully    │    │  Checkpoint      │    │  Database     │ │
//! │  └──────────────────┘    └──────────────────┘    └───────────────┘ │
//! │                                                                     │
//! │  ┌──────────────────┐    ┌──────────────────┐    ┌───────────────┐ │
//! │  │  On Restart      │───▶│  Load Named      │───▶│  Resume From  │ │
//! │  │                  │    │  Checkpoint      │    │  Checkpoint+1 │ │
//! │  └──────────────────┘    └──────────────────┘    └───────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Recovery Modes
//!
//! - **Resume**: Continue from the last checkpoint (default).
//! - **ReindexFrom**: Start from a specific height (reprocessing).
//! - **Genesis**: Start from the spork floor (fresh indexing).
//! - **StartFrom**: Start from a specific height, ignoring any existing
//!   checkpoint. Does not clear existing data — use with caution.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::ports::CheckpointStore;
use crate::types::Height;

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Mode for determining the starting height on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Resume from the last checkpoint (default behavior).
    #[default]
    Resume,
    /// Reindex from a specific height. Useful for reprocessing.
    ReindexFrom(Height),
    /// Start from the floor, ignoring any existing checkpoint.
    Genesis,
    /// Start from a specific height, ignoring any existing checkpoint.
    /// Does not clear existing data.
    StartFrom(Height),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Manages one named checkpoint's persistence and recovery semantics.
///
/// A separate `CheckpointManager` is constructed per named consumer; they
/// all share the same underlying [`CheckpointStore`].
#[derive(Debug)]
pub struct CheckpointManager<S> {
    store: Arc<S>,
    name: String,
    recovery_mode: RecoveryMode,
    floor: Height,
}

impl<S> CheckpointManager<S>
where
    S: CheckpointStore,
{
    /// Create a new checkpoint manager for the named consumer.
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            recovery_mode: RecoveryMode::default(),
            floor: Height::ZERO,
        }
    }

    /// Set the recovery mode for startup.
    #[must_use]
    pub const fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Set the lowest height this consumer may ever start from (the spork
    /// floor, or a contract's deployment height).
    #[must_use]
    pub const fn with_floor(mut self, floor: Height) -> Self {
        self.floor = floor;
        self
    }

    /// Name of the consumer this manager tracks.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the current checkpoint height, if one has ever been set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to retrieve the checkpoint.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn load(&self) -> Result<Option<Height>> {
        let checkpoint = self.store.get(&self.name).await?;
        debug!(height = ?checkpoint.as_ref().map(|c| c.height.value()), "loaded checkpoint");
        Ok(checkpoint.map(|c| c.height))
    }

    /// Get the height to resume processing from (the checkpoint's next
    /// height, or the floor if nothing has been checkpointed yet).
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be loaded.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn get_start_height(&self) -> Result<Height> {
        let start = match self.recovery_mode {
            RecoveryMode::Resume => match self.load().await? {
                Some(height) => {
                    info!(height = height.value(), "resuming from checkpoint");
                    height.next()
                }
                None => {
                    info!("no checkpoint found, starting from floor");
                    self.floor
                }
            },
            RecoveryMode::ReindexFrom(height) => {
                info!(height = height.value(), "reindexing from specified height");
                height
            }
            RecoveryMode::Genesis => {
                info!("starting from floor");
                self.floor
            }
            RecoveryMode::StartFrom(height) => {
                warn!(height = height.value(), "starting from specified height, ignoring checkpoint");
                height
            }
        };

        Ok(start.max(self.floor))
    }

    /// Advance the checkpoint after successfully processing up to `height`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to persist the checkpoint.
    #[instrument(skip(self), fields(name = %self.name, height = height.value()))]
    pub async fn advance(&self, height: Height) -> Result<()> {
        self.store.set(&self.name, height).await?;
        debug!("checkpoint advanced");
        Ok(())
    }

    /// Reset the checkpoint to a specific height, bypassing the usual
    /// monotonicity expectation. Only the Rollback Engine should call this,
    /// immediately after confirming a fork point.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to persist the checkpoint.
    #[instrument(skip(self), fields(name = %self.name, height = height.value()))]
    pub async fn reset_to(&self, height: Height) -> Result<()> {
        info!(height = height.value(), "resetting checkpoint after rollback");
        self.store.set(&self.name, height).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::types::Checkpoint;

    #[derive(Default)]
    struct MockCheckpointStore {
        checkpoints: Mutex<HashMap<String, Height>>,
    }

    #[async_trait]
    impl CheckpointStore for MockCheckpointStore {
        async fn get(&self, name: &str) -> Result<Option<Checkpoint>> {
            Ok(self.checkpoints.lock().unwrap().get(name).map(|&height| Checkpoint {
                name: name.to_string(),
                height,
                updated_at: Utc::now(),
            }))
        }

        async fn set(&self, name: &str, height: Height) -> Result<()> {
            self.checkpoints.lock().unwrap().insert(name.to_string(), height);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Checkpoint>> {
            Ok(self
                .checkpoints
                .lock()
                .unwrap()
                .iter()
                .map(|(name, &height)| Checkpoint {
                    name: name.clone(),
                    height,
                    updated_at: Utc::now(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn resume_with_no_checkpoint_starts_at_floor() {
        let store = Arc::new(MockCheckpointStore::default());
        let manager = CheckpointManager::new(store, "forward_ingester").with_floor(Height::new(1000));

        assert_eq!(manager.get_start_height().await.unwrap(), Height::new(1000));
    }

    #[tokio::test]
    async fn resume_with_checkpoint_starts_at_next_height() {
        let store = Arc::new(MockCheckpointStore::default());
        let manager = CheckpointManager::new(store, "forward_ingester");
        manager.advance(Height::new(500)).await.unwrap();

        assert_eq!(manager.get_start_height().await.unwrap(), Height::new(501));
    }

    #[tokio::test]
    async fn reindex_from_overrides_checkpoint() {
        let store = Arc::new(MockCheckpointStore::default());
        let manager = CheckpointManager::new(store, "live_deriver")
            .with_recovery_mode(RecoveryMode::ReindexFrom(Height::new(100)));

        assert_eq!(manager.get_start_height().await.unwrap(), Height::new(100));
    }

    #[tokio::test]
    async fn start_height_never_goes_below_floor() {
        let store = Arc::new(MockCheckpointStore::default());
        let manager = CheckpointManager::new(store, "backward_ingester")
            .with_recovery_mode(RecoveryMode::StartFrom(Height::new(10)))
            .with_floor(Height::new(500));

        assert_eq!(manager.get_start_height().await.unwrap(), Height::new(500));
    }

    #[tokio::test]
    async fn reset_to_bypasses_monotonicity() {
        let store = Arc::new(MockCheckpointStore::default());
        let manager = CheckpointManager::new(store, "forward_ingester");
        manager.advance(Height::new(500)).await.unwrap();
        manager.reset_to(Height::new(400)).await.unwrap();

        assert_eq!(manager.load().await.unwrap(), Some(Height::new(400)));
    }
}
