//! Rollback Engine: detects the common ancestor after a reorg and surgically
//! removes everything derived from the diverged fork.
//!
//! # Fork-point walk
//!
//! ```text
//! height = highest_ingested
//! loop:
//!   stored   = raw_store.block_id_at_height(height)
//!   observed = node_pool.fetch_block_envelope(height).block.id
//!   if stored == observed: fork point found, height is the common ancestor
//!   else: height -= 1; continue
//! ```
//!
//! The walk is bounded by `max_depth`: if no match is found within
//! `max_depth` heights of the tip, [`DomainError::ReorgBeyondDepth`] is
//! returned and operator intervention is required rather than silently
//! deleting an unbounded amount of history.
//!
//! # Surgery, once the common ancestor is found
//!
//! Everything at or above `R = common_ancestor.next()` came from the
//! diverged fork and must go:
//!
//! 1. Raw store rows above `common_ancestor` ([`RawStore::delete_above_height`]).
//! 2. Phase 1 (event-sourced) derived rows from `R` on ([`DerivedStore::delete_phase1_from_height`]).
//! 3. Phase 2 (state-sourced) derived rows from `R` on ([`DerivedStore::delete_phase2_from_height`]).
//! 4. Every active lease, failed immediately so it is reclaimed rather than
//!    left to run to completion against now-deleted rows
//!    ([`LeaseStore::fail_all_active`]). Leases key on an opaque item, not a
//!    literal height range, so a precise "leases overlapping `[R, ∞)`" query
//!    isn't expressible against the current schema; failing every active
//!    lease is the conservative resolution, at the cost of re-doing
//!    in-flight work the reorg didn't actually touch.
//! 5. Every checkpoint clamped to `min(existing, common_ancestor)`, so no
//!    ingester, deriver, or processor resumes past data that no longer
//!    exists.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::error::{DomainError, Result};
use crate::node_pool::NodePool;
use crate::ports::{CheckpointStore, DerivedStore, LeaseStore, RawStore};
use crate::types::{Height, RollbackOutcome};

/// Detects chain divergence and surgically rolls back raw storage, derived
/// storage, in-flight leases, and every checkpoint to the common ancestor.
pub struct RollbackEngine<R, D, L, S> {
    node_pool: Arc<NodePool>,
    raw_store: Arc<R>,
    derived_store: Arc<D>,
    lease_store: Arc<L>,
    checkpoint_store: Arc<S>,
    max_depth: u64,
}

impl<R, D, L, S> RollbackEngine<R, D, L, S>
where
    R: RawStore,
    D: DerivedStore,
    L: LeaseStore,
    S: CheckpointStore,
{
    /// Construct a rollback engine bounded to `max_depth` heights of walk-back.
    #[must_use]
    pub const fn new(node_pool: Arc<NodePool>, raw_store: Arc<R>, derived_store: Arc<D>, lease_store: Arc<L>, checkpoint_store: Arc<S>, max_depth: u64) -> Self {
        Self {
            node_pool,
            raw_store,
            derived_store,
            lease_store,
            checkpoint_store,
            max_depth,
        }
    }

    /// Walk backward from `suspected_height` comparing stored block ids
    /// against freshly observed ones, and perform the full rollback surgery
    /// once the common ancestor is found.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ReorgBeyondDepth`] if no common ancestor is
    /// found within `max_depth` heights. Returns other errors on node or
    /// storage failure.
    #[instrument(skip(self))]
    pub async fn recover(&self, suspected_height: Height) -> Result<RollbackOutcome> {
        let mut height = suspected_height;
        let mut walked = 0u64;

        loop {
            let stored = self.raw_store.block_id_at_height(height).await?;

            let Some(stored) = stored else {
                // Nothing stored at this height; walk further back.
                if height == Height::ZERO || walked >= self.max_depth {
                    break;
                }
                height = height.prev();
                walked += 1;
                continue;
            };

            let observed = self.node_pool.fetch_block_envelope(height).await?;

            match observed {
                Some(envelope) if envelope.block.id == stored.block_id => {
                    if walked == 0 {
                        info!(height = height.value(), "chain consistent, no rollback needed");
                        return Ok(RollbackOutcome::NoOpConsistent);
                    }

                    return self.rollback_to(height).await;
                }
                _ => {
                    if height == Height::ZERO || walked >= self.max_depth {
                        break;
                    }
                    height = height.prev();
                    walked += 1;
                }
            }
        }

        error!(
            suspected_height = suspected_height.value(),
            max_depth = self.max_depth,
            "reorg exceeds max configured depth, giving up"
        );
        Err(DomainError::ReorgBeyondDepth {
            required: walked,
            max: self.max_depth,
        }
        .into())
    }

    /// Perform the rollback surgery once `common_ancestor` is known good:
    /// delete raw and derived rows from the diverged fork, fail in-flight
    /// leases, and clamp every checkpoint.
    async fn rollback_to(&self, common_ancestor: Height) -> Result<RollbackOutcome> {
        let raw_deleted = self.raw_store.delete_above_height(common_ancestor).await?;

        let from = common_ancestor.next();
        let phase1_deleted = self.derived_store.delete_phase1_from_height(from).await?;
        let phase2_deleted = self.derived_store.delete_phase2_from_height(from).await?;

        let failed_leases = self.lease_store.fail_all_active().await?;

        let mut clamped = 0u64;
        for checkpoint in self.checkpoint_store.list().await? {
            if checkpoint.height > common_ancestor {
                self.checkpoint_store.set(&checkpoint.name, common_ancestor).await?;
                clamped += 1;
            }
        }

        warn!(
            common_ancestor = common_ancestor.value(),
            raw_deleted,
            phase1_deleted,
            phase2_deleted,
            failed_leases,
            clamped_checkpoints = clamped,
            "rolled back to common ancestor"
        );

        Ok(RollbackOutcome::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    // Exercised by `tests/rollback_integration.rs` against a real Postgres
    // instance and a mock node pool, since the walk depends on both stores
    // agreeing on divergence; no meaningful unit test exists without one
    // of those.
}
