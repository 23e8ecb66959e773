//! Shared derivation core used by both the Live Deriver and the History
//! Deriver: reconstruct [`FlowEvent`]s from stored rows and dispatch them to
//! the processor registry.
//!
//! Both derivers share this core because the only real difference between
//! them is *which* heights they walk and in what order — the Live Deriver
//! follows the Forward Ingester toward the tip, the History Deriver fills
//! in behind the Backward Ingester — not how a single height is processed.
//!
//! # Per-processor checkpoints
//!
//! Each registered processor owns its own checkpoint row, named
//! `"{deriver_name}:{processor_name}"`. A processor's checkpoint only
//! advances past a height once it has succeeded for every transaction at
//! that height; a slow or failing processor delays only its own checkpoint,
//! never its peers'. Phase 2 processors additionally gate on their declared
//! [`Processor::depends_on`] dependency checkpoints before running, so a
//! Phase 2 processor never derives past the point its Phase 1 dependency
//! has actually reached.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use super::checkpoint::CheckpointManager;
use super::committer::FailureRecorder;
use crate::error::Result;
use crate::ports::{CheckpointStore, DerivedStore, ErrorLogStore, RawStore};
use crate::processors::ProcessorRegistry;
use crate::types::{EventMetadata, FlowEvent, FlowId, Height, Phase};

/// Turns one height's stored transactions and events into [`FlowEvent`]s and
/// dispatches them to every registered processor, tracking each
/// processor's checkpoint independently.
pub struct DeriverCore<R, S, E> {
    raw_store: Arc<R>,
    registry: Arc<ProcessorRegistry>,
    committer: FailureRecorder<E>,
    checkpoints: HashMap<&'static str, CheckpointManager<S>>,
}

impl<R, S, E> DeriverCore<R, S, E>
where
    R: RawStore,
    S: CheckpointStore,
    E: ErrorLogStore,
{
    /// Construct a deriver core under the given deriver name, with one
    /// checkpoint per registered processor.
    pub fn new(
        raw_store: Arc<R>,
        registry: Arc<ProcessorRegistry>,
        error_log: Arc<E>,
        checkpoint_store: Arc<S>,
        deriver_name: impl Into<String>,
    ) -> Self {
        let deriver_name = deriver_name.into();
        let checkpoints = registry
            .all()
            .iter()
            .map(|p| {
                let name = p.name();
                let checkpoint_name = format!("{deriver_name}:{name}");
                (name, CheckpointManager::new(checkpoint_store.clone(), checkpoint_name))
            })
            .collect();

        Self {
            raw_store,
            registry,
            committer: FailureRecorder::new(error_log),
            checkpoints,
        }
    }

    /// The checkpoint manager for a given processor name, if it is
    /// registered.
    pub fn checkpoint_for(&self, processor_name: &str) -> Option<&CheckpointManager<S>> {
        self.checkpoints.get(processor_name)
    }

    /// Every processor checkpoint this core tracks, for callers (the
    /// History Deriver's dynamic worker floor, the Rollback Engine) that
    /// need to scan all of them.
    pub fn checkpoints(&self) -> impl Iterator<Item = &CheckpointManager<S>> {
        self.checkpoints.values()
    }

    /// Lowest current checkpoint height across `names`, used to compute a
    /// dynamic safety floor (e.g. the History Deriver must not scan above
    /// the slowest declared Phase 1 processor).
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint fails to load, or if `names`
    /// contains a processor this core has no checkpoint for.
    pub async fn min_checkpoint(&self, names: &[&'static str]) -> Result<Height> {
        let mut min = Height::ZERO;
        let mut first = true;
        for name in names {
            let cp = self
                .checkpoints
                .get(name)
                .unwrap_or_else(|| panic!("no checkpoint registered for processor {name}"));
            let height = cp.load().await?.unwrap_or(Height::ZERO);
            min = if first { height } else { min.min(height) };
            first = false;
        }
        Ok(min)
    }

    /// Derive one height for every processor in `phase`, advancing each
    /// processor's own checkpoint independently.
    ///
    /// Returns `false` without advancing any checkpoint if the height has
    /// not been ingested yet. Otherwise returns whether every processor in
    /// `phase` succeeded at this height; a processor whose dependency
    /// checkpoint hasn't reached this height yet is skipped (not failed)
    /// and left for a later pass once its dependency catches up.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure. A processor failure is not
    /// propagated as an error; it is logged and reflected in the return
    /// value.
    #[instrument(skip(self, registry_name_hint), fields(height = height.value(), phase = ?phase))]
    pub async fn derive_height_phase(&self, height: Height, phase: Phase, registry_name_hint: &str) -> Result<bool> {
        let Some(block) = self.raw_store.get_block(height).await? else {
            return Ok(false);
        };

        let mut transactions = self.raw_store.get_transactions_in_range(height, height).await?;
        transactions.sort_by_key(|tx| tx.index_in_block);

        let events = self.raw_store.get_events_in_range(height, height).await?;
        let mut events_by_tx: HashMap<FlowId, Vec<_>> = HashMap::new();
        for event in events {
            events_by_tx.entry(event.tx_id).or_default().push(event);
        }

        let flow_events_by_tx: HashMap<FlowId, Vec<FlowEvent>> = transactions
            .iter()
            .map(|tx| {
                let mut raw_events = events_by_tx.get(&tx.id).cloned().unwrap_or_default();
                raw_events.sort_by_key(|e| e.event_index);
                let flow_events = raw_events
                    .into_iter()
                    .map(|e| FlowEvent {
                        meta: EventMetadata {
                            block_height: tx.block_height,
                            block_id: block.id,
                            tx_id: tx.id,
                            tx_index: tx.index_in_block,
                            event_index: e.event_index,
                            timestamp: block.timestamp,
                        },
                        event_type: e.event_type,
                        payload: e.payload,
                        kind: e.kind,
                    })
                    .collect();
                (tx.id, flow_events)
            })
            .collect();

        let mut all_succeeded = true;

        for processor in self.registry.by_phase(phase) {
            let mut ready = true;
            for dep in processor.depends_on() {
                let dep_cp = self
                    .checkpoints
                    .get(dep)
                    .unwrap_or_else(|| panic!("unknown dependency {dep} declared by {}", processor.name()));
                let dep_height = dep_cp.load().await?.unwrap_or(Height::ZERO);
                if dep_height < height {
                    warn!(
                        processor = processor.name(),
                        dependency = dep,
                        dependency_height = dep_height.value(),
                        required = height.value(),
                        "dependency not ready, deferring processor at this height"
                    );
                    ready = false;
                }
            }
            if !ready {
                all_succeeded = false;
                continue;
            }

            let mut processor_ok = true;
            for tx in &transactions {
                let flow_events = flow_events_by_tx.get(&tx.id).cloned().unwrap_or_default();
                if let Err(e) = processor.process(tx, &flow_events, block.timestamp).await {
                    processor_ok = false;
                    self.committer
                        .record(&format!("{registry_name_hint}:{}", processor.name()), height, height, &e)
                        .await?;
                }
            }

            if processor_ok {
                let cp = self.checkpoints.get(processor.name()).expect("checkpoint registered at construction");
                cp.advance(height).await?;
            } else {
                all_succeeded = false;
            }
        }

        Ok(all_succeeded)
    }

    /// Derive one height across every phase, Phase 1 before Phase 2, so a
    /// Phase 2 dependency gate checked within the same call sees its Phase 1
    /// counterpart's checkpoint already advanced.
    ///
    /// # Errors
    ///
    /// See [`Self::derive_height_phase`].
    pub async fn derive_height(&self, height: Height, registry_name_hint: &str) -> Result<bool> {
        let phase1_ok = self.derive_height_phase(height, Phase::One, registry_name_hint).await?;
        if !self.raw_store.get_block(height).await?.is_some() {
            return Ok(false);
        }
        let phase2_ok = self.derive_height_phase(height, Phase::Two, registry_name_hint).await?;
        Ok(phase1_ok && phase2_ok)
    }
}

/// Constructs a [`ProcessorRegistry`] pre-populated with every Phase 1 and
/// Phase 2 processor wired to `store`, in dependency order (Phase 1 before
/// the Phase 2 processors that read its events).
pub fn default_registry<D: DerivedStore + 'static>(store: Arc<D>) -> ProcessorRegistry {
    use crate::processors::{phase1, phase2};

    let mut registry = ProcessorRegistry::new();
    registry
        .register(Arc::new(phase1::TokenTransferProcessor::new(store.clone())))
        .register(Arc::new(phase1::EvmMappingProcessor::new(store.clone())))
        .register(Arc::new(phase1::TxTagProcessor::new(store.clone())))
        .register(Arc::new(phase1::AccountCatalogProcessor::new(store.clone())))
        .register(Arc::new(phase1::TxMetricsProcessor::new(store.clone())))
        .register(Arc::new(phase1::StakingEventProcessor::new(store.clone())))
        .register(Arc::new(phase1::DefiEventProcessor::new(store.clone())))
        .register(Arc::new(phase1::AddressTxIndexProcessor::new(store.clone())))
        .register(Arc::new(phase1::AccountKeyProcessor::new(store.clone())))
        .register(Arc::new(phase2::FtHoldingProcessor::new(store.clone())))
        .register(Arc::new(phase2::NftOwnershipProcessor::new(store.clone())))
        .register(Arc::new(phase2::DailyBalanceProcessor::new(store)));

    registry
}

/// Declared Phase 1 processors the History Deriver's upward cursor must
/// never scan above, forming its dynamic worker floor.
pub const HISTORY_WORKER_FLOOR_PROCESSORS: &[&str] = &[
    "token_transfer",
    "evm_mapping",
    "tx_tag",
    "account_catalog",
    "tx_metrics",
    "staking_event",
    "defi_event",
    "address_tx_index",
    "account_key",
];
