//! Processor trait and registry.
//!
//! A processor turns the raw events and transaction metadata of a single
//! ingested transaction into one or more derived rows. Processors are
//! dispatched by the Live Deriver and History Deriver, in height/tx order,
//! once per transaction; a processor is handed every event the transaction
//! emitted so it can pair related events (e.g. the `Withdrawn`/`Deposited`
//! halves of a fungible-token transfer) without a round trip to storage.
//!
//! # Phases
//!
//! Phase 1 processors ([`Phase::One`]) read only the transaction and its
//! events. Phase 2 processors ([`Phase::Two`]) additionally read Phase 1
//! output (typically through [`crate::ports::DerivedStore`] query methods)
//! and must never be run past the checkpoint of the Phase 1 processor they
//! depend on; [`Processor::depends_on`] names that dependency so the
//! deriver can enforce it and raise
//! [`crate::error::DomainError::DependencyNotReady`] otherwise.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use flow_indexer::processors::{ProcessorRegistry, phase1, phase2};
//!
//! let mut registry = ProcessorRegistry::new();
//! registry.register(Arc::new(phase1::TokenTransferProcessor::new(store.clone())));
//! registry.register(Arc::new(phase2::FtHoldingProcessor::new(store.clone())));
//!
//! for outcome in registry.dispatch(&tx, &events, block.timestamp).await {
//!     outcome.result?;
//! }
//! ```

pub mod phase1;
pub mod phase2;
mod shared;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DomainError, Result};
use crate::types::{FlowEvent, Phase, Transaction};

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A single unit of derivation logic, dispatched once per transaction.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stable, unique processor name, used as its checkpoint name and in
    /// `depends_on` references.
    fn name(&self) -> &'static str;

    /// Which phase this processor belongs to.
    fn phase(&self) -> Phase;

    /// Names of processors whose checkpoint this processor must not run
    /// ahead of. Empty for processors with no cross-processor dependency.
    fn depends_on(&self) -> &[&'static str] {
        &[]
    }

    /// Process one transaction and the events it emitted.
    ///
    /// `block_timestamp` is the timestamp of the block that sealed `tx`,
    /// used by processors that bucket by calendar day (e.g. daily balance
    /// aggregates) so backfill derivation buckets by the block's own time
    /// rather than the time the deriver happens to run.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or persistence fails. The deriver
    /// records the failure in the error log and retries; it does not
    /// advance this processor's checkpoint past a failed transaction.
    async fn process(&self, tx: &Transaction, events: &[FlowEvent], block_timestamp: DateTime<Utc>) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of dispatching one transaction to one processor.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Name of the processor that ran.
    pub processor: &'static str,
    /// Result of running it.
    pub result: Result<()>,
}

/// Ordered collection of processors, dispatched in registration order.
///
/// Registration order matters only in that Phase 1 processors should be
/// registered before the Phase 2 processors that depend on them, so that a
/// single dispatch pass sees Phase 1 side effects applied first; the
/// registry does not reorder processors itself.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn Processor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ProcessorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        self.processors.push(processor);
        self
    }

    /// All registered processors belonging to `phase`.
    #[must_use]
    pub fn by_phase(&self, phase: Phase) -> Vec<&Arc<dyn Processor>> {
        self.processors.iter().filter(|p| p.phase() == phase).collect()
    }

    /// All registered processors, in registration order.
    #[must_use]
    pub fn all(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    /// Look up a processor by name.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownProcessor`] if no processor is
    /// registered under `name`.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Processor>> {
        self.processors
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| DomainError::UnknownProcessor(name.to_string()).into())
    }

    /// Dispatch one transaction and its events to every registered
    /// processor, running them in registration order.
    ///
    /// Errors from one processor do not stop dispatch to the rest; the
    /// caller inspects each [`DispatchOutcome`] to decide how to route
    /// failures (error log, retry, dead letter).
    pub async fn dispatch(
        &self,
        tx: &Transaction,
        events: &[FlowEvent],
        block_timestamp: DateTime<Utc>,
    ) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            let result = processor.process(tx, events, block_timestamp).await;
            outcomes.push(DispatchOutcome {
                processor: processor.name(),
                result,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcessor;

    #[async_trait]
    impl Processor for NoopProcessor {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn phase(&self) -> Phase {
            Phase::One
        }

        async fn process(&self, _tx: &Transaction, _events: &[FlowEvent], _block_timestamp: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_processor_errors() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get("token_transfer").is_err());
    }

    #[test]
    fn registered_processor_is_found_by_name() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor));
        assert!(registry.get("noop").is_ok());
    }

    #[test]
    fn filters_by_phase() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor));
        assert_eq!(registry.by_phase(Phase::One).len(), 1);
        assert_eq!(registry.by_phase(Phase::Two).len(), 0);
    }
}
