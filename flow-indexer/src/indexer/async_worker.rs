//! Async Worker: lease-based driver for processors whose unit of work is a
//! queue of items rather than a contiguous block range — NFT ownership
//! reconciliation against chain state, daily aggregate backfill, and
//! similar per-item jobs that don't fit the ingester/deriver checkpoint
//! model.
//!
//! # Lease lifecycle
//!
//! ```text
//! acquire(queue, item_key) ──success──▶ ACTIVE ──run() Ok───▶ release (COMPLETED)
//!                │                         │
//!                └─already held──▶ skip    └─run() Err──▶ FAILED (mark_failed),
//!                                                          re-acquired immediately
//!                                                          on retry
//!
//! ACTIVE ──deadline exceeded──▶ FAILED (reap_expired)
//! attempt ≥ AttemptCap at acquire time ──▶ mark_dead_letter (terminal)
//! ```
//!
//! Unlike the ingesters and derivers, the Async Worker does not own a
//! checkpoint: its progress is tracked entirely through lease state, and an
//! item stuck below the attempt cap simply gets retried on the next sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::committer::FailureRecorder;
use crate::error::Result;
use crate::ports::{ErrorLogStore, LeaseStore};
use crate::types::{Height, Lease};

/// Default lease time-to-live before an active lease is considered
/// abandoned and eligible for reaping.
const DEFAULT_LEASE_TTL: chrono::Duration = chrono::Duration::minutes(5);

/// Default number of attempts before a lease is dead-lettered.
const DEFAULT_ATTEMPT_CAP: u32 = 5;

/// Interval between reap-and-retry sweeps when the worker is otherwise
/// idle.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A unit of per-item reconciliation work driven by the Async Worker.
#[async_trait]
pub trait ReconciliationJob: Send + Sync {
    /// Name of the lease queue this job's work items belong to.
    fn queue(&self) -> &'static str;

    /// Perform the reconciliation for a single item.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconciliation fails; the lease is marked
    /// `Failed` immediately so it can be reclaimed on the next sweep without
    /// waiting out the full lease TTL.
    async fn run(&self, item_key: &str) -> Result<()>;
}

/// Outcome of dispatching a single item to a [`ReconciliationJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job ran and completed successfully; the lease was released.
    Completed,
    /// The job ran and failed; the lease was marked `Failed` and is
    /// immediately eligible for reclaim.
    Failed,
    /// Another worker already holds an active lease on this item.
    AlreadyLeased,
    /// The item had already exhausted its attempt budget and was
    /// dead-lettered instead of being run again.
    DeadLettered,
}

/// Drives a [`ReconciliationJob`] against a [`LeaseStore`]-backed queue.
pub struct AsyncWorker<L, J> {
    lease_store: Arc<L>,
    failure_recorder: FailureRecorder<L>,
    job: J,
    worker_id: String,
    ttl: chrono::Duration,
    attempt_cap: u32,
}

impl<L, J> AsyncWorker<L, J>
where
    L: LeaseStore + ErrorLogStore,
    J: ReconciliationJob,
{
    /// Construct a worker identified by `worker_id`, using the default
    /// lease TTL and attempt cap.
    pub fn new(lease_store: Arc<L>, job: J, worker_id: impl Into<String>) -> Self {
        Self {
            failure_recorder: FailureRecorder::new(lease_store.clone()),
            lease_store,
            job,
            worker_id: worker_id.into(),
            ttl: DEFAULT_LEASE_TTL,
            attempt_cap: DEFAULT_ATTEMPT_CAP,
        }
    }

    /// Override the lease time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Override the attempt cap before dead-lettering.
    #[must_use]
    pub const fn with_attempt_cap(mut self, cap: u32) -> Self {
        self.attempt_cap = cap;
        self
    }

    /// Attempt to claim and run a single item.
    ///
    /// # Errors
    ///
    /// Returns an error only on lease store failure; a job failure is
    /// reported via [`ProcessOutcome::Failed`], not a `Result::Err`, so a
    /// caller iterating many items doesn't have to special-case one bad
    /// item to keep the sweep going.
    pub async fn process_item(&self, item_key: &str) -> Result<ProcessOutcome> {
        let Some(lease) = self
            .lease_store
            .acquire(self.job.queue(), item_key, &self.worker_id, self.ttl)
            .await?
        else {
            return Ok(ProcessOutcome::AlreadyLeased);
        };

        if lease.attempt >= self.attempt_cap {
            self.lease_store.mark_dead_letter(lease.id).await?;
            error!(
                queue = self.job.queue(),
                item_key,
                attempt = lease.attempt,
                "lease exhausted attempt budget, dead-lettering"
            );
            return Ok(ProcessOutcome::DeadLettered);
        }

        match self.job.run(item_key).await {
            Ok(()) => {
                self.lease_store.release(lease.id).await?;
                Ok(ProcessOutcome::Completed)
            }
            Err(e) => {
                self.lease_store.mark_failed(lease.id).await?;
                self.failure_recorder
                    .record(&format!("async_worker:{}", self.job.queue()), Height::ZERO, Height::ZERO, &e)
                    .await?;
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    /// Dispatch `item_keys` one at a time, logging but not stopping on
    /// individual failures.
    ///
    /// # Errors
    ///
    /// Returns an error on lease store failure.
    pub async fn run_batch(&self, item_keys: impl IntoIterator<Item = String>) -> Result<()> {
        for item_key in item_keys {
            self.process_item(&item_key).await?;
        }
        Ok(())
    }

    /// Reap leases that expired without completion and retry each one
    /// immediately, returning how many were retried.
    ///
    /// # Errors
    ///
    /// Returns an error on lease store failure.
    pub async fn reap_and_retry(&self, limit: u32) -> Result<Vec<Lease>> {
        let expired = self.lease_store.reap_expired(self.job.queue(), Utc::now(), limit).await?;
        for lease in &expired {
            self.process_item(&lease.item_key).await?;
        }
        Ok(expired)
    }

    /// Run the reap-and-retry sweep on a fixed interval until `cancel` is
    /// triggered. Fresh (never-leased) items are expected to be fed in
    /// separately via [`Self::run_batch`], e.g. from a periodic scan of the
    /// owning derived-store table.
    ///
    /// # Errors
    ///
    /// Propagates lease store errors.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(queue = self.job.queue(), "async worker shutting down");
                    return Ok(());
                }
                result = self.reap_and_retry(100) => {
                    let retried = result?;
                    if !retried.is_empty() {
                        info!(queue = self.job.queue(), count = retried.len(), "retried expired leases");
                    }
                    sleep(SWEEP_INTERVAL).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::error::AppError;
    use crate::ports::CheckpointStore;
    use crate::types::{Checkpoint, ErrorEntry, LeaseStatus};

    #[derive(Default)]
    struct MockStore {
        leases: Mutex<HashMap<Uuid, Lease>>,
        errors: Mutex<Vec<ErrorEntry>>,
    }

    #[async_trait]
    impl LeaseStore for MockStore {
        async fn acquire(&self, queue: &str, item_key: &str, worker_id: &str, ttl: chrono::Duration) -> Result<Option<Lease>> {
            let mut leases = self.leases.lock().unwrap();
            let now = Utc::now();

            if let Some(existing) = leases.values().find(|l| l.queue == queue && l.item_key == item_key) {
                if existing.status == LeaseStatus::Active && existing.expires_at > now {
                    return Ok(None);
                }
            }

            let attempt = leases
                .values()
                .filter(|l| l.queue == queue && l.item_key == item_key)
                .map(|l| l.attempt)
                .max()
                .unwrap_or(0)
                + 1;

            let lease = Lease {
                id: Uuid::new_v4(),
                queue: queue.to_string(),
                item_key: item_key.to_string(),
                worker_id: worker_id.to_string(),
                status: LeaseStatus::Active,
                attempt,
                expires_at: now + ttl,
            };
            leases.insert(lease.id, lease.clone());
            Ok(Some(lease))
        }

        async fn renew(&self, id: Uuid, _worker_id: &str, ttl: chrono::Duration) -> Result<()> {
            let mut leases = self.leases.lock().unwrap();
            if let Some(lease) = leases.get_mut(&id) {
                lease.expires_at = Utc::now() + ttl;
            }
            Ok(())
        }

        async fn release(&self, id: Uuid) -> Result<()> {
            self.leases.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid) -> Result<()> {
            if let Some(lease) = self.leases.lock().unwrap().get_mut(&id) {
                lease.status = LeaseStatus::Failed;
            }
            Ok(())
        }

        async fn mark_dead_letter(&self, id: Uuid) -> Result<()> {
            if let Some(lease) = self.leases.lock().unwrap().get_mut(&id) {
                lease.status = LeaseStatus::DeadLettered;
            }
            Ok(())
        }

        async fn reap_expired(&self, queue: &str, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>> {
            let mut leases = self.leases.lock().unwrap();
            let expired: Vec<Lease> = leases
                .values()
                .filter(|l| l.queue == queue && l.status == LeaseStatus::Active && l.expires_at <= now)
                .take(limit as usize)
                .cloned()
                .collect();
            for lease in &expired {
                leases.get_mut(&lease.id).unwrap().status = LeaseStatus::Failed;
            }
            Ok(expired)
        }

        async fn list_completed(&self, queue: &str, limit: u32) -> Result<Vec<Lease>> {
            Ok(self
                .leases
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.queue == queue && l.status == LeaseStatus::Done)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn list_dead_lettered(&self, queue: &str) -> Result<Vec<Lease>> {
            Ok(self
                .leases
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.queue == queue && l.status == LeaseStatus::DeadLettered)
                .cloned()
                .collect())
        }

        async fn fail_all_active(&self) -> Result<u64> {
            let mut leases = self.leases.lock().unwrap();
            let mut count = 0u64;
            for lease in leases.values_mut() {
                if lease.status == LeaseStatus::Active {
                    lease.status = LeaseStatus::Failed;
                    count += 1;
                }
            }
            Ok(count)
        }
    }

    #[async_trait]
    impl ErrorLogStore for MockStore {
        async fn record(&self, entry: &ErrorEntry) -> Result<()> {
            self.errors.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn list_for_source(&self, source: &str, limit: u32) -> Result<Vec<ErrorEntry>> {
            Ok(self
                .errors
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.source == source)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    // Satisfies `L: LeaseStore + ErrorLogStore` bounds only; never exercised
    // through `CheckpointStore` in these tests.
    #[async_trait]
    impl CheckpointStore for MockStore {
        async fn get(&self, _name: &str) -> Result<Option<Checkpoint>> {
            unimplemented!("not exercised by async worker tests")
        }

        async fn set(&self, _name: &str, _height: Height) -> Result<()> {
            unimplemented!("not exercised by async worker tests")
        }

        async fn list(&self) -> Result<Vec<Checkpoint>> {
            unimplemented!("not exercised by async worker tests")
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ReconciliationJob for AlwaysFails {
        fn queue(&self) -> &'static str {
            "nft_reconciliation"
        }

        async fn run(&self, _item_key: &str) -> Result<()> {
            Err(AppError::Config("reconciliation failed".to_string()))
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl ReconciliationJob for AlwaysSucceeds {
        fn queue(&self) -> &'static str {
            "nft_reconciliation"
        }

        async fn run(&self, _item_key: &str) -> Result<()> {
            Ok(())
        }
    }

    struct CountedFailures(AtomicU32);

    #[async_trait]
    impl ReconciliationJob for CountedFailures {
        fn queue(&self) -> &'static str {
            "nft_reconciliation"
        }

        async fn run(&self, _item_key: &str) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Config("still failing".to_string()))
        }
    }

    #[tokio::test]
    async fn completed_item_releases_its_lease() {
        let store = Arc::new(MockStore::default());
        let worker = AsyncWorker::new(store.clone(), AlwaysSucceeds, "worker-1");

        let outcome = worker.process_item("collection:123").await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        assert!(store.leases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_item_marks_lease_failed_and_logs_error() {
        let store = Arc::new(MockStore::default());
        let worker = AsyncWorker::new(store.clone(), AlwaysFails, "worker-1");

        let outcome = worker.process_item("collection:123").await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Failed);
        let leases = store.leases.lock().unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases.values().next().unwrap().status, LeaseStatus::Failed);
        drop(leases);
        assert_eq!(store.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn already_leased_item_is_skipped() {
        let store = Arc::new(MockStore::default());
        let held = Lease {
            id: Uuid::new_v4(),
            queue: "nft_reconciliation".to_string(),
            item_key: "collection:123".to_string(),
            worker_id: "other-worker".to_string(),
            status: LeaseStatus::Active,
            attempt: 1,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        };
        store.leases.lock().unwrap().insert(held.id, held);

        let worker = AsyncWorker::new(store.clone(), AlwaysFails, "worker-1").with_ttl(chrono::Duration::minutes(5));
        let outcome = worker.process_item("collection:123").await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlreadyLeased);
    }

    #[tokio::test]
    async fn exhausted_attempts_are_dead_lettered() {
        let store = Arc::new(MockStore::default());
        let job = CountedFailures(AtomicU32::new(0));
        let worker = AsyncWorker::new(store.clone(), job, "worker-1")
            .with_attempt_cap(3)
            .with_ttl(chrono::Duration::zero());

        // Each acquire() call below expires the prior lease immediately
        // (zero TTL), so every call freely re-acquires with a bumped
        // attempt counter instead of hitting AlreadyLeased.
        let first = worker.process_item("collection:123").await.unwrap();
        let second = worker.process_item("collection:123").await.unwrap();
        let third = worker.process_item("collection:123").await.unwrap();

        assert_eq!(first, ProcessOutcome::Failed);
        assert_eq!(second, ProcessOutcome::Failed);
        assert_eq!(third, ProcessOutcome::DeadLettered);
        assert_eq!(worker.job.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reap_and_retry_picks_up_expired_leases() {
        let store = Arc::new(MockStore::default());
        let stale = Lease {
            id: Uuid::new_v4(),
            queue: "nft_reconciliation".to_string(),
            item_key: "collection:123".to_string(),
            worker_id: "stale-worker".to_string(),
            status: LeaseStatus::Active,
            attempt: 1,
            expires_at: Utc::now() - chrono::Duration::minutes(1),
        };
        store.leases.lock().unwrap().insert(stale.id, stale);

        let worker = AsyncWorker::new(store.clone(), AlwaysSucceeds, "worker-1");
        let retried = worker.reap_and_retry(10).await.unwrap();

        assert_eq!(retried.len(), 1);
        assert!(store.leases.lock().unwrap().is_empty());
    }
}
