//! Node pool: round-robin live endpoints plus historic (spork-scoped)
//! endpoints, cooldown-aware retry, and per-endpoint token-bucket rate
//! limiting.
//!
//! A Flow network is served by many Access Nodes, and a long-lived deployment
//! spans multiple sporks, each with its own set of nodes and its own lowest
//! servable height (the spork floor). [`NodePool`] hides that behind two
//! logical roles:
//!
//! - **Live** — a round-robin set of endpoints tracking the current spork's
//!   tip, used by the Forward Ingester and Live Deriver. Spreading requests
//!   across them keeps any single Access Node from seeing the pool's whole
//!   request rate.
//! - **Historic** — one endpoint per past spork, used by the Backward
//!   Ingester and History Deriver to walk heights the live endpoints can no
//!   longer serve.
//!
//! # Resilience
//!
//! Each endpoint tracks its own consecutive failure count. After
//! [`FAILURE_THRESHOLD_TO_PARK`] consecutive failures it is parked for
//! [`PARK_COOLDOWN`] and skipped by endpoint selection until the cooldown
//! elapses, the same "stop hammering a bad node" idea as the teacher's
//! reconnect backoff in `indexer/realtime_processor.rs`, applied per-node
//! instead of per-connection.
//!
//! # Rate limiting
//!
//! Every endpoint also carries its own token bucket, configured by
//! `node_pool.per_endpoint_rps`/`per_endpoint_burst`: a caller blocks on
//! [`TokenBucket::acquire`] before issuing a request, rather than the pool
//! learning it overloaded a node only after the node starts failing it.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::client::{AccessNodeClient, BlockEnvelope};
use crate::error::{InfraError, Result};
use crate::types::{Event, Height};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum attempts for a single logical call before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// Backoff before the first retry.
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Backoff never grows past this.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Consecutive failures before an endpoint is parked.
const FAILURE_THRESHOLD_TO_PARK: u32 = 3;

/// How long a parked endpoint is skipped by selection.
const PARK_COOLDOWN: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN BUCKET
// ═══════════════════════════════════════════════════════════════════════════════

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A per-endpoint token bucket: `capacity` tokens refilled at `rate` per
/// second, blocking callers until one is available rather than rejecting
/// them outright.
struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<TokenBucketState>,
}

impl TokenBucket {
    fn new(rate: u32, capacity: u32) -> Self {
        Self {
            rate: f64::from(rate.max(1)),
            capacity: f64::from(capacity.max(1)),
            state: Mutex::new(TokenBucketState {
                tokens: f64::from(capacity.max(1)),
                last_refill: Instant::now(),
            }),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate))
                }
            };

            match wait {
                None => return,
                Some(duration) => sleep(duration).await,
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOLED ENDPOINT
// ═══════════════════════════════════════════════════════════════════════════════

struct PooledEndpoint {
    client: Arc<AccessNodeClient>,
    label: String,
    consecutive_failures: AtomicU32,
    parked_until: RwLock<Option<Instant>>,
    bucket: TokenBucket,
}

impl PooledEndpoint {
    fn new(label: impl Into<String>, client: Arc<AccessNodeClient>, rps: u32, burst: u32) -> Self {
        Self {
            client,
            label: label.into(),
            consecutive_failures: AtomicU32::new(0),
            parked_until: RwLock::new(None),
            bucket: TokenBucket::new(rps, burst),
        }
    }

    async fn is_parked(&self) -> bool {
        match *self.parked_until.read().await {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= FAILURE_THRESHOLD_TO_PARK {
            let until = Instant::now() + PARK_COOLDOWN;
            *self.parked_until.write().await = Some(until);
            warn!(endpoint = %self.label, failures, cooldown_secs = PARK_COOLDOWN.as_secs(), "parking endpoint");
        }
    }
}

impl std::fmt::Debug for PooledEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEndpoint")
            .field("label", &self.label)
            .field(
                "consecutive_failures",
                &self.consecutive_failures.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Routes requests round-robin across live endpoints, or to the appropriate
/// historic (spork-scoped) endpoint, retrying with backoff and parking
/// endpoints that keep failing.
#[derive(Debug)]
pub struct NodePool {
    live: Vec<PooledEndpoint>,
    next_live: AtomicUsize,
    historic: Vec<PooledEndpoint>,
}

impl NodePool {
    /// Create a pool from one or more live endpoints (round-robinned) and
    /// zero or more historic (spork-scoped) endpoints, rate limited per
    /// endpoint at `per_endpoint_rps` with `per_endpoint_burst` burst
    /// capacity.
    ///
    /// `historic` should be ordered with the most recent spork first, since
    /// selection picks the first historic endpoint whose spork floor is at
    /// or below the requested height.
    ///
    /// # Panics
    ///
    /// Panics if `live` is empty; the pool needs at least one endpoint
    /// tracking the current spork's tip.
    #[must_use]
    pub fn new(live: Vec<Arc<AccessNodeClient>>, historic: Vec<(String, Arc<AccessNodeClient>)>, per_endpoint_rps: u32, per_endpoint_burst: u32) -> Self {
        assert!(!live.is_empty(), "node pool requires at least one live endpoint");
        Self {
            live: live
                .into_iter()
                .enumerate()
                .map(|(i, client)| PooledEndpoint::new(format!("live-{i}"), client, per_endpoint_rps, per_endpoint_burst))
                .collect(),
            next_live: AtomicUsize::new(0),
            historic: historic
                .into_iter()
                .map(|(label, client)| PooledEndpoint::new(label, client, per_endpoint_rps, per_endpoint_burst))
                .collect(),
        }
    }

    /// Create a pool with only a single live endpoint (no historic sporks
    /// configured), using default rate-limit settings.
    #[must_use]
    pub fn live_only(live: Arc<AccessNodeClient>) -> Self {
        Self::new(vec![live], Vec::new(), 100, 200)
    }

    /// Round-robin across live endpoints that are unparked and cover
    /// `height`, cycling the shared cursor so repeated calls spread load.
    async fn select_live(&self, height: Height) -> Option<&PooledEndpoint> {
        let n = self.live.len();
        for _ in 0..n {
            let idx = self.next_live.fetch_add(1, Ordering::Relaxed) % n;
            let endpoint = &self.live[idx];
            if height >= endpoint.client.spork_floor() && !endpoint.is_parked().await {
                return Some(endpoint);
            }
        }
        None
    }

    /// Select the best endpoint to serve `height`: a round-robinned live
    /// endpoint if one covers it, else the first unparked historic endpoint
    /// whose spork floor is at or below `height`.
    async fn select_endpoint(&self, height: Height) -> Result<&PooledEndpoint> {
        if let Some(endpoint) = self.select_live(height).await {
            return Ok(endpoint);
        }

        for endpoint in &self.historic {
            if height >= endpoint.client.spork_floor() && !endpoint.is_parked().await {
                return Ok(endpoint);
            }
        }

        // Every covering endpoint is parked; fall back to the first live
        // endpoint anyway rather than fail outright; its own retry loop
        // will surface the real error if it is truly down.
        if let Some(first) = self.live.first() {
            if height >= first.client.spork_floor() {
                return Ok(first);
            }
        }

        Err(InfraError::BelowSporkFloor {
            floor: self
                .historic
                .last()
                .map_or_else(|| self.live[0].client.spork_floor(), |e| e.client.spork_floor()),
        }
        .into())
    }

    /// Fetch the latest sealed height from a round-robinned live endpoint,
    /// retrying transient failures with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if all attempts fail.
    #[instrument(skip(self))]
    pub async fn latest_sealed_height(&self) -> Result<Height> {
        let endpoint = self.select_live(Height::ZERO).await.unwrap_or(&self.live[0]);
        call_with_retry(endpoint, |client| client.latest_sealed_height()).await
    }

    /// Fetch a fully-assembled block, routing to the endpoint that covers
    /// `height` and retrying transient failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::BelowSporkFloor`] if no configured endpoint
    /// covers `height`, or an error if all retry attempts fail.
    #[instrument(skip(self), fields(height = height.value()))]
    pub async fn fetch_block_envelope(&self, height: Height) -> Result<Option<BlockEnvelope>> {
        let endpoint = self.select_endpoint(height).await?;
        call_with_retry(endpoint, |client| client.fetch_block_envelope(height)).await
    }

    /// Fetch events of a single type across a height range, routing to the
    /// endpoint that covers `from`.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::BelowSporkFloor`] if no configured endpoint
    /// covers `from`, or an error if all retry attempts fail.
    #[instrument(skip(self))]
    pub async fn get_events_for_height_range(
        &self,
        event_type: &str,
        from: Height,
        to: Height,
    ) -> Result<Vec<Event>> {
        let endpoint = self.select_endpoint(from).await?;
        call_with_retry(endpoint, |client| {
            client.get_events_for_height_range(event_type, from, to)
        })
        .await
    }
}

/// Run `op` against `endpoint`'s client, retrying up to [`MAX_ATTEMPTS`]
/// times with exponentially growing backoff, and updating the endpoint's
/// failure bookkeeping so repeatedly-failing nodes get parked.
///
/// Every attempt waits on the endpoint's token bucket first, so a caller
/// hammering a single endpoint slows down before the node starts rejecting
/// it, not after.
///
/// [`InfraError::BelowSporkFloor`] is never retried: it is a routing error,
/// not a transient one, and a different endpoint must serve the request.
async fn call_with_retry<T, F, Fut>(endpoint: &PooledEndpoint, op: F) -> Result<T>
where
    F: Fn(&AccessNodeClient) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        endpoint.bucket.acquire().await;

        match op(&endpoint.client).await {
            Ok(value) => {
                endpoint.record_success();
                return Ok(value);
            }
            Err(e) if is_below_spork_floor(&e) => return Err(e),
            Err(e) => {
                endpoint.record_failure().await;

                if attempt == MAX_ATTEMPTS {
                    warn!(endpoint = %endpoint.label, attempt, error = ?e, "exhausted retry attempts");
                    return Err(e);
                }

                debug!(endpoint = %endpoint.label, attempt, backoff_ms = backoff.as_millis(), error = ?e, "retrying after backoff");
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    unreachable!("loop always returns within MAX_ATTEMPTS iterations")
}

fn is_below_spork_floor(err: &crate::error::AppError) -> bool {
    matches!(
        err,
        crate::error::AppError::Infra(InfraError::BelowSporkFloor { .. })
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_client(spork_floor: u64) -> Arc<AccessNodeClient> {
        Arc::new(
            AccessNodeClient::new("https://rest-mainnet.onflow.org", Height::new(spork_floor))
                .expect("client builds"),
        )
    }

    #[tokio::test]
    async fn selects_live_endpoint_above_its_floor() {
        let pool = NodePool::live_only(make_client(1000));
        let endpoint = pool.select_endpoint(Height::new(2000)).await.unwrap();
        assert_eq!(endpoint.label, "live-0");
    }

    #[tokio::test]
    async fn round_robins_across_live_endpoints() {
        let pool = NodePool::new(vec![make_client(0), make_client(0)], Vec::new(), 100, 200);
        let first = pool.select_endpoint(Height::new(10)).await.unwrap().label.clone();
        let second = pool.select_endpoint(Height::new(10)).await.unwrap().label.clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn selects_historic_endpoint_below_live_floor() {
        let pool = NodePool::new(
            vec![make_client(2000)],
            vec![("spork-1".into(), make_client(0))],
            100,
            200,
        );
        let endpoint = pool.select_endpoint(Height::new(500)).await.unwrap();
        assert_eq!(endpoint.label, "spork-1");
    }

    #[tokio::test]
    async fn errors_below_every_floor() {
        let pool = NodePool::new(
            vec![make_client(2000)],
            vec![("spork-1".into(), make_client(1000))],
            100,
            200,
        );
        let result = pool.select_endpoint(Height::new(500)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn endpoint_parks_after_threshold_failures() {
        let endpoint = PooledEndpoint::new("test", make_client(0), 100, 200);
        assert!(!endpoint.is_parked().await);

        for _ in 0..FAILURE_THRESHOLD_TO_PARK {
            endpoint.record_failure().await;
        }

        assert!(endpoint.is_parked().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let endpoint = PooledEndpoint::new("test", make_client(0), 100, 200);
        endpoint.record_failure().await;
        endpoint.record_success();
        assert_eq!(endpoint.consecutive_failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn token_bucket_limits_burst() {
        let bucket = TokenBucket::new(1, 1);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
