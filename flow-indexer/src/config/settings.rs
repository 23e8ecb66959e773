//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Flow Access Node pool configuration.
    pub node_pool: NodePoolSettings,
    /// Database configuration.
    pub database: DatabaseSettings,
    /// Apache Iggy streaming configuration.
    pub iggy: IggySettings,
    /// API server configuration.
    pub api: ApiSettings,
    /// In-memory cache configuration.
    pub cache: CacheSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Metrics configuration.
    pub metrics: MetricsSettings,
    /// Ingestion, derivation, and recovery tuning.
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `INDEXER_` prefix
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("node_pool.live_endpoints", vec!["http://localhost:8080".to_string()])?
            .set_default("node_pool.historic_endpoints", Vec::<String>::new())?
            .set_default("node_pool.spork_floor", 0)?
            .set_default("node_pool.request_timeout_ms", 30000)?
            .set_default("node_pool.max_retries", 3)?
            .set_default("node_pool.retry_delay_ms", 1000)?
            .set_default("node_pool.per_endpoint_rps", 100)?
            .set_default("node_pool.per_endpoint_burst", 200)?
            .set_default("database.url", "postgres://localhost/flow_indexer")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("iggy.url", "tcp://localhost:8090")?
            .set_default("iggy.stream_name", "flow-events")?
            .set_default("iggy.partition_count", 3)?
            .set_default("iggy.replication_factor", 1)?
            .set_default("iggy.username", "iggy")?
            .set_default("iggy.password", "iggy")?
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.cors_origins", vec!["http://localhost:5173"])?
            .set_default("api.request_timeout_ms", 30000)?
            .set_default("api.websocket.max_connections", 10000)?
            .set_default("api.websocket.ping_interval_ms", 30000)?
            .set_default("api.websocket.pong_timeout_ms", 10000)?
            .set_default("api.rate_limit.requests_per_second", 100)?
            .set_default("api.rate_limit.burst_size", 200)?
            .set_default("cache.ft_holding_ttl_ms", 5000)?
            .set_default("cache.ft_holding_max_capacity", 100_000)?
            .set_default("cache.nft_ownership_ttl_ms", 5000)?
            .set_default("cache.nft_ownership_max_capacity", 100_000)?
            .set_default("cache.stats_ttl_ms", 10000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            .set_default("pipeline.live_worker_count", 4)?
            .set_default("pipeline.live_batch_size", 50)?
            .set_default("pipeline.history_worker_count", 2)?
            .set_default("pipeline.history_batch_size", 100)?
            .set_default("pipeline.history_stop_height", 0)?
            .set_default("pipeline.enable_forward", true)?
            .set_default("pipeline.enable_history", true)?
            .set_default("pipeline.enable_live_derivers", true)?
            .set_default("pipeline.enable_history_derivers", true)?
            .set_default("pipeline.live_chunk", 10)?
            .set_default("pipeline.head_backfill_blocks", 100)?
            .set_default("pipeline.history_chunk", 100)?
            .set_default("pipeline.history_sleep_ms", 50)?
            .set_default("pipeline.max_reorg_depth", 50)?
            .set_default("pipeline.attempt_cap", 5)?
            .set_default("pipeline.lease_deadline_ms", 300_000)?
            .set_default("pipeline.script_inline_max_bytes", 8192)?
            .set_default("pipeline.raw_only", false)?
            // Load default configuration file
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Load environment-specific file
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            // Override with environment variables (INDEXER_ prefix)
            .add_source(
                Environment::with_prefix("INDEXER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Node pool validation
        if self.node_pool.live_endpoints.is_empty() {
            errors.push("node_pool.live_endpoints cannot be empty".into());
        }
        if self.node_pool.per_endpoint_rps == 0 {
            errors.push("node_pool.per_endpoint_rps must be non-zero".into());
        }

        // Database validation
        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }

        // API validation
        if self.api.port == 0 {
            errors.push("api.port must be non-zero".into());
        }
        if self.api.rate_limit.requests_per_second == 0 {
            errors.push("api.rate_limit.requests_per_second must be non-zero".into());
        }

        // Cache validation
        if self.cache.ft_holding_max_capacity == 0 {
            errors.push("cache.ft_holding_max_capacity must be non-zero".into());
        }

        // Pipeline validation
        if self.pipeline.attempt_cap == 0 {
            errors.push("pipeline.attempt_cap must be non-zero".into());
        }
        if self.pipeline.live_chunk == 0 {
            errors.push("pipeline.live_chunk must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A single historic (spork-scoped) Access Node endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricEndpoint {
    /// Endpoint URL.
    pub url: String,
    /// Lowest height this spork's endpoint can serve.
    pub spork_floor: u64,
}

/// Flow Access Node pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodePoolSettings {
    /// HTTP endpoints of the live (current-spork) Access Nodes, round-robinned.
    pub live_endpoints: Vec<String>,
    /// Historic (past-spork) endpoints, most recent spork first.
    #[serde(default)]
    pub historic_endpoints: Vec<HistoricEndpoint>,
    /// Lowest height the live endpoint's spork can serve.
    pub spork_floor: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum retry attempts for failed requests.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Token-bucket requests-per-second per endpoint.
    pub per_endpoint_rps: u32,
    /// Token-bucket burst size per endpoint.
    pub per_endpoint_burst: u32,
}

impl NodePoolSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Apache Iggy streaming configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IggySettings {
    /// Iggy server URL.
    pub url: String,
    /// Stream name for Flow events.
    pub stream_name: String,
    /// Number of partitions for the stream.
    pub partition_count: u32,
    /// Replication factor.
    pub replication_factor: u32,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
}

/// API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Rate limiting settings.
    pub rate_limit: RateLimitSettings,
}

impl ApiSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub ping_interval_ms: u64,
    /// Pong timeout in milliseconds.
    pub pong_timeout_ms: u64,
}

impl WebSocketSettings {
    /// Get the ping interval as a `Duration`.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Get the pong timeout as a `Duration`.
    #[must_use]
    pub const fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum requests per second per client.
    pub requests_per_second: u32,
    /// Burst size (allows temporary spikes).
    pub burst_size: u32,
}

/// In-memory cache configuration, one TTL/capacity pair per hot-path
/// derived table.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// TTL for fungible-token holding cache entries in milliseconds.
    pub ft_holding_ttl_ms: u64,
    /// Maximum capacity for the FT holding cache.
    pub ft_holding_max_capacity: u64,
    /// TTL for NFT ownership cache entries in milliseconds.
    pub nft_ownership_ttl_ms: u64,
    /// Maximum capacity for the NFT ownership cache.
    pub nft_ownership_max_capacity: u64,
    /// TTL for aggregate stats cache entries in milliseconds.
    pub stats_ttl_ms: u64,
}

impl CacheSettings {
    /// Get the FT holding TTL as a `Duration`.
    #[must_use]
    pub const fn ft_holding_ttl(&self) -> Duration {
        Duration::from_millis(self.ft_holding_ttl_ms)
    }

    /// Get the NFT ownership TTL as a `Duration`.
    #[must_use]
    pub const fn nft_ownership_ttl(&self) -> Duration {
        Duration::from_millis(self.nft_ownership_ttl_ms)
    }

    /// Get the stats TTL as a `Duration`.
    #[must_use]
    pub const fn stats_ttl(&self) -> Duration {
        Duration::from_millis(self.stats_ttl_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Host to bind metrics server to.
    pub host: String,
    /// Port for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Get the metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Ingestion, derivation, and recovery tuning knobs.
///
/// Mirrors the configuration surface named in the indexer design: worker
/// counts and batch sizes for each ingester, chunk sizes and throttles for
/// each deriver, the reorg depth cap, and the lease attempt/deadline
/// parameters for the Async Worker.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Forward ingester fetch parallelism.
    pub live_worker_count: u32,
    /// Forward ingester batch size.
    pub live_batch_size: u32,
    /// Backward ingester fetch parallelism.
    pub history_worker_count: u32,
    /// Backward ingester batch size.
    pub history_batch_size: u32,
    /// Lower bound height to cease backward ingestion; 0 disables the stop.
    pub history_stop_height: u64,
    /// Toggle the Forward Ingester.
    pub enable_forward: bool,
    /// Toggle the Backward Ingester.
    pub enable_history: bool,
    /// Toggle the Live Deriver.
    pub enable_live_derivers: bool,
    /// Toggle the History Deriver.
    pub enable_history_derivers: bool,
    /// Heights per Live Deriver chunk.
    pub live_chunk: u32,
    /// Startup seed depth for the Live Deriver, behind the ingester tip.
    pub head_backfill_blocks: u32,
    /// Heights per History Deriver chunk.
    pub history_chunk: u32,
    /// Throttle between History Deriver chunks, in milliseconds.
    pub history_sleep_ms: u64,
    /// Hard cap on Rollback Engine walk-back depth.
    pub max_reorg_depth: u64,
    /// Lease attempts before dead-lettering.
    pub attempt_cap: u32,
    /// ACTIVE to FAILED lease promotion threshold, in milliseconds.
    pub lease_deadline_ms: u64,
    /// Script bodies at or under this size are inlined rather than
    /// externalized to the dedicated script store.
    pub script_inline_max_bytes: u32,
    /// When set, disables all derivers and async workers; the indexer only
    /// ingests raw data.
    pub raw_only: bool,
    /// Per-processor kill switch, keyed by [`crate::processors::Processor::name`].
    /// A processor absent from the map defaults to enabled.
    #[serde(default)]
    pub enable_processor: HashMap<String, bool>,
}

impl PipelineSettings {
    /// Throttle between History Deriver chunks as a `Duration`.
    #[must_use]
    pub const fn history_sleep(&self) -> Duration {
        Duration::from_millis(self.history_sleep_ms)
    }

    /// Lease deadline as a `chrono::Duration`.
    #[must_use]
    pub fn lease_deadline(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_deadline_ms as i64)
    }

    /// Whether `processor` is enabled, defaulting to `true` when absent
    /// from [`Self::enable_processor`].
    #[must_use]
    pub fn processor_enabled(&self, processor: &str) -> bool {
        self.enable_processor.get(processor).copied().unwrap_or(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn node_pool_durations() {
        let node_pool = NodePoolSettings {
            live_endpoints: vec!["http://localhost:8080".into()],
            historic_endpoints: vec![],
            spork_floor: 0,
            request_timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 500,
            per_endpoint_rps: 100,
            per_endpoint_burst: 200,
        };

        assert_eq!(node_pool.request_timeout(), Duration::from_millis(30000));
        assert_eq!(node_pool.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn api_socket_addr() {
        let api = ApiSettings {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec![],
            request_timeout_ms: 30000,
            websocket: WebSocketSettings {
                max_connections: 1000,
                ping_interval_ms: 30000,
                pong_timeout_ms: 10000,
            },
            rate_limit: RateLimitSettings {
                requests_per_second: 100,
                burst_size: 200,
            },
        };

        assert_eq!(api.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn processor_enabled_defaults_true_when_absent() {
        let pipeline = create_valid_settings().pipeline;
        assert!(pipeline.processor_enabled("token_transfer"));
    }

    #[test]
    fn processor_enabled_honors_kill_switch() {
        let mut pipeline = create_valid_settings().pipeline;
        pipeline.enable_processor.insert("daily_balance".into(), false);
        assert!(!pipeline.processor_enabled("daily_balance"));
    }

    #[test]
    fn validation_catches_zero_connections() {
        let mut settings = create_valid_settings();
        settings.database.max_connections = 0;

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_connections")));
    }

    #[test]
    fn validation_catches_min_exceeds_max() {
        let mut settings = create_valid_settings();
        settings.database.min_connections = 20;
        settings.database.max_connections = 10;

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_connections")));
    }

    #[test]
    fn validation_catches_zero_attempt_cap() {
        let mut settings = create_valid_settings();
        settings.pipeline.attempt_cap = 0;

        let result = settings.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("attempt_cap")));
    }

    fn create_valid_settings() -> Settings {
        Settings {
            node_pool: NodePoolSettings {
                live_endpoints: vec!["http://localhost:8080".into()],
                historic_endpoints: vec![],
                spork_floor: 0,
                request_timeout_ms: 30000,
                max_retries: 3,
                retry_delay_ms: 1000,
                per_endpoint_rps: 100,
                per_endpoint_burst: 200,
            },
            database: DatabaseSettings {
                url: "postgres://localhost/test".into(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout_ms: 5000,
                idle_timeout_ms: 600_000,
            },
            iggy: IggySettings {
                url: "tcp://localhost:8090".into(),
                stream_name: "flow-events".into(),
                partition_count: 3,
                replication_factor: 1,
                username: "iggy".into(),
                password: "iggy".into(),
            },
            api: ApiSettings {
                host: "0.0.0.0".into(),
                port: 8080,
                cors_origins: vec![],
                request_timeout_ms: 30000,
                websocket: WebSocketSettings {
                    max_connections: 10000,
                    ping_interval_ms: 30000,
                    pong_timeout_ms: 10000,
                },
                rate_limit: RateLimitSettings {
                    requests_per_second: 100,
                    burst_size: 200,
                },
            },
            cache: CacheSettings {
                ft_holding_ttl_ms: 5000,
                ft_holding_max_capacity: 100_000,
                nft_ownership_ttl_ms: 5000,
                nft_ownership_max_capacity: 100_000,
                stats_ttl_ms: 10000,
            },
            logging: LoggingSettings {
                level: "info".into(),
                format: "json".into(),
                file_path: None,
            },
            metrics: MetricsSettings {
                enabled: true,
                host: "0.0.0.0".into(),
                port: 9090,
            },
            pipeline: PipelineSettings {
                live_worker_count: 4,
                live_batch_size: 50,
                history_worker_count: 2,
                history_batch_size: 100,
                history_stop_height: 0,
                enable_forward: true,
                enable_history: true,
                enable_live_derivers: true,
                enable_history_derivers: true,
                live_chunk: 10,
                head_backfill_blocks: 100,
                history_chunk: 100,
                history_sleep_ms: 50,
                max_reorg_depth: 50,
                attempt_cap: 5,
                lease_deadline_ms: 300_000,
                script_inline_max_bytes: 8192,
                raw_only: false,
                enable_processor: HashMap::new(),
            },
        }
    }
}
