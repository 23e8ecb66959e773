//! Configuration loading and validation for the Flow indexer.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use flow_indexer::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("Live endpoints: {:?}", settings.node_pool.live_endpoints);
//! ```

mod settings;

pub use settings::{
    ApiSettings, CacheSettings, DatabaseSettings, HistoricEndpoint, IggySettings, LoggingSettings,
    MetricsSettings, NodePoolSettings, PipelineSettings, RateLimitSettings, Settings, WebSocketSettings,
};
