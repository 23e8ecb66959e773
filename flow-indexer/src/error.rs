//! Layered error types for the Flow indexer.
//!
//! - [`DomainError`] - Business logic errors (bad ranges, dependency gating, dead letters)
//! - [`InfraError`] - Infrastructure errors (database, Access Node RPC, streaming)
//! - [`AppError`] - Application-level errors combining domain and infra
//! - [`ApiError`] - HTTP API errors with status codes
//!
//! # Error philosophy
//!
//! Domain errors are recoverable and describe conditions the pipeline itself
//! detects (a reorg past the configured depth, a processor asked to run past
//! its dependency's checkpoint). Infrastructure errors are logged but their
//! details are hidden from API consumers. Application code uses the
//! [`Result`] alias; the committer and API layer match on `AppError` variants
//! that change control flow (`ReorgDetected`, `ShutdownRequested`).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::types::Height;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors representing pipeline invariant violations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// Rollback divergence exceeds the configured maximum reorg depth.
    #[error("reorg requires rolling back {required} heights, exceeding max depth {max}")]
    ReorgBeyondDepth {
        /// Heights that would need to be rolled back.
        required: u64,
        /// Configured maximum reorg depth.
        max: u64,
    },

    /// A requested height range is malformed (e.g. `from > to`).
    #[error("invalid height range: {from}..={to}")]
    InvalidHeightRange {
        /// Range start.
        from: Height,
        /// Range end.
        to: Height,
    },

    /// A Phase 2 processor was asked to run past a Phase 1 dependency's
    /// checkpoint.
    #[error(
        "processor {processor} depends on checkpoint {required} but only {actual} is available"
    )]
    DependencyNotReady {
        /// Name of the processor that is blocked.
        processor: String,
        /// Name of the checkpoint it depends on.
        checkpoint: String,
        /// Height required.
        required: Height,
        /// Height actually available.
        actual: Height,
    },

    /// No processor is registered under the given name.
    #[error("unknown processor: {0}")]
    UnknownProcessor(String),

    /// A lease exceeded its retry budget and was moved to the dead letter
    /// queue.
    #[error("lease for {worker} covering {from}..={to} was dead-lettered")]
    DeadLetteredLease {
        /// Worker that held the lease.
        worker: String,
        /// Range start.
        from: Height,
        /// Range end.
        to: Height,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Access Node RPC error.
    #[error("access node error: {0}")]
    Rpc(String),

    /// The requested height is below the configured spork floor; it must be
    /// served from a different (historic) Access Node endpoint or spork
    /// record.
    #[error("height is below the spork floor: {floor}")]
    BelowSporkFloor {
        /// Lowest height the current spork can serve.
        floor: Height,
    },

    /// Streaming error (Apache Iggy).
    #[error("streaming error: {0}")]
    Streaming(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event payload failed to decode into its expected processor shape.
    #[error("event decoding error: {0}")]
    EventDecoding(String),

    /// Resource not found in storage.
    #[error("resource not found")]
    NotFound,

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Timeout waiting for an operation.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Address or identifier parsing error.
    #[error("address parsing error: {0}")]
    AddressParsing(String),

    /// Catch-all for infrastructure failures that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// A chain reorganization was detected; the committer should route this
    /// to the Rollback Engine rather than treat it as a fatal error.
    #[error("chain reorg detected, rollback needed to height {rollback_height}")]
    ReorgDetected {
        /// Height to roll back to.
        rollback_height: Height,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until rate limit resets.
        retry_after_secs: u64,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Authentication required or failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Internal server error (with source for logging).
    #[error("internal error")]
    Internal(#[source] eyre::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::App(AppError::Domain(DomainError::InvalidHeightRange { .. })) | Self::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }

            Self::App(AppError::Infra(InfraError::NotFound)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string())
            }

            Self::RateLimited { retry_after_secs } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", retry_after_secs.to_string())],
                    Json(json!({
                        "error": {
                            "code": "RATE_LIMITED",
                            "message": self.to_string(),
                            "retry_after_secs": retry_after_secs
                        }
                    })),
                )
                    .into_response();
            }

            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            Self::App(_) | Self::Internal(_) => {
                tracing::error!(error = ?self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_display() {
        let err = DomainError::UnknownProcessor("ft_holdings".into());
        assert!(err.to_string().contains("ft_holdings"));
    }

    #[test]
    fn app_error_from_domain() {
        let domain = DomainError::InvalidHeightRange {
            from: Height::new(10),
            to: Height::new(5),
        };
        let app: AppError = domain.into();
        assert!(matches!(
            app,
            AppError::Domain(DomainError::InvalidHeightRange { .. })
        ));
    }

    #[test]
    fn app_error_from_infra() {
        let infra = InfraError::NotFound;
        let app: AppError = infra.into();
        assert!(matches!(app, AppError::Infra(InfraError::NotFound)));
    }
}
