//! Error types for the autoscaling control loop.
//!
//! Three classes from the reconciler's error handling design: transient tick
//! failures, per-node update failures, and fatal (failure-budget exceeded)
//! errors. Kept as distinct `thiserror` enums rather than one flat enum so
//! each module's fallible operations stay narrowly typed; `anyhow::Error` is
//! used at the call sites that just need to propagate with context.

use thiserror::Error;

/// Errors a [`crate::provider::NodeProvider`] implementation can report.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("provider transport retry exhausted: {0}")]
    TransportRetryExhausted(String),

    #[error("provider request failed: {0}")]
    Request(#[from] anyhow::Error),
}

impl ProviderError {
    /// Whether this error is the long-observed Kubernetes API-flake case that
    /// the failure budget explicitly excludes from `num_failures`.
    pub fn is_transient_transport_exhaustion(&self) -> bool {
        matches!(self, ProviderError::TransportRetryExhausted(_))
    }
}

/// Errors surfaced by the config refresher.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Top-level reconciler tick error, carrying enough information for `update()`
/// to decide whether to count it toward the failure budget.
#[derive(Debug, Error)]
pub enum AutoscalerError {
    #[error("config refresh failed: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("tick failed: {0}")]
    Tick(#[from] anyhow::Error),
}

impl AutoscalerError {
    /// Kubernetes transport-retry exhaustion is tolerated and excluded from
    /// the consecutive-failure counter.
    pub fn is_k8s_transient(&self) -> bool {
        matches!(self, AutoscalerError::Provider(e) if e.is_transient_transport_exhaustion())
    }
}

pub type Result<T> = std::result::Result<T, AutoscalerError>;
