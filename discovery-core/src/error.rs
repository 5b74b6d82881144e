//! The error taxonomy. Kinds, not type names — callers match on
//! `DiscoveryError` variants, not on strings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("{0}")]
    Generic(String),

    #[error("discovery timed out after {0:.1}s")]
    Timeout(f64),

    #[error("rate limit exceeded for {0}")]
    RateLimitExceeded(String),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("protocol {0} is not available")]
    ProtocolNotAvailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid device data: {0}")]
    InvalidDevice(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("plugin {name} error: {message}")]
    Plugin { name: String, message: String },

    #[error("circular dependency detected at plugin '{0}'")]
    CircularDependency(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
