//! Errors for service worker operations.

use fleetkit_net::NetError;
use thiserror::Error;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// Pre-warming the static store failed; this generation must not activate.
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    /// A cached API response exists but is older than its TTL and the
    /// network is down.
    #[error("Stale entry for {url} expired and network unavailable")]
    Expired { url: String },

    /// Nothing in the cache and nothing from the network.
    #[error("No response available for {0}")]
    Unavailable(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceWorkerError {
    /// Short category name for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstallFailed(_) => "install",
            Self::Network(_) => "network",
            Self::Expired { .. } => "expired",
            Self::Unavailable(_) => "unavailable",
            Self::State(_) => "state",
            Self::Cache(_) => "cache",
            Self::Config(_) => "config",
            Self::InvalidPayload(_) => "payload",
            Self::Io(_) => "io",
        }
    }
}

/// Result alias for service worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
