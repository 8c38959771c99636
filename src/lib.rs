//! Leakwatch: a leak-site harvesting and orchestration engine
//!
//! This crate fetches HTML snapshots of many hostile, anti-bot-protected
//! targets over a Tor SOCKS proxy, records availability and HTTP fingerprints
//! in a shared JSON registry, and drives the downstream extraction stage
//! through a resumable fleet crawl and a periodic update scheduler.

pub mod config;
pub mod fleet;
pub mod harvest;
pub mod lock;
pub mod proxy;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod supervise;

use thiserror::Error;

/// Main error type for Leakwatch operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Another harvest is already running{}", .pid.map(|p| format!(" (PID {})", p)).unwrap_or_default())]
    LockContention { pid: Option<u32> },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Target not found in registry: {0}")]
    TargetNotFound(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxy(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// Registry decode and validation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to access registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed registry JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid target entry: {0}")]
    InvalidTarget(String),

    #[error("Invalid endpoint in target '{target}': {message}")]
    InvalidEndpoint { target: String, message: String },
}

/// Result type alias for Leakwatch operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{Harvester, HarvestOptions, HarvestStats};
pub use registry::{Endpoint, FetchStrategy, Registry, Target};
