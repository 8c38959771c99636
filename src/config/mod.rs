//! Configuration module for Leakwatch
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file and layering environment overrides on top of it.
//!
//! # Example
//!
//! ```no_run
//! use leakwatch::config::resolve_config;
//! use std::path::Path;
//!
//! let (config, _hash) = resolve_config(Some(Path::new("leakwatch.toml"))).unwrap();
//! println!("Registry: {}", config.paths.registry_file().display());
//! ```

mod env;
mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, CaptureConfig, Config, ExtractConfig, FleetConfig, HarvestConfig, PathsConfig,
    ProxyConfig, SchedulerConfig, DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use env::{apply_env_overrides, apply_process_env};
pub use parser::{compute_config_hash, load_config, load_config_with_hash, resolve_config};
pub use validation::validate;
