// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Percept Configuration System
//!
//! Type-safe configuration loader for percept with support for:
//! - TOML file parsing
//! - Environment variable overrides
//! - Validation of ports, timeouts and flow-control limits
//!
//! ## Usage
//!
//! ```rust,no_run
//! use percept_config::{load_config, PerceptConfig};
//!
//! // Load configuration with automatic file discovery and overrides
//! let config = load_config(None).expect("Failed to load config");
//!
//! println!("Engine endpoint: {}", config.broker.engine_endpoint);
//! println!("Tokens per source: {}", config.broker.num_tokens_per_source);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::validate_config;

/// Re-export for convenience
pub use serde;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_types_compile() {
        // Smoke test to ensure types are properly defined
        let _config = PerceptConfig::default();
    }
}
