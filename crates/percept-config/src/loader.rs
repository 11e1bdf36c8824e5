// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 2-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)

use crate::{ConfigError, ConfigResult, PerceptConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "percept_configuration.toml";

/// Find the percept configuration file
///
/// Search order:
/// 1. `PERCEPT_CONFIG_PATH` environment variable
/// 2. Current working directory: `./percept_configuration.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    // 1. Check environment variable first
    if let Ok(env_path) = env::var("PERCEPT_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by PERCEPT_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    // 2. Search in common locations
    let mut search_paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Percept configuration file '{}' not found in any of these locations:\n{}\n\nSet PERCEPT_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
///
/// # Errors
///
/// Returns error if config file is not found, contains invalid TOML, or fails validation
pub fn load_config(config_path: Option<&Path>) -> ConfigResult<PerceptConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: PerceptConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    crate::validation::validate_config(&config)?;

    Ok(config)
}

/// Apply `PERCEPT_*` environment variable overrides to a loaded config.
///
/// Supported variables:
/// - `PERCEPT_CLIENT_ENDPOINT`, `PERCEPT_ENGINE_ENDPOINT`
/// - `PERCEPT_NUM_TOKENS`, `PERCEPT_INPUT_QUEUE_MAXSIZE`
/// - `PERCEPT_ENGINE_TIMEOUT_SECS`, `PERCEPT_CLIENT_TIMEOUT_SECS`
/// - `PERCEPT_ENGINE_NAME`, `PERCEPT_SOURCE_NAME`, `PERCEPT_SERVER_ADDRESS`
pub fn apply_environment_overrides(config: &mut PerceptConfig) {
    if let Ok(value) = env::var("PERCEPT_CLIENT_ENDPOINT") {
        config.broker.client_endpoint = value;
    }
    if let Ok(value) = env::var("PERCEPT_ENGINE_ENDPOINT") {
        config.broker.engine_endpoint = value;
    }
    if let Ok(value) = env::var("PERCEPT_NUM_TOKENS") {
        if let Ok(parsed) = value.parse() {
            config.broker.num_tokens_per_source = parsed;
        }
    }
    if let Ok(value) = env::var("PERCEPT_INPUT_QUEUE_MAXSIZE") {
        if let Ok(parsed) = value.parse() {
            config.broker.input_queue_maxsize = parsed;
        }
    }
    if let Ok(value) = env::var("PERCEPT_ENGINE_TIMEOUT_SECS") {
        if let Ok(parsed) = value.parse() {
            config.broker.engine_timeout_secs = parsed;
        }
    }
    if let Ok(value) = env::var("PERCEPT_CLIENT_TIMEOUT_SECS") {
        if let Ok(parsed) = value.parse() {
            config.broker.client_timeout_secs = parsed;
        }
    }
    if let Ok(value) = env::var("PERCEPT_ENGINE_NAME") {
        config.engine.engine_name = value;
    }
    if let Ok(value) = env::var("PERCEPT_SOURCE_NAME") {
        config.engine.source_name = value;
    }
    if let Ok(value) = env::var("PERCEPT_SERVER_ADDRESS") {
        config.engine.server_address = value;
    }
}
