// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module provides validation logic to ensure configuration values are
//! consistent, within valid ranges, and don't conflict with each other.

use crate::{ConfigError, ConfigResult, PerceptConfig};

/// Validate the complete configuration
///
/// Checks for:
/// - Non-zero flow control limits and timeouts
/// - Transport flag consistency (IPC requires ZeroMQ)
/// - Sane heartbeat/silence relationship on the client
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` with details if validation fails
pub fn validate_config(config: &PerceptConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    if config.broker.num_tokens_per_source == 0 {
        errors.push("broker.num_tokens_per_source must be at least 1".to_string());
    }
    if config.broker.input_queue_maxsize == 0 {
        errors.push("broker.input_queue_maxsize must be at least 1".to_string());
    }
    if config.broker.engine_timeout_secs == 0 {
        errors.push("broker.engine_timeout_secs must be non-zero".to_string());
    }
    if config.broker.client_timeout_secs == 0 {
        errors.push("broker.client_timeout_secs must be non-zero".to_string());
    }
    if config.broker.use_ipc && !config.broker.use_zeromq {
        errors.push("broker.use_ipc requires broker.use_zeromq".to_string());
    }

    if config.engine.poll_timeout_millis == 0 {
        errors.push("engine.poll_timeout_millis must be non-zero".to_string());
    }
    if config.engine.engine_name.is_empty() {
        errors.push("engine.engine_name must not be empty".to_string());
    }
    if config.engine.source_name.is_empty() {
        errors.push("engine.source_name must not be empty".to_string());
    }

    if config.client.heartbeat_interval_secs == 0 {
        errors.push("client.heartbeat_interval_secs must be non-zero".to_string());
    }
    if config.client.silence_timeout_secs < config.client.heartbeat_interval_secs {
        errors.push(
            "client.silence_timeout_secs must be at least the heartbeat interval".to_string(),
        );
    }

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}
