// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for percept

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initialize console logging with the given filter directive.
///
/// When `filter` is `None`, the `RUST_LOG` environment variable is consulted,
/// falling back to `info`. Safe to call more than once; later calls are
/// no-ops.
///
/// # Arguments
/// * `filter` - Optional filter directive, e.g. `"percept_broker=debug,info"`
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    let env_filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    // try_init so tests and embedders can race without panicking
    let _ = Registry::default().with(env_filter).with(console_layer).try_init();

    Ok(())
}

/// Initialize logging with default settings
pub fn init_logging_default() -> Result<()> {
    init_logging(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(Some("debug")).unwrap();
        init_logging(Some("info")).unwrap();
    }
}
