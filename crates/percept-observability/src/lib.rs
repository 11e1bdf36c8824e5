// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # percept-observability
//!
//! Logging initialization shared by percept binaries and tests.
//!
//! Library crates emit `tracing` events and never install subscribers; a
//! process entry point calls [`init_logging`] exactly once.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod init;

pub use init::{init_logging, init_logging_default};
