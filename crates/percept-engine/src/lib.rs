// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # percept-engine
//!
//! The engine-side peer of the percept dispatcher. An engine process
//! implements [`CognitiveEngine`] and hands it to an [`EngineRunner`], which
//! connects out to the broker, registers the source it serves, processes one
//! frame at a time and answers heartbeats, reconnecting on transport failure
//! until its retry budget is exhausted.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod engine;
pub mod error;
pub mod runner;

pub use engine::CognitiveEngine;
pub use error::{EngineError, Result};
pub use runner::EngineRunner;
