//! # Percept - Cognitive Engine Offload Broker
//!
//! Percept offloads sensor/video processing from resource-constrained client
//! devices to remote cognitive engine workers, returning results with low,
//! bounded latency. Flow control is token-based: a client may only have as
//! many unacknowledged frames in flight per source as it holds tokens, and
//! every accepted frame eventually returns exactly one token.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! percept = "0.1"  # Default: broker + engine + client
//! ```
//!
//! ## Feature Flags
//!
//! - **`broker`** (default): Client session layer + engine dispatcher
//! - **`engine`** (default): Engine-side runner
//! - **`client`** (default): Producer/consumer client library
//!
//! ## Components
//!
//! - [`protocol`]: Wire envelopes, status codes, frame types
//! - [`config`]: TOML configuration with environment overrides
//! - [`observability`]: Logging initialization
//! - [`broker`]: The network-facing dispatcher
//! - [`engine`]: Engine runner connecting out to the broker
//! - [`client`]: Token-gated producer/consumer library

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use percept_config as config;
pub use percept_observability as observability;
pub use percept_protocol as protocol;

#[cfg(feature = "broker")]
pub use percept_broker as broker;

#[cfg(feature = "client")]
pub use percept_client as client;

#[cfg(feature = "engine")]
pub use percept_engine as engine;
