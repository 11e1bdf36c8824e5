// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # percept-client
//!
//! Client library for feeding named sources into a percept broker and
//! consuming the results. Each source is gated by a token bucket seeded from
//! the server's welcome handshake: the user-supplied producer is only
//! invoked while a token is available, and every response carrying
//! `return_token` refills the bucket. A heartbeat loop keeps the connection
//! observable in both directions and triggers reconnects on server silence.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bucket;
pub mod client;
pub mod error;
pub mod producer;
pub mod transport;

pub use bucket::{TokenBucket, TokenBuckets};
pub use client::PerceptClient;
pub use error::{ClientError, Result};
pub use producer::{FrameProducer, ProducerWrapper, ResultConsumer};
pub use transport::{ClientTransport, WsTransport, ZmqTransport};
