// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # percept-broker
//!
//! The network-facing dispatcher at the center of percept. It accepts input
//! frames from many independent client sources, admits them only when
//! flow-control tokens are available, routes each frame to currently-idle
//! engine workers registered for that source, keeps only the most recent
//! unsent frame per source under backpressure, detects worker and client
//! disconnection, and returns exactly one token per accepted frame once its
//! outcome is known.
//!
//! The broker runs as a single event loop owning all mutable state (token
//! ledgers, the source/worker registry); per-connection reader and writer
//! tasks only move bytes and feed decoded events into that loop.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod broker;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod local;
pub mod session;
pub mod ws;
pub mod zmq;

pub use broker::{Broker, BrokerRunner, EngineTransport, ZmqEngineTransport};
pub use dispatcher::{DispatchEffect, Dispatcher, WorkerAddr};
pub use error::{BrokerError, Result};
pub use ledger::TokenLedger;
pub use local::LocalEngine;
pub use session::{ClientEvent, ClientId, ClientSender, SessionHub};
