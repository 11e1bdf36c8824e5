// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the engine runner

use percept_protocol::ProtocolError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while running a cognitive engine against the broker.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// ZMQ communication error
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// Envelope encode failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Every reconnect attempt failed; the runner gives up
    #[error("engine {engine_name} ran out of retries, abandoning server connection")]
    RetriesExhausted { engine_name: String },

    /// The engine callback panicked or its worker thread died
    #[error("engine callback failed: {0}")]
    Callback(String),
}
