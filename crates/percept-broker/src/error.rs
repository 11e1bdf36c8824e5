// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the percept broker

use percept_protocol::ProtocolError;

/// Result type alias using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the broker event loop and its transports.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Socket-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZeroMQ transport error
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope encode failure (decode failures are handled locally)
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The configured client endpoint could not be interpreted
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A frame exceeded the configured maximum message size
    #[error("frame of {0} bytes exceeds maximum message size")]
    FrameTooLarge(usize),

    /// A co-located engine callback panicked or its worker thread died
    #[error("engine callback failed: {0}")]
    EngineCallback(String),

    /// The client event channel closed; every transport task is gone
    #[error("client event channel closed")]
    ChannelClosed,
}
