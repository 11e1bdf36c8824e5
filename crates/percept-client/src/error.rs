// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the percept client library

use percept_protocol::ProtocolError;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the client library.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// ZMQ transport error
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// Envelope encode failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The endpoint string matched no known transport scheme
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
