// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the percept wire protocol

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire envelopes.
///
/// A decode failure is always local to one message: the receiver logs it,
/// drops the message and keeps the connection open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Envelope could not be serialized
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// Inbound bytes did not form a valid envelope
    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// Structured extras did not contain valid JSON
    #[error("invalid extras payload: {0}")]
    Extras(#[from] serde_json::Error),
}
