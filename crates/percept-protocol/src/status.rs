// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Terminal status codes attached to every result returned to a client

use serde::{Deserialize, Serialize};

/// Outcome of one submitted frame.
///
/// Admission errors (`NoEngineForSource`, `NoTokens`) and backpressure
/// (`ServerDroppedFrame`) are reported synchronously by the session layer;
/// `EngineError` is synthesized by the dispatcher when a worker dies while
/// holding an in-flight frame. `DecodeError` is local bookkeeping only and
/// is never placed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    /// The frame's source is not currently consumed by any engine worker
    NoEngineForSource,
    /// The per-source token balance was zero at admission time
    NoTokens,
    /// The dispatcher could not accept the frame (queue full or superseded)
    ServerDroppedFrame,
    /// The serving engine worker died before producing a result
    EngineError,
    /// Local-only: an inbound message failed to deserialize
    DecodeError,
}

impl StatusCode {
    /// True for codes that may appear in a wire response.
    pub fn is_wire_status(&self) -> bool {
        !matches!(self, StatusCode::DecodeError)
    }

    /// True when the frame was processed by an engine.
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::NoEngineForSource => "NO_ENGINE_FOR_SOURCE",
            StatusCode::NoTokens => "NO_TOKENS",
            StatusCode::ServerDroppedFrame => "SERVER_DROPPED_FRAME",
            StatusCode::EngineError => "ENGINE_ERROR",
            StatusCode::DecodeError => "DECODE_ERROR",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_is_local_only() {
        assert!(!StatusCode::DecodeError.is_wire_status());
        assert!(StatusCode::ServerDroppedFrame.is_wire_status());
    }
}
