// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Message envelopes for both channels of the broker.
//!
//! The client channel carries [`FromClient`]/[`ToClient`]; the engine channel
//! carries [`FromEngine`]/[`ToEngine`]. Heartbeats are distinguished variants
//! of the same unions so that every inbound message decodes through a single
//! tagged enum.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::status::StatusCode;

/// Kind of payload carried by a [`Frame`] or [`ResultPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    Image,
    Video,
    Audio,
    Imu,
    Text,
    Other(u16),
}

/// Opaque structured extras, carried as JSON text.
///
/// bincode is not self-describing, so extras travel as serialized JSON and
/// are parsed on demand by whoever understands them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extras(String);

impl Extras {
    pub fn from_value(value: &serde_json::Value) -> Self {
        Extras(value.to_string())
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.0)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One unit of sensor input. Immutable once sent; each hop copies or moves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub extras: Option<Extras>,
}

impl Frame {
    pub fn new(payload_type: PayloadType, payload: Vec<u8>) -> Self {
        Frame {
            payload_type,
            payload,
            extras: None,
        }
    }

    pub fn with_extras(mut self, extras: Extras) -> Self {
        self.extras = Some(extras);
        self
    }
}

/// Correlation metadata identifying one frame of one source.
///
/// `frame_id` is monotonic per (client, source) pair. Equality on this type
/// is how the dispatcher matches engine results to in-flight frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub source_name: String,
    pub frame_id: u64,
}

/// Welcome handshake sent by the broker to every newly connected client, and
/// re-broadcast whenever the set of consumed sources changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// Names of the sources currently consumed by at least one engine worker
    pub sources_consumed: Vec<String>,
    /// Initial token balance for every (client, source) pair
    pub num_tokens_per_source: u32,
}

/// One result payload produced by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
}

/// Terminal outcome of one frame: a status plus zero or more result payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultWrapper {
    pub status: StatusCode,
    pub results: Vec<ResultPayload>,
    pub extras: Option<Extras>,
}

impl ResultWrapper {
    /// A result carrying only a status code.
    pub fn from_status(status: StatusCode) -> Self {
        ResultWrapper {
            status,
            results: Vec::new(),
            extras: None,
        }
    }
}

/// Response delivered to a client for one submitted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub source_name: String,
    pub frame_id: u64,
    /// True when this response resolves the frame's token
    pub return_token: bool,
    pub result: ResultWrapper,
}

/// Messages a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromClient {
    /// First contact on message-oriented transports, so the broker learns the
    /// peer identity before any input arrives
    Hello,
    /// Liveness probe; the broker echoes [`ToClient::Heartbeat`]
    Heartbeat,
    Input {
        source_name: String,
        frame_id: u64,
        /// Restrict dispatch to these engine names; empty targets every
        /// worker consuming the source
        target_engines: Vec<String>,
        frame: Frame,
    },
}

/// Messages the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToClient {
    Welcome(Welcome),
    Heartbeat,
    Response(Response),
}

/// Welcome sent by an engine worker right after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineWelcome {
    /// The named source this worker consumes
    pub source_name: String,
    /// Unique worker name; a duplicate evicts the previous holder
    pub engine_name: String,
    /// When true, results for superseded frames are still relayed to the
    /// client (with no token attached)
    pub all_responses_required: bool,
}

/// Messages an engine worker sends to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromEngine {
    Welcome(EngineWelcome),
    /// Echo of a broker heartbeat probe
    Heartbeat,
    Result {
        metadata: FrameMetadata,
        result: ResultWrapper,
    },
}

/// Messages the broker sends to an engine worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToEngine {
    Heartbeat,
    Input {
        metadata: FrameMetadata,
        frame: Frame,
    },
}

impl ToClient {
    /// Build a response envelope, rejecting local-only status codes.
    pub fn response(
        source_name: impl Into<String>,
        frame_id: u64,
        return_token: bool,
        result: ResultWrapper,
    ) -> Result<Self> {
        if !result.status.is_wire_status() {
            return Err(ProtocolError::Encode(format!(
                "status {} is local-only and cannot be sent",
                result.status
            )));
        }
        Ok(ToClient::Response(Response {
            source_name: source_name.into(),
            frame_id,
            return_token,
            result,
        }))
    }
}
