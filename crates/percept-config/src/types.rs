// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `percept_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PerceptConfig {
    pub broker: BrokerConfig,
    pub engine: EngineConfig,
    pub client: ClientConfig,
}

/// Broker-side configuration: bindings, flow control and liveness.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Port for client connections, or the IPC socket path when `use_ipc`
    pub client_endpoint: String,
    /// ZeroMQ URI for engine worker connections (tcp:// or ipc://)
    pub engine_endpoint: String,
    /// Token balance every (client, source) pair starts with
    pub num_tokens_per_source: u32,
    /// Capacity of the auxiliary per-source input queue used when every
    /// connected worker must see every frame
    pub input_queue_maxsize: usize,
    /// Seconds of engine silence before the dispatcher probes or evicts
    pub engine_timeout_secs: u64,
    /// Seconds of client silence before a router-transport session is dropped
    pub client_timeout_secs: u64,
    /// Maximum accepted client message size in bytes
    pub message_max_size: usize,
    /// Use the ZeroMQ router binding for clients instead of WebSocket
    pub use_zeromq: bool,
    /// Bind the client endpoint on an IPC path (requires `use_zeromq`)
    pub use_ipc: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_endpoint: "9099".to_string(),
            engine_endpoint: "tcp://127.0.0.1:5555".to_string(),
            num_tokens_per_source: 2,
            input_queue_maxsize: 60,
            engine_timeout_secs: 5,
            client_timeout_secs: 10,
            message_max_size: 10 * 1024 * 1024,
            use_zeromq: true,
            use_ipc: false,
        }
    }
}

impl BrokerConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

/// Engine-runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Broker engine endpoint to connect out to
    pub server_address: String,
    /// Unique name this worker registers under
    pub engine_name: String,
    /// The named source this worker consumes
    pub source_name: String,
    /// Relay results for superseded frames instead of discarding them
    pub all_responses_required: bool,
    /// Milliseconds to wait for any broker message before the connection is
    /// considered failed
    pub poll_timeout_millis: u64,
    /// Reconnect attempts before the runner gives up
    pub request_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_address: "tcp://127.0.0.1:5555".to_string(),
            engine_name: "engine".to_string(),
            source_name: "camera".to_string(),
            all_responses_required: false,
            poll_timeout_millis: 10_000,
            request_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_millis)
    }
}

/// Client library configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker client endpoint (ws://host:port, tcp://host:port or ipc://path)
    pub server_endpoint: String,
    /// Seconds between heartbeats while a producer is waiting
    pub heartbeat_interval_secs: u64,
    /// Seconds of broker silence before the client reconnects
    pub silence_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_endpoint: "ws://127.0.0.1:9099".to_string(),
            heartbeat_interval_secs: 1,
            silence_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }
}
