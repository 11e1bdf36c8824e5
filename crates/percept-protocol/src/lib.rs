// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # percept-protocol
//!
//! Schema-defined binary envelopes exchanged between clients, the broker and
//! cognitive engine workers. Every message on either channel is one of the
//! tagged unions below, encoded with bincode; deserialization ends in an
//! exhaustive `match` at the receiving end.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod envelope;
pub mod error;
pub mod status;
pub mod wire;

pub use envelope::{
    EngineWelcome, Extras, Frame, FrameMetadata, FromClient, FromEngine, PayloadType, Response,
    ResultPayload, ResultWrapper, ToClient, ToEngine, Welcome,
};
pub use error::{ProtocolError, Result};
pub use status::StatusCode;
pub use wire::{decode, encode};
