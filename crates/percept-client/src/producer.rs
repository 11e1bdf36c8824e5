// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! User-supplied producer and consumer callbacks.

use async_trait::async_trait;
use percept_protocol::{Frame, Response};

/// Produces frames for one named source.
///
/// Returning `None` means nothing is available right now; the scheduler
/// returns the token it acquired and asks again.
#[async_trait]
pub trait FrameProducer: Send {
    async fn produce(&mut self) -> Option<Frame>;
}

/// Consumes results delivered by the broker.
#[async_trait]
pub trait ResultConsumer: Send {
    async fn consume(&mut self, response: Response);
}

/// One source the client feeds: its name, the engines its frames target and
/// the producer callback. Frame ids are stamped by the scheduler and are
/// monotonic for the lifetime of the client, across reconnects.
pub struct ProducerWrapper {
    pub source_name: String,
    pub target_engines: Vec<String>,
    pub producer: Box<dyn FrameProducer>,
}

impl ProducerWrapper {
    pub fn new(source_name: impl Into<String>, producer: Box<dyn FrameProducer>) -> Self {
        ProducerWrapper {
            source_name: source_name.into(),
            target_engines: Vec::new(),
            producer,
        }
    }

    /// Restrict this source's frames to the named engines.
    pub fn with_target_engines(mut self, target_engines: Vec<String>) -> Self {
        self.target_engines = target_engines;
        self
    }
}
