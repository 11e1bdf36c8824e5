// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The processing callback contract.

use percept_protocol::{Frame, ResultWrapper, StatusCode};

/// A cognitive engine processes one frame at a time.
///
/// `handle` is synchronous and may block for the duration of one frame; the
/// runner enforces single-concurrency per worker, so a new frame is never
/// delivered while a previous call is still running. What happens inside
/// (OCR, object recognition, ...) is entirely up to the implementation.
pub trait CognitiveEngine: Send {
    /// Process a single input frame and produce its terminal result.
    fn handle(&mut self, frame: Frame) -> ResultWrapper;
}

/// Create a [`ResultWrapper`] carrying only a status, the common shape for
/// engines that report errors without payloads.
pub fn result_from_status(status: StatusCode) -> ResultWrapper {
    ResultWrapper::from_status(status)
}
