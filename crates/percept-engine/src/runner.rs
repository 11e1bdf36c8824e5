// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Engine runner.
//!
//! Connects out to the broker's engine endpoint, registers the source this
//! worker serves and then processes one frame at a time. A silent connection
//! (no message within the poll timeout) is abandoned and re-established with
//! a fresh welcome until the retry budget runs out; this is the counterpart
//! of the dispatcher-side heartbeat timeout.

use std::time::Duration;

use percept_config::EngineConfig;
use percept_protocol::{decode, encode, EngineWelcome, FromEngine, ToEngine};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::engine::CognitiveEngine;
use crate::error::{EngineError, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Drives one [`CognitiveEngine`] against a broker.
pub struct EngineRunner<E> {
    engine: E,
    config: EngineConfig,
}

impl<E: CognitiveEngine + 'static> EngineRunner<E> {
    pub fn new(engine: E, config: EngineConfig) -> Self {
        EngineRunner { engine, config }
    }

    /// Connect to the broker and serve frames until the retry budget is
    /// exhausted. Returns `EngineError::RetriesExhausted` when it gives up.
    pub async fn run(self) -> Result<()> {
        let EngineRunner { mut engine, config } = self;

        let welcome = FromEngine::Welcome(EngineWelcome {
            source_name: config.source_name.clone(),
            engine_name: config.engine_name.clone(),
            all_responses_required: config.all_responses_required,
        });
        let welcome_bytes = encode(&welcome)?;

        let mut retries = config.request_retries;
        while retries > 0 {
            let mut socket = DealerSocket::new();
            if let Err(error) = socket.connect(&config.server_address).await {
                warn!(engine = %config.engine_name, %error, "failed to connect to broker");
                retries -= 1;
                sleep(RECONNECT_DELAY).await;
                continue;
            }
            if let Err(error) = socket.send(ZmqMessage::from(welcome_bytes.clone())).await {
                warn!(engine = %config.engine_name, %error, "failed to send welcome message");
                retries -= 1;
                sleep(RECONNECT_DELAY).await;
                continue;
            }
            info!(
                engine = %config.engine_name,
                server = %config.server_address,
                "sent welcome message to server"
            );

            'connection: loop {
                let message = match timeout(config.poll_timeout(), socket.recv()).await {
                    Err(_) => {
                        warn!(engine = %config.engine_name, "no message from server within poll timeout");
                        retries -= 1;
                        break 'connection;
                    }
                    Ok(Err(error)) => {
                        warn!(engine = %config.engine_name, %error, "receive from server failed");
                        retries -= 1;
                        break 'connection;
                    }
                    Ok(Ok(message)) => message,
                };

                let frames = message.into_vec();
                let Some(payload) = frames.iter().rev().find(|frame| !frame.is_empty()) else {
                    continue;
                };
                let envelope: ToEngine = match decode(payload) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(engine = %config.engine_name, %error, "dropping undecodable message");
                        continue;
                    }
                };

                match envelope {
                    ToEngine::Heartbeat => {
                        debug!(engine = %config.engine_name, "received heartbeat from server");
                        let reply = ZmqMessage::from(encode(&FromEngine::Heartbeat)?);
                        if let Err(error) = socket.send(reply).await {
                            warn!(engine = %config.engine_name, %error, "heartbeat reply failed");
                            retries -= 1;
                            break 'connection;
                        }
                    }
                    ToEngine::Input { metadata, frame } => {
                        debug!(
                            engine = %config.engine_name,
                            source = %metadata.source_name,
                            frame_id = metadata.frame_id,
                            "received input from server"
                        );
                        // The callback blocks for the duration of one frame;
                        // run it off the async worker thread.
                        let (returned, result) = tokio::task::spawn_blocking(move || {
                            let mut engine = engine;
                            let result = engine.handle(frame);
                            (engine, result)
                        })
                        .await
                        .map_err(|error| EngineError::Callback(error.to_string()))?;
                        engine = returned;

                        let reply = FromEngine::Result { metadata, result };
                        if let Err(error) = socket.send(ZmqMessage::from(encode(&reply)?)).await {
                            warn!(engine = %config.engine_name, %error, "sending result failed");
                            retries -= 1;
                            break 'connection;
                        }
                        debug!(engine = %config.engine_name, "sent result to server");
                    }
                }
            }
        }

        warn!(
            engine = %config.engine_name,
            "ran out of retries, abandoning server connection"
        );
        Err(EngineError::RetriesExhausted {
            engine_name: config.engine_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percept_protocol::{Frame, ResultWrapper, StatusCode};

    struct Noop;

    impl CognitiveEngine for Noop {
        fn handle(&mut self, _frame: Frame) -> ResultWrapper {
            ResultWrapper::from_status(StatusCode::Success)
        }
    }

    #[tokio::test]
    async fn zero_retry_budget_fails_fast() {
        let config = EngineConfig {
            request_retries: 0,
            ..EngineConfig::default()
        };
        let error = EngineRunner::new(Noop, config).run().await.unwrap_err();
        assert!(matches!(error, EngineError::RetriesExhausted { .. }));
    }
}
