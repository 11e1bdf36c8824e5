// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Broker with a single co-located engine.
//!
//! The engine runs behind an explicit process-boundary abstraction: a framed
//! byte-stream channel carrying the same engine-channel envelopes as the
//! router socket, with the blocking `handle` callback isolated on a worker
//! thread so it never stalls the broker loop. The framing (u32 length
//! prefix) is independent of any particular concurrency runtime or channel
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;
use percept_config::BrokerConfig;
use percept_engine::CognitiveEngine;
use percept_protocol::{decode, encode, EngineWelcome, FromEngine, ToEngine};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::{spawn_client_transport, Broker, EngineTransport};
use crate::dispatcher::{Dispatcher, WorkerAddr};
use crate::error::{BrokerError, Result};
use crate::session::SessionHub;

/// Upper bound on one framed message; anything larger is a protocol break.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// In-process stand-in for the pipe to an engine subprocess.
const DUPLEX_BUFFER: usize = 1 << 20;

const LOCAL_WORKER_ADDR: &[u8] = b"local-engine";

/// Length-prefixed framing over any byte stream.
pub struct FramedChannel<T> {
    inner: T,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> FramedChannel<T> {
    pub fn new(inner: T) -> Self {
        FramedChannel { inner }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 > MAX_FRAME_SIZE as u64 {
            return Err(BrokerError::FrameTooLarge(payload.len()));
        }
        self.inner.write_u32(payload.len() as u32).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let length = self.inner.read_u32().await?;
        if length > MAX_FRAME_SIZE {
            return Err(BrokerError::FrameTooLarge(length as usize));
        }
        let mut payload = vec![0u8; length as usize];
        self.inner.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

/// Engine channel backed by the framed stream of a co-located engine.
pub struct LocalEngineTransport {
    channel: FramedChannel<DuplexStream>,
}

impl LocalEngineTransport {
    pub fn new(channel: FramedChannel<DuplexStream>) -> Self {
        LocalEngineTransport { channel }
    }
}

#[async_trait]
impl EngineTransport for LocalEngineTransport {
    async fn recv(&mut self) -> Result<(WorkerAddr, FromEngine)> {
        loop {
            let payload = self.channel.read_frame().await?;
            match decode::<FromEngine>(&payload) {
                Ok(envelope) => return Ok((Bytes::from_static(LOCAL_WORKER_ADDR), envelope)),
                Err(error) => warn!(%error, "dropping undecodable engine frame"),
            }
        }
    }

    async fn send(&mut self, _addr: &WorkerAddr, message: &ToEngine) -> Result<()> {
        self.channel.write_frame(&encode(message)?).await
    }
}

/// The engine half of the framed channel: welcome, then serve frames and
/// heartbeats one at a time.
pub async fn run_engine_side<E: CognitiveEngine + 'static>(
    mut channel: FramedChannel<DuplexStream>,
    mut engine: E,
    welcome: EngineWelcome,
) -> Result<()> {
    let engine_name = welcome.engine_name.clone();
    channel
        .write_frame(&encode(&FromEngine::Welcome(welcome))?)
        .await?;
    info!(engine = %engine_name, "local engine started");

    loop {
        let payload = channel.read_frame().await?;
        let envelope: ToEngine = match decode(&payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(engine = %engine_name, %error, "dropping undecodable frame");
                continue;
            }
        };
        match envelope {
            ToEngine::Heartbeat => {
                debug!(engine = %engine_name, "echoing heartbeat");
                channel
                    .write_frame(&encode(&FromEngine::Heartbeat)?)
                    .await?;
            }
            ToEngine::Input { metadata, frame } => {
                debug!(
                    engine = %engine_name,
                    frame_id = metadata.frame_id,
                    "local engine received input"
                );
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let mut engine = engine;
                    let result = engine.handle(frame);
                    (engine, result)
                })
                .await
                .map_err(|error| BrokerError::EngineCallback(error.to_string()))?;
                engine = returned;
                channel
                    .write_frame(&encode(&FromEngine::Result { metadata, result })?)
                    .await?;
            }
        }
    }
}

/// Runs a broker plus one cognitive engine in a single process.
///
/// Clients connect over the configured transport exactly as they would to a
/// networked broker; only the engine channel is local.
pub struct LocalEngine {
    config: BrokerConfig,
    engine_name: String,
    source_name: String,
}

impl LocalEngine {
    pub fn new(
        config: BrokerConfig,
        engine_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        LocalEngine {
            config,
            engine_name: engine_name.into(),
            source_name: source_name.into(),
        }
    }

    pub async fn run<E: CognitiveEngine + 'static>(self, engine: E) -> Result<()> {
        let (broker_io, engine_io) = tokio::io::duplex(DUPLEX_BUFFER);

        let (events_tx, events_rx) = mpsc::channel(1024);
        spawn_client_transport(&self.config, events_tx).await?;

        let hub = SessionHub::new(self.config.num_tokens_per_source);
        let dispatcher = Dispatcher::new(
            self.config.input_queue_maxsize,
            self.config.engine_timeout(),
        );
        let broker = Broker::new(
            hub,
            dispatcher,
            LocalEngineTransport::new(FramedChannel::new(broker_io)),
            events_rx,
        );

        let welcome = EngineWelcome {
            source_name: self.source_name,
            engine_name: self.engine_name,
            all_responses_required: false,
        };
        let engine_side = run_engine_side(FramedChannel::new(engine_io), engine, welcome);

        tokio::select! {
            result = broker.run() => result,
            result = engine_side => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percept_protocol::{Frame, FrameMetadata, PayloadType, ResultWrapper, StatusCode};

    struct Upper;

    impl CognitiveEngine for Upper {
        fn handle(&mut self, frame: Frame) -> ResultWrapper {
            let text = String::from_utf8_lossy(&frame.payload).to_uppercase();
            let mut result = ResultWrapper::from_status(StatusCode::Success);
            result.results.push(percept_protocol::ResultPayload {
                payload_type: PayloadType::Text,
                payload: text.into_bytes(),
            });
            result
        }
    }

    #[tokio::test]
    async fn framed_channel_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = FramedChannel::new(a);
        let mut right = FramedChannel::new(b);

        left.write_frame(b"hello").await.unwrap();
        left.write_frame(b"").await.unwrap();
        assert_eq!(right.read_frame().await.unwrap(), b"hello");
        assert_eq!(right.read_frame().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn engine_side_serves_frames_over_the_channel() {
        let (broker_io, engine_io) = tokio::io::duplex(DUPLEX_BUFFER);
        let welcome = EngineWelcome {
            source_name: "camera".to_string(),
            engine_name: "upper".to_string(),
            all_responses_required: false,
        };
        tokio::spawn(run_engine_side(
            FramedChannel::new(engine_io),
            Upper,
            welcome,
        ));

        let mut transport = LocalEngineTransport::new(FramedChannel::new(broker_io));

        // Welcome arrives first.
        let (addr, message) = transport.recv().await.unwrap();
        assert_eq!(&addr[..], LOCAL_WORKER_ADDR);
        assert!(matches!(
            message,
            FromEngine::Welcome(EngineWelcome { ref engine_name, .. }) if engine_name == "upper"
        ));

        // Heartbeats are echoed.
        transport.send(&addr, &ToEngine::Heartbeat).await.unwrap();
        let (_, echo) = transport.recv().await.unwrap();
        assert!(matches!(echo, FromEngine::Heartbeat));

        // A frame comes back processed with its metadata intact.
        let metadata = FrameMetadata {
            source_name: "camera".to_string(),
            frame_id: 3,
        };
        transport
            .send(
                &addr,
                &ToEngine::Input {
                    metadata: metadata.clone(),
                    frame: Frame::new(PayloadType::Text, b"stop sign".to_vec()),
                },
            )
            .await
            .unwrap();
        let (_, reply) = transport.recv().await.unwrap();
        match reply {
            FromEngine::Result {
                metadata: echoed,
                result,
            } => {
                assert_eq!(echoed, metadata);
                assert_eq!(result.status, StatusCode::Success);
                assert_eq!(result.results[0].payload, b"STOP SIGN".to_vec());
            }
            other => panic!("expected result, got {:?}", other),
        }
    }
}
