// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The broker event loop.
//!
//! One task owns the session hub, the dispatcher and the engine transport,
//! multiplexing client events, engine messages and the periodic heartbeat
//! check with `select!`. All registries are mutated only from this loop, so
//! no locking is needed anywhere in the broker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use percept_config::BrokerConfig;
use percept_protocol::{decode, encode, Frame, FromClient, FromEngine, ToEngine};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::dispatcher::{DispatchEffect, Dispatcher, WorkerAddr};
use crate::error::{BrokerError, Result};
use crate::session::{ClientEvent, ClientId, SessionHub};
use crate::{ws, zmq};

/// How often the dispatcher sweeps workers for silence.
const HEARTBEAT_CHECK_PERIOD: Duration = Duration::from_millis(100);

const CLIENT_EVENT_QUEUE_DEPTH: usize = 1024;

/// Engine-channel I/O as seen by the broker loop: either the ZeroMQ router
/// socket or the framed in-process channel of a local engine.
#[async_trait]
pub trait EngineTransport: Send {
    /// Next decoded engine message with the identity of its sender.
    /// Undecodable messages are dropped internally.
    async fn recv(&mut self) -> Result<(WorkerAddr, FromEngine)>;

    /// Deliver a message to one worker.
    async fn send(&mut self, addr: &WorkerAddr, message: &ToEngine) -> Result<()>;
}

/// Router-socket engine channel: workers are dealer peers addressed by
/// identity frame.
pub struct ZmqEngineTransport {
    socket: RouterSocket,
}

impl ZmqEngineTransport {
    pub fn new(socket: RouterSocket) -> Self {
        ZmqEngineTransport { socket }
    }

    /// Bind a fresh router socket on the given endpoint.
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let mut socket = RouterSocket::new();
        socket.bind(endpoint).await?;
        info!(endpoint, "waiting for engines to connect");
        Ok(ZmqEngineTransport { socket })
    }
}

#[async_trait]
impl EngineTransport for ZmqEngineTransport {
    async fn recv(&mut self) -> Result<(WorkerAddr, FromEngine)> {
        loop {
            let message = self.socket.recv().await?;
            let mut frames = message.into_vec();
            if frames.is_empty() {
                continue;
            }
            let identity = frames.remove(0);
            if frames.first().map(|frame| frame.is_empty()).unwrap_or(false) {
                frames.remove(0);
            }
            let Some(payload) = frames.first() else {
                continue;
            };
            match decode::<FromEngine>(payload) {
                Ok(envelope) => return Ok((identity, envelope)),
                Err(error) => {
                    warn!(%error, "dropping undecodable engine message");
                }
            }
        }
    }

    async fn send(&mut self, addr: &WorkerAddr, message: &ToEngine) -> Result<()> {
        let mut zmq_message = ZmqMessage::from(encode(message)?);
        zmq_message.prepend(&ZmqMessage::from(addr.to_vec()));
        self.socket.send(zmq_message).await?;
        Ok(())
    }
}

/// The broker proper: session hub + dispatcher + engine channel.
pub struct Broker<E: EngineTransport> {
    hub: SessionHub,
    dispatcher: Dispatcher,
    engine: E,
    client_events: mpsc::Receiver<ClientEvent>,
}

impl<E: EngineTransport> Broker<E> {
    pub fn new(
        hub: SessionHub,
        dispatcher: Dispatcher,
        engine: E,
        client_events: mpsc::Receiver<ClientEvent>,
    ) -> Self {
        Broker {
            hub,
            dispatcher,
            engine,
            client_events,
        }
    }

    /// Run the event loop until every client transport is gone or the engine
    /// channel fails.
    pub async fn run(mut self) -> Result<()> {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_CHECK_PERIOD);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.client_events.recv() => {
                    match event {
                        Some(event) => self.on_client_event(event).await,
                        None => {
                            info!("client event channel closed, shutting down");
                            return Err(BrokerError::ChannelClosed);
                        }
                    }
                }
                incoming = self.engine.recv() => {
                    let (addr, message) = incoming?;
                    let effects = self
                        .dispatcher
                        .on_engine_message(addr, message, Instant::now());
                    self.apply(effects).await;
                }
                _ = heartbeat.tick() => {
                    let effects = self.dispatcher.on_heartbeat_tick(Instant::now());
                    self.apply(effects).await;
                }
            }
        }
    }

    async fn on_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected { id, sender } => {
                self.hub.on_connect(id, sender).await;
            }
            ClientEvent::Disconnected { id } => {
                self.hub.on_disconnect(&id);
            }
            ClientEvent::Message { id, message } => match message {
                // First contact is handled by the transport; nothing to do
                FromClient::Hello => {}
                FromClient::Heartbeat => {
                    self.hub.send_heartbeat_echo(&id).await;
                }
                FromClient::Input {
                    source_name,
                    frame_id,
                    target_engines,
                    frame,
                } => {
                    self.on_client_input(id, source_name, frame_id, target_engines, frame)
                        .await;
                }
            },
        }
    }

    async fn on_client_input(
        &mut self,
        id: ClientId,
        source_name: String,
        frame_id: u64,
        target_engines: Vec<String>,
        frame: Frame,
    ) {
        use crate::session::Admission;

        match self.hub.try_take_token(&id, &source_name) {
            Admission::UnknownClient => {
                warn!(client = %id, "input from unregistered client");
            }
            Admission::NoEngineForSource => {
                self.hub
                    .send_reject(
                        &id,
                        &source_name,
                        frame_id,
                        percept_protocol::StatusCode::NoEngineForSource,
                    )
                    .await;
            }
            Admission::NoTokens => {
                warn!(client = %id, source = %source_name, "client sent frame without tokens");
                self.hub
                    .send_reject(
                        &id,
                        &source_name,
                        frame_id,
                        percept_protocol::StatusCode::NoTokens,
                    )
                    .await;
            }
            Admission::Accepted => {
                let (accepted, effects) = self.dispatcher.submit(
                    &source_name,
                    frame_id,
                    target_engines,
                    frame,
                    id.clone(),
                );
                self.apply(effects).await;
                if !accepted {
                    // Dispatcher backpressure: undo the decrement and tell
                    // the client its token is back.
                    self.hub.return_token(&id, &source_name);
                    self.hub
                        .send_reject(
                            &id,
                            &source_name,
                            frame_id,
                            percept_protocol::StatusCode::ServerDroppedFrame,
                        )
                        .await;
                }
            }
        }
    }

    async fn apply(&mut self, effects: Vec<DispatchEffect>) {
        for effect in effects {
            match effect {
                DispatchEffect::SendToEngine { addr, message } => {
                    if let Err(error) = self.engine.send(&addr, &message).await {
                        warn!(%error, "send to engine failed");
                    }
                }
                DispatchEffect::SendResult {
                    client,
                    source_name,
                    frame_id,
                    result,
                    return_token,
                } => {
                    self.hub
                        .send_result(&client, &source_name, frame_id, result, return_token)
                        .await;
                }
                DispatchEffect::SourceAdded { name } => {
                    self.hub.add_source_consumed(&name).await;
                }
                DispatchEffect::SourceRemoved { name } => {
                    self.hub.remove_source_consumed(&name).await;
                }
            }
        }
    }
}

/// Assembles and runs a broker from configuration: binds the engine router
/// socket, starts the configured client transport and drives the loop.
pub struct BrokerRunner {
    config: BrokerConfig,
}

impl BrokerRunner {
    pub fn new(config: BrokerConfig) -> Self {
        BrokerRunner { config }
    }

    pub async fn run(self) -> Result<()> {
        let engine = ZmqEngineTransport::bind(&self.config.engine_endpoint).await?;

        let (events_tx, events_rx) = mpsc::channel(CLIENT_EVENT_QUEUE_DEPTH);
        spawn_client_transport(&self.config, events_tx).await?;

        let hub = SessionHub::new(self.config.num_tokens_per_source);
        let dispatcher = Dispatcher::new(
            self.config.input_queue_maxsize,
            self.config.engine_timeout(),
        );
        Broker::new(hub, dispatcher, engine, events_rx).run().await
    }
}

/// Bind and spawn the configured client transport, feeding `events_tx`.
pub(crate) async fn spawn_client_transport(
    config: &BrokerConfig,
    events_tx: mpsc::Sender<ClientEvent>,
) -> Result<()> {
    if config.use_zeromq {
        let endpoint = if config.use_ipc {
            format!("ipc://{}", config.client_endpoint)
        } else {
            format!("tcp://0.0.0.0:{}", client_port(&config.client_endpoint)?)
        };
        let mut socket = RouterSocket::new();
        socket.bind(&endpoint).await?;
        info!(%endpoint, "listening for clients");
        tokio::spawn(zmq::serve(
            socket,
            events_tx,
            config.client_timeout(),
            config.message_max_size,
        ));
    } else {
        let port = client_port(&config.client_endpoint)?;
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening for clients");
        tokio::spawn(ws::serve(listener, events_tx, config.message_max_size));
    }
    Ok(())
}

fn client_port(endpoint: &str) -> Result<u16> {
    endpoint
        .parse()
        .map_err(|_| BrokerError::InvalidEndpoint(format!("expected a port number: {endpoint}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSender;
    use bytes::Bytes;
    use percept_protocol::{
        EngineWelcome, FrameMetadata, PayloadType, ResultWrapper, StatusCode, ToClient, Welcome,
    };

    /// Records sends instead of touching a socket.
    struct RecordingTransport {
        sent: Vec<(WorkerAddr, ToEngine)>,
        inbox: mpsc::Receiver<(WorkerAddr, FromEngine)>,
    }

    #[async_trait]
    impl EngineTransport for RecordingTransport {
        async fn recv(&mut self) -> Result<(WorkerAddr, FromEngine)> {
            match self.inbox.recv().await {
                Some(message) => Ok(message),
                None => Err(BrokerError::ChannelClosed),
            }
        }

        async fn send(&mut self, addr: &WorkerAddr, message: &ToEngine) -> Result<()> {
            self.sent.push((addr.clone(), message.clone()));
            Ok(())
        }
    }

    struct Harness {
        broker: Broker<RecordingTransport>,
        // Keeps the mock engine inbox open for the broker's lifetime
        _engine_tx: mpsc::Sender<(WorkerAddr, FromEngine)>,
        client_rx: mpsc::Receiver<Vec<u8>>,
        client_id: ClientId,
    }

    /// Broker with one engine worker on "camera" and one connected client.
    async fn harness(num_tokens: u32) -> Harness {
        let (engine_tx, inbox) = mpsc::channel(16);
        let transport = RecordingTransport {
            sent: Vec::new(),
            inbox,
        };
        let (_events_tx, events_rx) = mpsc::channel(16);
        let hub = SessionHub::new(num_tokens);
        let dispatcher = Dispatcher::new(4, Duration::from_secs(5));
        let mut broker = Broker::new(hub, dispatcher, transport, events_rx);

        // Engine registers first so the source exists at client connect time.
        let welcome = FromEngine::Welcome(EngineWelcome {
            source_name: "camera".to_string(),
            engine_name: "ocr".to_string(),
            all_responses_required: false,
        });
        let effects = broker.dispatcher.on_engine_message(
            Bytes::from_static(b"w1"),
            welcome,
            Instant::now(),
        );
        broker.apply(effects).await;

        let (out_tx, client_rx) = mpsc::channel(16);
        let client_id = ClientId::from_bytes(Bytes::from_static(b"c1"));
        broker
            .on_client_event(ClientEvent::Connected {
                id: client_id.clone(),
                sender: ClientSender::Stream(out_tx),
            })
            .await;

        Harness {
            broker,
            _engine_tx: engine_tx,
            client_rx,
            client_id,
        }
    }

    async fn next_to_client(rx: &mut mpsc::Receiver<Vec<u8>>) -> ToClient {
        let payload = rx.recv().await.expect("expected a client envelope");
        decode(&payload).expect("client envelope should decode")
    }

    fn input(frame_id: u64) -> FromClient {
        FromClient::Input {
            source_name: "camera".to_string(),
            frame_id,
            target_engines: Vec::new(),
            frame: Frame::new(PayloadType::Image, vec![7]),
        }
    }

    #[tokio::test]
    async fn frame_flows_to_engine_and_result_returns_token() {
        let mut h = harness(2).await;

        match next_to_client(&mut h.client_rx).await {
            ToClient::Welcome(Welcome {
                sources_consumed, ..
            }) => assert_eq!(sources_consumed, vec!["camera".to_string()]),
            other => panic!("expected welcome, got {:?}", other),
        }

        h.broker
            .on_client_event(ClientEvent::Message {
                id: h.client_id.clone(),
                message: input(1),
            })
            .await;

        // The frame reached the worker.
        assert!(matches!(
            h.broker.engine.sent.last(),
            Some((_, ToEngine::Input { metadata, .. })) if metadata.frame_id == 1
        ));
        assert_eq!(h.broker.hub.balance(&h.client_id, "camera"), Some(1));

        // Engine answers; client gets the result and the token back.
        let effects = h.broker.dispatcher.on_engine_message(
            Bytes::from_static(b"w1"),
            FromEngine::Result {
                metadata: FrameMetadata {
                    source_name: "camera".to_string(),
                    frame_id: 1,
                },
                result: ResultWrapper::from_status(StatusCode::Success),
            },
            Instant::now(),
        );
        h.broker.apply(effects).await;

        match next_to_client(&mut h.client_rx).await {
            ToClient::Response(response) => {
                assert_eq!(response.frame_id, 1);
                assert!(response.return_token);
                assert_eq!(response.result.status, StatusCode::Success);
            }
            other => panic!("expected response, got {:?}", other),
        }
        assert_eq!(h.broker.hub.balance(&h.client_id, "camera"), Some(2));
    }

    #[tokio::test]
    async fn no_tokens_is_rejected_synchronously() {
        let mut h = harness(1).await;
        let _welcome = next_to_client(&mut h.client_rx).await;

        h.broker
            .on_client_event(ClientEvent::Message {
                id: h.client_id.clone(),
                message: input(1),
            })
            .await;
        // Second frame: balance is zero, never reaches the worker.
        h.broker
            .on_client_event(ClientEvent::Message {
                id: h.client_id.clone(),
                message: input(2),
            })
            .await;

        let dispatched: Vec<u64> = h
            .broker
            .engine
            .sent
            .iter()
            .filter_map(|(_, m)| match m {
                ToEngine::Input { metadata, .. } => Some(metadata.frame_id),
                _ => None,
            })
            .collect();
        assert_eq!(dispatched, vec![1]);

        match next_to_client(&mut h.client_rx).await {
            ToClient::Response(response) => {
                assert_eq!(response.frame_id, 2);
                assert_eq!(response.result.status, StatusCode::NoTokens);
                assert!(response.return_token);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_source_is_rejected_synchronously() {
        let mut h = harness(1).await;
        let _welcome = next_to_client(&mut h.client_rx).await;

        h.broker
            .on_client_event(ClientEvent::Message {
                id: h.client_id.clone(),
                message: FromClient::Input {
                    source_name: "radar".to_string(),
                    frame_id: 1,
                    target_engines: Vec::new(),
                    frame: Frame::new(PayloadType::Image, vec![7]),
                },
            })
            .await;

        assert!(h.broker.engine.sent.is_empty());
        match next_to_client(&mut h.client_rx).await {
            ToClient::Response(response) => {
                assert_eq!(response.result.status, StatusCode::NoEngineForSource);
                assert!(response.return_token);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn heartbeat_is_echoed() {
        let mut h = harness(1).await;
        let _welcome = next_to_client(&mut h.client_rx).await;

        h.broker
            .on_client_event(ClientEvent::Message {
                id: h.client_id.clone(),
                message: FromClient::Heartbeat,
            })
            .await;

        assert!(matches!(
            next_to_client(&mut h.client_rx).await,
            ToClient::Heartbeat
        ));
    }
}
