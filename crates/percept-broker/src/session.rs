// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client session manager.
//!
//! Tracks every connected producer, its per-source token balances and its
//! outbound transport handle. Both transport bindings (WebSocket stream and
//! ZeroMQ router) feed decoded [`ClientEvent`]s into the broker loop and
//! deliver outbound envelopes through a [`ClientSender`]; the hub itself is
//! transport-agnostic.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use percept_protocol::{
    encode, ResultWrapper, StatusCode, ToClient, Welcome,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ledger::{TakeOutcome, TokenLedger};

/// Transport-level identity of one connected client.
///
/// The ZeroMQ binding uses the router peer identity verbatim; the WebSocket
/// binding uses the rendered socket address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(Bytes);

impl ClientId {
    pub fn from_bytes(bytes: Bytes) -> Self {
        ClientId(bytes)
    }

    pub fn from_addr(addr: std::net::SocketAddr) -> Self {
        ClientId(Bytes::from(addr.to_string().into_bytes()))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => f.write_str(text),
            Err(_) => write!(f, "{:02x?}", &self.0[..]),
        }
    }
}

/// Outbound handle for one client, erased over the two transport bindings.
#[derive(Debug, Clone)]
pub enum ClientSender {
    /// Persistent duplex stream: a per-connection writer task drains this
    Stream(mpsc::Sender<Vec<u8>>),
    /// Router socket: payloads are queued to the socket task with the peer
    /// identity attached
    Router {
        identity: Bytes,
        tx: mpsc::Sender<(Bytes, Vec<u8>)>,
    },
}

impl ClientSender {
    /// Deliver a serialized envelope. Returns false when the transport side
    /// is gone; the caller tears the session down on its own schedule.
    pub async fn send(&self, payload: Vec<u8>) -> bool {
        match self {
            ClientSender::Stream(tx) => tx.send(payload).await.is_ok(),
            ClientSender::Router { identity, tx } => {
                tx.send((identity.clone(), payload)).await.is_ok()
            }
        }
    }
}

/// Decoded activity from a client transport, consumed by the broker loop.
#[derive(Debug)]
pub enum ClientEvent {
    Connected {
        id: ClientId,
        sender: ClientSender,
    },
    Message {
        id: ClientId,
        message: percept_protocol::FromClient,
    },
    Disconnected {
        id: ClientId,
    },
}

/// One connected producer.
struct ClientSession {
    sender: ClientSender,
    ledger: TokenLedger,
    #[allow(dead_code)]
    connected_at: Instant,
}

/// Admission decision for one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    NoEngineForSource,
    NoTokens,
    UnknownClient,
}

/// Registry of live client sessions plus the advertised source set.
pub struct SessionHub {
    clients: HashMap<ClientId, ClientSession>,
    sources_consumed: Vec<String>,
    num_tokens_per_source: u32,
}

impl SessionHub {
    pub fn new(num_tokens_per_source: u32) -> Self {
        SessionHub {
            clients: HashMap::new(),
            sources_consumed: Vec::new(),
            num_tokens_per_source,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn sources_consumed(&self) -> &[String] {
        &self.sources_consumed
    }

    fn welcome(&self) -> Welcome {
        Welcome {
            sources_consumed: self.sources_consumed.clone(),
            num_tokens_per_source: self.num_tokens_per_source,
        }
    }

    /// Register a new connection and send its welcome handshake.
    pub async fn on_connect(&mut self, id: ClientId, sender: ClientSender) {
        info!(client = %id, "new client connected");

        let mut ledger = TokenLedger::new();
        for source in &self.sources_consumed {
            ledger.seed(source, self.num_tokens_per_source);
        }
        let session = ClientSession {
            sender: sender.clone(),
            ledger,
            connected_at: Instant::now(),
        };
        self.clients.insert(id.clone(), session);

        self.send_to(&id, &ToClient::Welcome(self.welcome())).await;
    }

    /// Tear down a session whose transport closed or timed out.
    pub fn on_disconnect(&mut self, id: &ClientId) {
        if self.clients.remove(id).is_some() {
            info!(client = %id, "client disconnected");
        }
    }

    /// Admission check for one frame: source consumed and balance available.
    /// Decrements the balance on acceptance.
    pub fn try_take_token(&mut self, id: &ClientId, source_name: &str) -> Admission {
        let Some(session) = self.clients.get_mut(id) else {
            return Admission::UnknownClient;
        };
        match session.ledger.try_take(source_name) {
            TakeOutcome::Taken => Admission::Accepted,
            TakeOutcome::NoSource => Admission::NoEngineForSource,
            TakeOutcome::Empty => Admission::NoTokens,
        }
    }

    /// Undo a decrement after dispatcher backpressure.
    pub fn return_token(&mut self, id: &ClientId, source_name: &str) {
        if let Some(session) = self.clients.get_mut(id) {
            session.ledger.put(source_name);
        }
    }

    /// Deliver a result to a client, returning its token when asked.
    pub async fn send_result(
        &mut self,
        id: &ClientId,
        source_name: &str,
        frame_id: u64,
        result: ResultWrapper,
        return_token: bool,
    ) {
        let Some(session) = self.clients.get_mut(id) else {
            warn!(client = %id, "send request to unknown client");
            return;
        };
        if return_token && !session.ledger.put(source_name) {
            // Source deregistered mid-flight; the balance entry is gone and
            // the client will resync from the next welcome.
            debug!(client = %id, source = source_name, "token returned for removed source");
        }

        let envelope = match ToClient::response(source_name, frame_id, return_token, result) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(client = %id, %error, "refusing to send malformed response");
                return;
            }
        };
        self.send_to(id, &envelope).await;
    }

    /// Synchronous admission rejection. The token was never taken, so the
    /// ledger is untouched; `return_token` tells the client to restore its
    /// local balance.
    pub async fn send_reject(
        &mut self,
        id: &ClientId,
        source_name: &str,
        frame_id: u64,
        status: StatusCode,
    ) {
        debug!(client = %id, source = source_name, frame_id, %status, "rejecting frame");
        let result = ResultWrapper::from_status(status);
        let envelope = match ToClient::response(source_name, frame_id, true, result) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(client = %id, %error, "refusing to send malformed rejection");
                return;
            }
        };
        self.send_to(id, &envelope).await;
    }

    /// Echo a client heartbeat.
    pub async fn send_heartbeat_echo(&mut self, id: &ClientId) {
        self.send_to(id, &ToClient::Heartbeat).await;
    }

    /// A source gained its first worker: seed every live session's balance
    /// and re-broadcast the welcome so clients learn the new source set.
    pub async fn add_source_consumed(&mut self, source_name: &str) {
        if self.sources_consumed.iter().any(|s| s == source_name) {
            return;
        }
        info!(source = source_name, "source now consumed");
        self.sources_consumed.push(source_name.to_string());
        let tokens = self.num_tokens_per_source;
        for session in self.clients.values_mut() {
            session.ledger.seed(source_name, tokens);
        }
        self.broadcast_welcome().await;
    }

    /// A source lost its last worker: drop every session's balance entry.
    /// Future frames for it are rejected with `NoEngineForSource`.
    pub async fn remove_source_consumed(&mut self, source_name: &str) {
        let before = self.sources_consumed.len();
        self.sources_consumed.retain(|s| s != source_name);
        if self.sources_consumed.len() == before {
            return;
        }
        info!(source = source_name, "source no longer consumed");
        for session in self.clients.values_mut() {
            session.ledger.remove(source_name);
        }
        self.broadcast_welcome().await;
    }

    async fn broadcast_welcome(&mut self) {
        let envelope = ToClient::Welcome(self.welcome());
        let payload = match encode(&envelope) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode welcome broadcast");
                return;
            }
        };
        for (id, session) in &self.clients {
            if !session.sender.send(payload.clone()).await {
                debug!(client = %id, "welcome broadcast to closed transport");
            }
        }
    }

    async fn send_to(&self, id: &ClientId, envelope: &ToClient) {
        let Some(session) = self.clients.get(id) else {
            return;
        };
        match encode(envelope) {
            Ok(payload) => {
                if !session.sender.send(payload).await {
                    debug!(client = %id, "send to closed transport");
                }
            }
            Err(error) => warn!(client = %id, %error, "failed to encode envelope"),
        }
    }

    #[cfg(test)]
    pub fn balance(&self, id: &ClientId, source_name: &str) -> Option<u32> {
        self.clients.get(id)?.ledger.balance(source_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percept_protocol::{decode, FromClient};

    fn test_client(capacity: usize) -> (ClientId, ClientSender, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ClientId::from_bytes(Bytes::from_static(b"client-a"));
        (id, ClientSender::Stream(tx), rx)
    }

    async fn recv_envelope(rx: &mut mpsc::Receiver<Vec<u8>>) -> ToClient {
        let payload = rx.recv().await.expect("expected an envelope");
        decode(&payload).expect("envelope should decode")
    }

    #[tokio::test]
    async fn welcome_advertises_consumed_sources() {
        let mut hub = SessionHub::new(2);
        hub.add_source_consumed("camera").await;

        let (id, sender, mut rx) = test_client(8);
        hub.on_connect(id.clone(), sender).await;

        match recv_envelope(&mut rx).await {
            ToClient::Welcome(welcome) => {
                assert_eq!(welcome.sources_consumed, vec!["camera".to_string()]);
                assert_eq!(welcome.num_tokens_per_source, 2);
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        assert_eq!(hub.balance(&id, "camera"), Some(2));
    }

    #[tokio::test]
    async fn admission_rejects_unknown_source_then_empty_balance() {
        let mut hub = SessionHub::new(1);
        hub.add_source_consumed("camera").await;
        let (id, sender, _rx) = test_client(8);
        hub.on_connect(id.clone(), sender).await;

        assert_eq!(hub.try_take_token(&id, "audio"), Admission::NoEngineForSource);
        assert_eq!(hub.try_take_token(&id, "camera"), Admission::Accepted);
        assert_eq!(hub.try_take_token(&id, "camera"), Admission::NoTokens);
    }

    #[tokio::test]
    async fn result_with_token_restores_balance() {
        let mut hub = SessionHub::new(1);
        hub.add_source_consumed("camera").await;
        let (id, sender, mut rx) = test_client(8);
        hub.on_connect(id.clone(), sender).await;
        let _welcome = recv_envelope(&mut rx).await;

        assert_eq!(hub.try_take_token(&id, "camera"), Admission::Accepted);
        assert_eq!(hub.balance(&id, "camera"), Some(0));

        hub.send_result(
            &id,
            "camera",
            1,
            ResultWrapper::from_status(StatusCode::Success),
            true,
        )
        .await;
        assert_eq!(hub.balance(&id, "camera"), Some(1));

        match recv_envelope(&mut rx).await {
            ToClient::Response(response) => {
                assert_eq!(response.frame_id, 1);
                assert!(response.return_token);
                assert_eq!(response.result.status, StatusCode::Success);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn source_removal_drops_balances_and_rebroadcasts() {
        let mut hub = SessionHub::new(2);
        hub.add_source_consumed("camera").await;
        let (id, sender, mut rx) = test_client(8);
        hub.on_connect(id.clone(), sender).await;
        let _welcome = recv_envelope(&mut rx).await;

        hub.remove_source_consumed("camera").await;
        assert_eq!(hub.balance(&id, "camera"), None);
        assert_eq!(hub.try_take_token(&id, "camera"), Admission::NoEngineForSource);

        match recv_envelope(&mut rx).await {
            ToClient::Welcome(welcome) => assert!(welcome.sources_consumed.is_empty()),
            other => panic!("expected welcome broadcast, got {:?}", other),
        }
    }

    #[test]
    fn hello_envelope_shape_is_stable() {
        // The router binding counts any decodable message as first contact.
        let bytes = encode(&FromClient::Hello).unwrap();
        let decoded: FromClient = decode(&bytes).unwrap();
        assert_eq!(decoded, FromClient::Hello);
    }
}
