// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! ZeroMQ ROUTER client transport binding.
//!
//! The broker is the only stable endpoint; clients are addressed by their
//! router peer identity. Every client gets its own bounded inbound queue and
//! consumer task so that slow per-client processing cannot stall the shared
//! receive loop. Liveness is pull-based: a client silent for the configured
//! timeout (no message of any kind, heartbeats included) is deregistered,
//! the inverse of the push-based probing used on the engine side.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use percept_protocol::{decode, FromClient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeromq::{RouterSocket, SocketRecv, SocketSend, ZmqMessage};

use crate::session::{ClientEvent, ClientId, ClientSender};

const INBOUND_QUEUE_DEPTH: usize = 64;
const OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// Serve clients on a bound router socket, feeding decoded events to the
/// broker loop.
pub async fn serve(
    mut socket: RouterSocket,
    events: mpsc::Sender<ClientEvent>,
    client_timeout: Duration,
    message_max_size: usize,
) {
    let (out_tx, mut out_rx) = mpsc::channel::<(Bytes, Vec<u8>)>(OUTBOUND_QUEUE_DEPTH);
    let (expired_tx, mut expired_rx) = mpsc::channel::<ClientId>(INBOUND_QUEUE_DEPTH);
    let mut queues: HashMap<ClientId, mpsc::Sender<FromClient>> = HashMap::new();

    loop {
        tokio::select! {
            Some((identity, payload)) = out_rx.recv() => {
                let mut message = ZmqMessage::from(payload);
                message.prepend(&ZmqMessage::from(identity.to_vec()));
                if let Err(error) = socket.send(message).await {
                    warn!(%error, "send to client failed");
                }
            }
            Some(id) = expired_rx.recv() => {
                info!(client = %id, "client disconnected");
                queues.remove(&id);
                if events.send(ClientEvent::Disconnected { id }).await.is_err() {
                    return;
                }
            }
            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(error) => {
                        warn!(%error, "error receiving on router socket");
                        continue;
                    }
                };
                if !route_message(
                    message,
                    &mut queues,
                    &events,
                    &out_tx,
                    &expired_tx,
                    client_timeout,
                    message_max_size,
                )
                .await
                {
                    return;
                }
            }
        }
    }
}

/// Register-if-new and enqueue one inbound router message.
///
/// Returns false when the broker loop is gone and the transport should stop.
async fn route_message(
    message: ZmqMessage,
    queues: &mut HashMap<ClientId, mpsc::Sender<FromClient>>,
    events: &mpsc::Sender<ClientEvent>,
    out_tx: &mpsc::Sender<(Bytes, Vec<u8>)>,
    expired_tx: &mpsc::Sender<ClientId>,
    client_timeout: Duration,
    message_max_size: usize,
) -> bool {
    let mut frames = message.into_vec();
    if frames.is_empty() {
        return true;
    }
    let identity = frames.remove(0);
    if frames.first().map(|frame| frame.is_empty()).unwrap_or(false) {
        frames.remove(0);
    }
    let Some(payload) = frames.first() else {
        return true;
    };
    if payload.len() > message_max_size {
        warn!(size = payload.len(), "oversized message dropped");
        return true;
    }

    let id = ClientId::from_bytes(identity.clone());

    if !queues.contains_key(&id) {
        info!(client = %id, "new client connected");
        let (queue_tx, queue_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        queues.insert(id.clone(), queue_tx);
        tokio::spawn(consume_client(
            id.clone(),
            queue_rx,
            events.clone(),
            expired_tx.clone(),
            client_timeout,
        ));
        let connected = ClientEvent::Connected {
            id: id.clone(),
            sender: ClientSender::Router {
                identity,
                tx: out_tx.clone(),
            },
        };
        if events.send(connected).await.is_err() {
            return false;
        }
    }

    let envelope: FromClient = match decode(payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(client = %id, %error, "dropping undecodable message");
            return true;
        }
    };

    if let Some(queue) = queues.get(&id) {
        if queue.try_send(envelope).is_err() {
            // Queue full: the client is outrunning its consumer
            warn!(client = %id, "inbound queue full, dropping message");
        }
    }
    true
}

/// Per-client consumer: serializes this client's messages into the broker
/// loop and applies the silence timeout.
async fn consume_client(
    id: ClientId,
    mut queue: mpsc::Receiver<FromClient>,
    events: mpsc::Sender<ClientEvent>,
    expired: mpsc::Sender<ClientId>,
    client_timeout: Duration,
) {
    debug!(client = %id, "consuming inputs for client");
    loop {
        match tokio::time::timeout(client_timeout, queue.recv()).await {
            Ok(Some(message)) => {
                if events
                    .send(ClientEvent::Message {
                        id: id.clone(),
                        message,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => return,
            Err(_) => {
                debug!(client = %id, "client silent past timeout");
                let _ = expired.send(id).await;
                return;
            }
        }
    }
}
