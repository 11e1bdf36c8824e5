// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! WebSocket client transport binding.
//!
//! One persistent duplex connection per client: a reader task decodes one
//! envelope at a time and forwards it to the broker loop, a writer task
//! drains the session's outbound queue. Disconnect is detected by the stream
//! closing.

use futures_util::{SinkExt, StreamExt};
use percept_protocol::{decode, FromClient};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::session::{ClientEvent, ClientId, ClientSender};

/// Per-connection outbound queue depth. Senders suspend when a client's
/// writer falls this far behind, which is the transport backpressure point.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Accept WebSocket clients forever, feeding decoded events to the broker.
pub async fn serve(
    listener: TcpListener,
    events: mpsc::Sender<ClientEvent>,
    message_max_size: usize,
) {
    loop {
        if events.is_closed() {
            debug!("broker loop gone, stopping accept loop");
            return;
        }
        match listener.accept().await {
            Ok((stream, addr)) => {
                // Low latency beats throughput for live sensor feeds
                let _ = stream.set_nodelay(true);
                debug!(%addr, "accepted client connection");
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    events.clone(),
                    message_max_size,
                ));
            }
            Err(error) => {
                warn!(%error, "accept error");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: std::net::SocketAddr,
    events: mpsc::Sender<ClientEvent>,
    message_max_size: usize,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(%addr, %error, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut reader) = ws_stream.split();

    let id = ClientId::from_addr(addr);
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);

    if events
        .send(ClientEvent::Connected {
            id: id.clone(),
            sender: ClientSender::Stream(out_tx),
        })
        .await
        .is_err()
    {
        return;
    }

    // Writer: drains until the hub drops this session's sender.
    let writer = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if let Err(error) = sink.send(Message::Binary(payload)).await {
                debug!(%error, "client writer stopped");
                break;
            }
        }
    });

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if data.len() > message_max_size {
                    warn!(client = %id, size = data.len(), "oversized message dropped");
                    continue;
                }
                match decode::<FromClient>(&data) {
                    Ok(envelope) => {
                        if events
                            .send(ClientEvent::Message {
                                id: id.clone(),
                                message: envelope,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(error) => {
                        // One bad message does not kill the connection
                        warn!(client = %id, %error, "dropping undecodable message");
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            // Ping/Pong are answered by tungstenite itself
            Ok(_) => {}
            Err(error) => {
                debug!(client = %id, %error, "client read error");
                break;
            }
        }
    }

    info!(client = %id, "client connection closed");
    let _ = events.send(ClientEvent::Disconnected { id }).await;
    writer.abort();
}
