// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client transport bindings.
//!
//! The same envelope stream rides either a WebSocket connection or a ZeroMQ
//! dealer socket; the endpoint scheme picks the binding (`ws://` for the
//! stream transport, `tcp://` or `ipc://` for the router-socket transport).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use percept_protocol::{encode, FromClient};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::error::{ClientError, Result};

/// One bidirectional envelope channel to the broker.
#[async_trait]
pub trait ClientTransport: Send {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// Connect using the binding matched by the endpoint scheme.
pub async fn connect(endpoint: &str) -> Result<Box<dyn ClientTransport>> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(Box::new(WsTransport::connect(endpoint).await?))
    } else if endpoint.starts_with("tcp://") || endpoint.starts_with("ipc://") {
        Ok(Box::new(ZmqTransport::connect(endpoint).await?))
    } else {
        Err(ClientError::InvalidEndpoint(endpoint.to_string()))
    }
}

/// Persistent duplex stream binding.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await?;
        debug!(url, "WebSocket transport connected");
        Ok(WsTransport { stream })
    }
}

#[async_trait]
impl ClientTransport for WsTransport {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.stream.send(Message::Binary(payload)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Err(ClientError::ConnectionClosed),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                // Ping/Pong are handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }
}

/// Router-socket binding: a dealer peer addressed by identity on the broker
/// side. A hello message is sent on connect so the broker learns the
/// identity before any input arrives.
pub struct ZmqTransport {
    socket: DealerSocket,
}

impl ZmqTransport {
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let mut socket = DealerSocket::new();
        socket.connect(endpoint).await?;
        socket
            .send(ZmqMessage::from(encode(&FromClient::Hello)?))
            .await?;
        debug!(endpoint, "ZMQ transport connected");
        Ok(ZmqTransport { socket })
    }
}

#[async_trait]
impl ClientTransport for ZmqTransport {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.socket.send(ZmqMessage::from(payload)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            let message = self.socket.recv().await?;
            let frames = message.into_vec();
            if let Some(payload) = frames.iter().rev().find(|frame| !frame.is_empty()) {
                return Ok(payload.to_vec());
            }
        }
    }
}
