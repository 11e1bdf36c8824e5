// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The client orchestrator.
//!
//! One producer task per source acquires a token, invokes the user producer
//! and hands the encoded input to the connection loop; the connection loop
//! owns the transport, delivers inbound envelopes (welcome, responses,
//! heartbeats) and reconnects after server silence. Every wait is bounded by
//! the heartbeat interval so liveness traffic is never starved.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use percept_config::ClientConfig;
use percept_protocol::{decode, encode, FromClient, ToClient};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::bucket::TokenBuckets;
use crate::error::Result;
use crate::producer::{ProducerWrapper, ResultConsumer};
use crate::transport::{self, ClientTransport};

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// A percept client: a set of token-gated producers plus one consumer.
pub struct PerceptClient {
    config: ClientConfig,
}

impl PerceptClient {
    pub fn new(config: ClientConfig) -> Self {
        PerceptClient { config }
    }

    /// Run the client against the configured endpoint until cancelled.
    pub async fn launch<C>(self, producers: Vec<ProducerWrapper>, consumer: C) -> Result<()>
    where
        C: ResultConsumer + 'static,
    {
        let endpoint = self.config.server_endpoint.clone();
        self.launch_with(producers, consumer, move || {
            let endpoint = endpoint.clone();
            async move { transport::connect(&endpoint).await }
        })
        .await
    }

    /// Run the client with a custom transport factory. The factory is called
    /// once per (re)connection attempt.
    pub async fn launch_with<C, F, Fut>(
        self,
        producers: Vec<ProducerWrapper>,
        mut consumer: C,
        mut connect: F,
    ) -> Result<()>
    where
        C: ResultConsumer + 'static,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Box<dyn ClientTransport>>> + Send,
    {
        let buckets = Arc::new(TokenBuckets::new());
        let heartbeat_interval = self.config.heartbeat_interval();
        let heartbeat_payload = encode(&FromClient::Heartbeat)?;

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
        for wrapper in producers {
            tokio::spawn(produce_loop(
                wrapper,
                Arc::clone(&buckets),
                out_tx.clone(),
                heartbeat_interval,
                heartbeat_payload.clone(),
            ));
        }
        drop(out_tx);

        loop {
            let mut transport = match connect().await {
                Ok(transport) => transport,
                Err(error) => {
                    warn!(%error, "connect failed, retrying");
                    sleep(heartbeat_interval).await;
                    continue;
                }
            };
            info!(endpoint = %self.config.server_endpoint, "connected to server");

            // Resend a heartbeat right away so the server sees liveness
            // before the first token is acquired.
            if let Err(error) = transport.send(heartbeat_payload.clone()).await {
                warn!(%error, "handshake heartbeat failed, reconnecting");
                continue;
            }

            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        match outbound {
                            Some(payload) => {
                                if let Err(error) = transport.send(payload).await {
                                    warn!(%error, "send failed, reconnecting");
                                    break;
                                }
                            }
                            // Every producer is gone; keep consuming results
                            // until the connection needs re-establishing.
                            None => {
                                self.consume_until_silent(&mut *transport, &buckets, &mut consumer)
                                    .await;
                                break;
                            }
                        }
                    }
                    inbound = timeout(self.config.silence_timeout(), transport.recv()) => {
                        if !self
                            .handle_inbound(inbound, &buckets, &mut consumer)
                            .await
                        {
                            break;
                        }
                    }
                }
            }

            // Discard local token debt; the next welcome reseeds buckets.
            buckets.reset();
            info!("reconnecting to server");
        }
    }

    /// Drain inbound envelopes when no producers remain, returning once the
    /// connection should be re-established.
    async fn consume_until_silent<C: ResultConsumer>(
        &self,
        transport: &mut dyn ClientTransport,
        buckets: &TokenBuckets,
        consumer: &mut C,
    ) {
        loop {
            let inbound = timeout(self.config.silence_timeout(), transport.recv()).await;
            if !self.handle_inbound(inbound, buckets, consumer).await {
                return;
            }
        }
    }

    /// Process one inbound recv outcome. Returns false to trigger reconnect.
    async fn handle_inbound<C: ResultConsumer>(
        &self,
        inbound: std::result::Result<Result<Vec<u8>>, tokio::time::error::Elapsed>,
        buckets: &TokenBuckets,
        consumer: &mut C,
    ) -> bool {
        let payload = match inbound {
            Err(_) => {
                warn!("server silent past timeout, reconnecting");
                return false;
            }
            Ok(Err(error)) => {
                warn!(%error, "receive failed, reconnecting");
                return false;
            }
            Ok(Ok(payload)) => payload,
        };

        match decode::<ToClient>(&payload) {
            Err(error) => {
                // Local decode error: drop the message, keep the connection
                warn!(%error, "dropping undecodable message from server");
            }
            Ok(ToClient::Heartbeat) => {
                debug!("received heartbeat from server");
            }
            Ok(ToClient::Welcome(welcome)) => {
                debug!(
                    sources = ?welcome.sources_consumed,
                    tokens = welcome.num_tokens_per_source,
                    "received welcome"
                );
                for source in &welcome.sources_consumed {
                    buckets.seed(source, welcome.num_tokens_per_source);
                }
            }
            Ok(ToClient::Response(response)) => {
                if response.return_token {
                    buckets.release(&response.source_name);
                }
                consumer.consume(response).await;
            }
        }
        true
    }
}

/// Scheduler for one source: token, then frame, then send, with heartbeats
/// emitted whenever a wait outlives the heartbeat interval.
async fn produce_loop(
    mut wrapper: ProducerWrapper,
    buckets: Arc<TokenBuckets>,
    out: mpsc::Sender<Vec<u8>>,
    heartbeat_interval: Duration,
    heartbeat_payload: Vec<u8>,
) {
    let mut frame_id: u64 = 0;

    'next_frame: loop {
        // The bucket appears with the first welcome that advertises the
        // source, and may be rebuilt across reconnects.
        let bucket = loop {
            match timeout(heartbeat_interval, buckets.wait_for(&wrapper.source_name)).await {
                Ok(bucket) => break bucket,
                Err(_) => {
                    if out.send(heartbeat_payload.clone()).await.is_err() {
                        return;
                    }
                }
            }
        };

        // Acquire a token, bounded so heartbeats keep flowing.
        loop {
            match timeout(heartbeat_interval, bucket.take()).await {
                Ok(()) => break,
                Err(_) => {
                    if out.send(heartbeat_payload.clone()).await.is_err() {
                        return;
                    }
                    // The bucket may have been replaced by a reconnect while
                    // we waited on the stale one.
                    let current = buckets.get(&wrapper.source_name);
                    match current {
                        Some(current) if Arc::ptr_eq(&current, &bucket) => {}
                        _ => continue 'next_frame,
                    }
                }
            }
        }

        // Invoke the producer with a cancel-safe bounded wait: the in-flight
        // call is never dropped, only the wait on it.
        let frame = {
            let produce = wrapper.producer.produce();
            tokio::pin!(produce);
            loop {
                tokio::select! {
                    frame = &mut produce => break frame,
                    _ = sleep(heartbeat_interval) => {
                        if out.send(heartbeat_payload.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        };

        let Some(frame) = frame else {
            // Nothing to send: give the token back and ask again.
            buckets.release(&wrapper.source_name);
            continue;
        };

        frame_id += 1;
        let input = FromClient::Input {
            source_name: wrapper.source_name.clone(),
            frame_id,
            target_engines: wrapper.target_engines.clone(),
            frame,
        };
        match encode(&input) {
            Ok(payload) => {
                debug!(source = %wrapper.source_name, frame_id, "sending frame");
                if out.send(payload).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                warn!(source = %wrapper.source_name, %error, "failed to encode frame");
                buckets.release(&wrapper.source_name);
            }
        }
    }
}
