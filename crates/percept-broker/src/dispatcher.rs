// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Engine dispatcher.
//!
//! Owns the registry of named sources and their connected engine workers.
//! Each worker cycles IDLE ⇄ BUSY with at most one frame outstanding; each
//! source keeps a single "latest unsent frame" slot so that under
//! backpressure only the newest frame survives, plus a bounded auxiliary
//! queue for sources whose workers require every response.
//!
//! Every method is a pure state transition returning [`DispatchEffect`]s for
//! the broker loop to apply. This keeps the registry single-owner (no locks)
//! and the state machine testable without sockets.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use percept_protocol::{
    EngineWelcome, Extras, Frame, FrameMetadata, FromEngine, ResultWrapper, StatusCode, ToEngine,
};
use tracing::{debug, info, warn};

use crate::session::ClientId;

/// Transport identity of one engine worker (router peer identity).
pub type WorkerAddr = Bytes;

/// Side effect of a dispatcher transition, applied by the broker loop.
#[derive(Debug)]
pub enum DispatchEffect {
    SendToEngine {
        addr: WorkerAddr,
        message: ToEngine,
    },
    SendResult {
        client: ClientId,
        source_name: String,
        frame_id: u64,
        result: ResultWrapper,
        return_token: bool,
    },
    /// First worker for a source connected
    SourceAdded { name: String },
    /// Last worker for a source disconnected
    SourceRemoved { name: String },
}

/// Correlation state for one dispatched frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Outstanding {
    meta: FrameMetadata,
    client: ClientId,
}

/// A frame accepted but not yet handed to any worker.
#[derive(Debug)]
struct PendingFrame {
    meta: FrameMetadata,
    client: ClientId,
    target_engines: Vec<String>,
    frame: Frame,
}

/// One connected engine worker. BUSY while `current` is `Some`.
struct EngineWorker {
    engine_name: String,
    source_name: String,
    all_responses_required: bool,
    current: Option<Outstanding>,
    /// Last time any message arrived from this worker
    last_received: Instant,
    awaiting_heartbeat: bool,
}

impl EngineWorker {
    fn is_idle(&self) -> bool {
        self.current.is_none()
    }
}

/// A named logical feed with its consuming workers and backpressure state.
struct Source {
    workers: Vec<WorkerAddr>,
    /// Newest frame not yet handed to any worker; overwriting this slot is
    /// the token-resolving event for the displaced frame
    latest_unsent: Option<PendingFrame>,
    /// Bounded queue used only when a worker requires every response
    pending: VecDeque<PendingFrame>,
    /// Newest frame handed to at least one worker whose token is unresolved
    last_dispatched: Option<Outstanding>,
}

/// The dispatcher state machine.
pub struct Dispatcher {
    sources: HashMap<String, Source>,
    workers: HashMap<WorkerAddr, EngineWorker>,
    queue_capacity: usize,
    engine_timeout: Duration,
}

impl Dispatcher {
    pub fn new(queue_capacity: usize, engine_timeout: Duration) -> Self {
        Dispatcher {
            sources: HashMap::new(),
            workers: HashMap::new(),
            queue_capacity,
            engine_timeout,
        }
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn sources_consumed(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Route one engine-channel message to the matching transition.
    pub fn on_engine_message(
        &mut self,
        addr: WorkerAddr,
        message: FromEngine,
        now: Instant,
    ) -> Vec<DispatchEffect> {
        match message {
            FromEngine::Welcome(welcome) => self.register_worker(addr, welcome, now),
            FromEngine::Heartbeat => {
                self.record_heartbeat(&addr, now);
                Vec::new()
            }
            FromEngine::Result { metadata, result } => {
                self.on_engine_result(&addr, metadata, result, now)
            }
        }
    }

    /// Attach a worker to its source, creating the source on first welcome.
    /// A duplicate engine name evicts the previous holder first.
    pub fn register_worker(
        &mut self,
        addr: WorkerAddr,
        welcome: EngineWelcome,
        now: Instant,
    ) -> Vec<DispatchEffect> {
        let mut effects = Vec::new();

        if self.workers.contains_key(&addr) {
            warn!(engine = %welcome.engine_name, "engine sent duplicate welcome message");
            return effects;
        }

        if let Some(stale_addr) = self
            .workers
            .iter()
            .find(|(_, w)| w.engine_name == welcome.engine_name)
            .map(|(a, _)| a.clone())
        {
            warn!(engine = %welcome.engine_name, "engine name already connected, evicting old worker");
            self.remove_worker(&stale_addr, &mut effects);
        }

        info!(
            engine = %welcome.engine_name,
            source = %welcome.source_name,
            "new engine worker connected"
        );

        if !self.sources.contains_key(&welcome.source_name) {
            self.sources.insert(
                welcome.source_name.clone(),
                Source {
                    workers: Vec::new(),
                    latest_unsent: None,
                    pending: VecDeque::new(),
                    last_dispatched: None,
                },
            );
            effects.push(DispatchEffect::SourceAdded {
                name: welcome.source_name.clone(),
            });
        }
        if let Some(source) = self.sources.get_mut(&welcome.source_name) {
            source.workers.push(addr.clone());
        }

        self.workers.insert(
            addr,
            EngineWorker {
                engine_name: welcome.engine_name,
                source_name: welcome.source_name,
                all_responses_required: welcome.all_responses_required,
                current: None,
                last_received: now,
                awaiting_heartbeat: false,
            },
        );

        effects
    }

    /// Admit one frame for a source.
    ///
    /// Returns `false` only when the auxiliary queue is full (backpressure);
    /// every other path accepts the frame, possibly by displacing an older
    /// one whose token is resolved on the spot.
    pub fn submit(
        &mut self,
        source_name: &str,
        frame_id: u64,
        target_engines: Vec<String>,
        frame: Frame,
        client: ClientId,
    ) -> (bool, Vec<DispatchEffect>) {
        let mut effects = Vec::new();

        let Some(source) = self.sources.get_mut(source_name) else {
            // The session layer checks consumption first; hitting this means
            // the source vanished in the same loop turn.
            debug!(source = source_name, "submit for unknown source");
            return (false, effects);
        };

        let meta = FrameMetadata {
            source_name: source_name.to_string(),
            frame_id,
        };
        let outstanding = Outstanding {
            meta: meta.clone(),
            client: client.clone(),
        };

        // Hand the frame to every currently-idle worker it targets.
        let mut dispatched = false;
        for addr in &source.workers {
            let Some(worker) = self.workers.get_mut(addr) else {
                continue;
            };
            if !worker.is_idle() {
                continue;
            }
            if !target_engines.is_empty() && !target_engines.contains(&worker.engine_name) {
                continue;
            }
            worker.current = Some(outstanding.clone());
            effects.push(DispatchEffect::SendToEngine {
                addr: addr.clone(),
                message: ToEngine::Input {
                    metadata: meta.clone(),
                    frame: frame.clone(),
                },
            });
            dispatched = true;
        }

        if dispatched {
            source.last_dispatched = Some(outstanding);
            return (true, effects);
        }

        // All (targeted) workers busy.
        let pending = PendingFrame {
            meta,
            client,
            target_engines,
            frame,
        };
        let wants_all_responses = source
            .workers
            .iter()
            .any(|addr| {
                self.workers
                    .get(addr)
                    .is_some_and(|worker| worker.all_responses_required)
            });

        if wants_all_responses {
            if source.pending.len() >= self.queue_capacity {
                debug!(source = source_name, "input queue full, signalling backpressure");
                return (false, effects);
            }
            source.pending.push_back(pending);
            return (true, effects);
        }

        if let Some(displaced) = source.latest_unsent.replace(pending) {
            // Freshness outranks completeness: the displaced frame is
            // abandoned and its token resolved right here.
            debug!(
                source = source_name,
                frame_id = displaced.meta.frame_id,
                "frame superseded before dispatch"
            );
            effects.push(DispatchEffect::SendResult {
                client: displaced.client,
                source_name: displaced.meta.source_name,
                frame_id: displaced.meta.frame_id,
                result: ResultWrapper::from_status(StatusCode::ServerDroppedFrame),
                return_token: true,
            });
        }

        (true, effects)
    }

    /// A worker heartbeat echo arrived.
    fn record_heartbeat(&mut self, addr: &WorkerAddr, now: Instant) {
        match self.workers.get_mut(addr) {
            Some(worker) => {
                debug!(engine = %worker.engine_name, "received heartbeat from engine");
                worker.awaiting_heartbeat = false;
                worker.last_received = now;
            }
            None => warn!("heartbeat from unknown engine"),
        }
    }

    /// A result arrived from a worker.
    ///
    /// If the worker was processing the source's most recently dispatched
    /// frame, the result resolves that frame's token and the worker is handed
    /// the next waiting frame. Otherwise the frame was superseded while in
    /// flight: its token was already resolved, and the stale result is
    /// relayed (tokenless) only when the worker requires every response.
    pub fn on_engine_result(
        &mut self,
        addr: &WorkerAddr,
        metadata: FrameMetadata,
        result: ResultWrapper,
        now: Instant,
    ) -> Vec<DispatchEffect> {
        let mut effects = Vec::new();

        let Some(worker) = self.workers.get_mut(addr) else {
            warn!("result from unknown engine; consider increasing the engine timeout");
            return effects;
        };
        worker.last_received = now;
        worker.awaiting_heartbeat = false;

        let Some(current) = worker.current.clone() else {
            warn!(engine = %worker.engine_name, "result from idle engine");
            return effects;
        };
        if current.meta != metadata {
            warn!(
                engine = %worker.engine_name,
                "result metadata does not correlate with outstanding frame"
            );
        }

        let engine_name = worker.engine_name.clone();
        let source_name = worker.source_name.clone();
        let all_responses_required = worker.all_responses_required;
        let Some(source) = self.sources.get_mut(&source_name) else {
            warn!(source = %source_name, "source info not found");
            return effects;
        };

        let is_latest = source.last_dispatched.as_ref() == Some(&current);
        if is_latest {
            debug!(engine = %engine_name, frame_id = current.meta.frame_id, "forwarding result");
            effects.push(DispatchEffect::SendResult {
                client: current.client.clone(),
                source_name: current.meta.source_name.clone(),
                frame_id: current.meta.frame_id,
                result,
                return_token: true,
            });
            source.last_dispatched = None;
        } else if all_responses_required {
            debug!(
                engine = %engine_name,
                frame_id = current.meta.frame_id,
                "relaying superseded result without token"
            );
            effects.push(DispatchEffect::SendResult {
                client: current.client.clone(),
                source_name: current.meta.source_name.clone(),
                frame_id: current.meta.frame_id,
                result,
                return_token: false,
            });
        }

        if let Some(worker) = self.workers.get_mut(addr) {
            Self::hand_next_frame(source, addr, worker, &mut effects);
        }
        effects
    }

    /// Give a now-idle worker the next waiting frame, if any targets it.
    fn hand_next_frame(
        source: &mut Source,
        addr: &WorkerAddr,
        worker: &mut EngineWorker,
        effects: &mut Vec<DispatchEffect>,
    ) {
        let next = if source
            .latest_unsent
            .as_ref()
            .map(|pf| Self::frame_targets_worker(pf, worker))
            .unwrap_or(false)
        {
            source.latest_unsent.take()
        } else if let Some(position) = source
            .pending
            .iter()
            .position(|pf| Self::frame_targets_worker(pf, worker))
        {
            source.pending.remove(position)
        } else {
            None
        };

        match next {
            Some(pending) => {
                let outstanding = Outstanding {
                    meta: pending.meta.clone(),
                    client: pending.client,
                };
                worker.current = Some(outstanding.clone());
                source.last_dispatched = Some(outstanding);
                effects.push(DispatchEffect::SendToEngine {
                    addr: addr.clone(),
                    message: ToEngine::Input {
                        metadata: pending.meta,
                        frame: pending.frame,
                    },
                });
            }
            None => {
                worker.current = None;
            }
        }
    }

    fn frame_targets_worker(pending: &PendingFrame, worker: &EngineWorker) -> bool {
        pending.target_engines.is_empty()
            || pending.target_engines.contains(&worker.engine_name)
    }

    /// Periodic liveness pass over every worker.
    ///
    /// Quiet idle workers are probed once; workers that are BUSY past the
    /// timeout, or that never answered a probe, are declared dead.
    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<DispatchEffect> {
        let mut effects = Vec::new();
        let mut dead = Vec::new();

        for (addr, worker) in &mut self.workers {
            let silence = now.duration_since(worker.last_received);
            if silence < self.engine_timeout {
                continue;
            }

            if !worker.awaiting_heartbeat && worker.is_idle() {
                debug!(engine = %worker.engine_name, "probing idle engine");
                effects.push(DispatchEffect::SendToEngine {
                    addr: addr.clone(),
                    message: ToEngine::Heartbeat,
                });
                worker.awaiting_heartbeat = true;
                // Restart the countdown for the probe reply
                worker.last_received = now;
                continue;
            }

            info!(
                engine = %worker.engine_name,
                silence_secs = silence.as_secs(),
                "lost connection to engine worker"
            );
            dead.push(addr.clone());
        }

        for addr in dead {
            self.remove_worker(&addr, &mut effects);
        }
        effects
    }

    /// Detach a dead worker, resolving whatever it owed.
    fn remove_worker(&mut self, addr: &WorkerAddr, effects: &mut Vec<DispatchEffect>) {
        let Some(worker) = self.workers.remove(addr) else {
            return;
        };
        let Some(source) = self.sources.get_mut(&worker.source_name) else {
            return;
        };
        source.workers.retain(|a| a != addr);

        if let Some(current) = worker.current {
            // Only the frame nothing superseded still owes a token.
            if source.last_dispatched.as_ref() == Some(&current) {
                let mut result = ResultWrapper::from_status(StatusCode::EngineError);
                result.extras = Some(Extras::from_value(&serde_json::json!({
                    "message": format!("Engine {} disconnected", worker.engine_name),
                })));
                effects.push(DispatchEffect::SendResult {
                    client: current.client,
                    source_name: current.meta.source_name,
                    frame_id: current.meta.frame_id,
                    result,
                    return_token: true,
                });
                source.last_dispatched = None;
            }
        }

        if source.workers.is_empty() {
            // Resolve every still-undispatched frame before the source goes.
            if let Some(pending) = source.latest_unsent.take() {
                effects.push(Self::dropped_frame_result(pending));
            }
            while let Some(pending) = source.pending.pop_front() {
                effects.push(Self::dropped_frame_result(pending));
            }
            self.sources.remove(&worker.source_name);
            effects.push(DispatchEffect::SourceRemoved {
                name: worker.source_name.clone(),
            });
        }
    }

    fn dropped_frame_result(pending: PendingFrame) -> DispatchEffect {
        DispatchEffect::SendResult {
            client: pending.client,
            source_name: pending.meta.source_name,
            frame_id: pending.meta.frame_id,
            result: ResultWrapper::from_status(StatusCode::ServerDroppedFrame),
            return_token: true,
        }
    }
}
