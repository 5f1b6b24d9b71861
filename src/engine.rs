//! The forwarding engine: the routing core of the bridge.
//!
//! Both endpoint sessions feed decoded frames into one `mpsc` consumption
//! point; the engine's task drains it, classifies each frame from its
//! command class, and routes it. Requests are registered in the
//! [`PendingRequestTable`] and forwarded to the opposite endpoint; answers
//! resolve their pending entry and travel back to the recorded origin;
//! events pass straight through. A periodic sweep expires requests whose
//! deadline passed, and shutdown cancels everything outstanding.
//!
//! The engine owns the table outright, so all table access is serialized
//! through this task's event loop. Writes to the endpoint outbound
//! channels are its only externally observable effect.

use bytes::Bytes;
use tokio::{
    sync::{mpsc, watch},
    time::{Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::{EndpointId, EndpointState},
    events::{BridgeEvent, EventSink},
    frame::{
        CLASS_FINAL_ANSWER, CLASS_INTERMEDIATE_ANSWER, CorrelationKey, Frame, MessageKind,
    },
    pending::{PendingError, PendingRequest, PendingRequestTable},
};

/// Timing parameters for the engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Deadline applied to every forwarded request.
    pub request_timeout: Duration,
    /// Period of the expiry sweep; keep well under `request_timeout` so
    /// perceived timeout latency stays bounded.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(250),
        }
    }
}

/// The engine's view of one endpoint: where to send frames addressed to it
/// and how to observe its lifecycle state.
#[derive(Debug)]
pub struct EndpointLink {
    /// Outbound frame channel drained by the endpoint's session.
    pub tx: mpsc::Sender<Frame>,
    /// Lifecycle state published by the supervisor.
    pub state: watch::Receiver<EndpointState>,
}

/// Command class of the device enumeration request answered locally.
const ENUM_CLASS: u8 = 0x15;
/// Command number of the device enumeration request.
const ENUM_COMMAND: u8 = 0xA0;
/// Sub id of the device enumeration request.
const ENUM_SUB_ID: u8 = 0xFE;
/// Device status byte carried in each enumeration answer.
const ENUM_DEVICE_STATUS: u8 = 0x03;

/// Answers the CAN29 device enumeration request locally.
///
/// Simulated backends do not answer the bus enumeration command, so when
/// the bridge fronts one it claims the configured device ids itself: one
/// intermediate answer per id, the last marked final, and the request is
/// never forwarded.
#[derive(Clone, Debug)]
pub struct EnumerationResponder {
    device_ids: Vec<u8>,
}

impl EnumerationResponder {
    /// Responder claiming `device_ids`.
    #[must_use]
    pub fn new(device_ids: Vec<u8>) -> Self { Self { device_ids } }

    /// Whether `frame` is the enumeration request this responder handles.
    #[must_use]
    pub fn matches(&self, frame: &Frame) -> bool {
        frame.cmd_class == ENUM_CLASS
            && frame.cmd_number == ENUM_COMMAND
            && frame.sub_id == ENUM_SUB_ID
    }

    /// Build the answer series for `request`.
    #[must_use]
    pub fn replies(&self, request: &Frame) -> Vec<Frame> {
        let last = self.device_ids.len().saturating_sub(1);
        self.device_ids
            .iter()
            .enumerate()
            .map(|(i, &device_id)| Frame {
                dst: request.src,
                src: request.dst,
                cmd_class: if i == last {
                    CLASS_FINAL_ANSWER
                } else {
                    CLASS_INTERMEDIATE_ANSWER
                },
                cmd_number: request.cmd_number,
                proc_id: request.proc_id,
                sub_id: request.sub_id,
                data: Bytes::from(vec![device_id, ENUM_DEVICE_STATUS]),
            })
            .collect()
    }
}

/// Routes frames between the two endpoints.
pub struct ForwardingEngine {
    inbound_rx: mpsc::Receiver<(EndpointId, Frame)>,
    serial: EndpointLink,
    network: EndpointLink,
    table: PendingRequestTable,
    events: EventSink,
    config: EngineConfig,
    responder: Option<EnumerationResponder>,
    shutdown: CancellationToken,
}

impl ForwardingEngine {
    /// Assemble an engine from its channels.
    #[must_use]
    pub fn new(
        inbound_rx: mpsc::Receiver<(EndpointId, Frame)>,
        serial: EndpointLink,
        network: EndpointLink,
        config: EngineConfig,
        events: EventSink,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inbound_rx,
            serial,
            network,
            table: PendingRequestTable::new(),
            events,
            config,
            responder: None,
            shutdown,
        }
    }

    /// Attach a local enumeration responder.
    #[must_use]
    pub fn with_responder(mut self, responder: EnumerationResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    fn link(&self, id: EndpointId) -> &EndpointLink {
        match id {
            EndpointId::Serial => &self.serial,
            EndpointId::Network => &self.network,
        }
    }

    fn is_open(&self, id: EndpointId) -> bool {
        *self.link(id).state.borrow() == EndpointState::Open
    }

    /// Drive the engine until shutdown or both endpoints disappear.
    ///
    /// The loop observes shutdown first, then endpoint state changes, then
    /// the sweep tick, then inbound frames; frames from both endpoints
    /// interleave through the single inbound channel, which preserves
    /// per-endpoint decode order.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately.
        sweep.tick().await;

        loop {
            #[expect(
                clippy::integer_division_remainder_used,
                reason = "tokio::select! expands to modulus operations internally"
            )]
            let done = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => true,

                changed = self.serial.state.changed() => {
                    self.on_state_change(EndpointId::Serial, changed.is_ok())
                }

                changed = self.network.state.changed() => {
                    self.on_state_change(EndpointId::Network, changed.is_ok())
                }

                _ = sweep.tick() => {
                    self.sweep(Instant::now());
                    false
                }

                maybe = self.inbound_rx.recv() => match maybe {
                    Some((origin, frame)) => {
                        self.handle_frame(origin, frame).await;
                        false
                    }
                    None => true,
                },
            };
            if done {
                break;
            }
        }
        self.cancel_all();
    }

    /// React to an endpoint lifecycle change.
    ///
    /// When an endpoint leaves the open state, requests awaiting its answer
    /// can never complete; they are failed immediately instead of lingering
    /// until expiry. Returns `true` when the supervisor dropped the state
    /// channel, which only happens during teardown.
    fn on_state_change(&mut self, id: EndpointId, alive: bool) -> bool {
        if !alive {
            return true;
        }
        let state = *self.link(id).state.borrow();
        if state != EndpointState::Open {
            for request in self.table.drain_awaiting(id) {
                self.events.emit(BridgeEvent::RequestCancelled {
                    key: request.key,
                    origin: request.origin,
                });
            }
            self.publish_pending();
        }
        false
    }

    /// Route one decoded frame.
    async fn handle_frame(&mut self, origin: EndpointId, frame: Frame) {
        match frame.kind() {
            MessageKind::Request => self.handle_request(origin, frame).await,
            MessageKind::IntermediateAnswer => self.handle_intermediate(origin, frame).await,
            MessageKind::FinalAnswer => self.handle_final(origin, frame).await,
            // Unsolicited pushes and reserved classes carry no transaction;
            // pass them through.
            MessageKind::Event | MessageKind::Other => {
                self.forward(origin.opposite(), frame, None).await;
            }
        }
    }

    async fn handle_request(&mut self, origin: EndpointId, frame: Frame) {
        // Correlation keys exist for every non-event frame.
        let Some(key) = frame.correlation_key() else {
            return;
        };

        if origin == EndpointId::Serial {
            if let Some(responder) = self.responder.clone() {
                if responder.matches(&frame) {
                    tracing::debug!(%key, "answering enumeration request locally");
                    for reply in responder.replies(&frame) {
                        self.forward(origin, reply, Some(key)).await;
                    }
                    return;
                }
            }
        }

        let destination = origin.opposite();
        if !self.is_open(destination) {
            self.events.emit(BridgeEvent::ForwardFailed {
                destination,
                key: Some(key),
            });
            return;
        }

        let now = Instant::now();
        let request = PendingRequest {
            key,
            origin,
            registered_at: now,
            deadline: now + self.config.request_timeout,
        };
        if let Err(PendingError::DuplicateKey(key)) = self.table.register(request) {
            self.events.emit(BridgeEvent::DuplicateRequest {
                endpoint: origin,
                key,
            });
            return;
        }
        self.publish_pending();

        if !self.forward(destination, frame, Some(key)).await {
            // Undo the registration; the originator observes the failure
            // event rather than a dangling entry.
            let _ = self.table.resolve(&key);
            self.publish_pending();
        }
    }

    async fn handle_intermediate(&mut self, origin: EndpointId, frame: Frame) {
        let Some(key) = frame.correlation_key() else {
            return;
        };
        match self.table.origin_of(&key) {
            Some(request_origin) => {
                self.forward(request_origin, frame, Some(key)).await;
            }
            None => self.events.emit(BridgeEvent::UnmatchedAnswer {
                endpoint: origin,
                key,
            }),
        }
    }

    async fn handle_final(&mut self, origin: EndpointId, frame: Frame) {
        let Some(key) = frame.correlation_key() else {
            return;
        };
        match self.table.resolve(&key) {
            Ok(request) => {
                self.publish_pending();
                self.forward(request.origin, frame, Some(key)).await;
            }
            Err(_) => self.events.emit(BridgeEvent::UnmatchedAnswer {
                endpoint: origin,
                key,
            }),
        }
    }

    /// Hand `frame` to the session for `destination`.
    ///
    /// Returns whether the frame was accepted. Delivery toward a non-open
    /// endpoint fails immediately; nothing is queued for a dead peer.
    async fn forward(
        &mut self,
        destination: EndpointId,
        frame: Frame,
        key: Option<CorrelationKey>,
    ) -> bool {
        if !self.is_open(destination) {
            self.events
                .emit(BridgeEvent::ForwardFailed { destination, key });
            return false;
        }
        if self.link(destination).tx.send(frame).await.is_err() {
            self.events
                .emit(BridgeEvent::ForwardFailed { destination, key });
            return false;
        }
        true
    }

    /// Expire requests whose deadline has passed.
    ///
    /// CAN29 defines no generic error answer the bridge could synthesize
    /// for an arbitrary command, so expiry produces exactly one timeout
    /// event per request and no frame; the originating client observes
    /// silence, as it would with unresponsive hardware.
    fn sweep(&mut self, now: Instant) {
        let expired = self.table.sweep_expired(now);
        for request in &expired {
            self.events.emit(BridgeEvent::RequestTimedOut {
                key: request.key,
                origin: request.origin,
            });
        }
        if !expired.is_empty() {
            self.publish_pending();
        }
    }

    /// Cancel every outstanding request on shutdown.
    fn cancel_all(&mut self) {
        for request in self.table.drain() {
            self.events.emit(BridgeEvent::RequestCancelled {
                key: request.key,
                origin: request.origin,
            });
        }
        self.publish_pending();
    }

    fn publish_pending(&self) {
        #[cfg(feature = "metrics")]
        crate::metrics::set_pending(self.table.len());
    }
}
