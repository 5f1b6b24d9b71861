//! Structured observability events.
//!
//! Every non-fatal irregularity the bridge observes — state transitions,
//! framing faults, unmatched answers, duplicate registrations, timeouts,
//! cancellations — is reported as a [`BridgeEvent`]. Events are delivered
//! to an optional externally supplied channel and always mirrored to the
//! log facade, so embedders may consume them programmatically or rely on
//! logging alone.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::{
    codec::FramingError,
    endpoint::{EndpointId, EndpointState},
    frame::CorrelationKey,
};

/// One observability event emitted by the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    /// An endpoint's lifecycle state changed.
    EndpointState {
        /// Endpoint whose state changed.
        endpoint: EndpointId,
        /// New state.
        state: EndpointState,
    },
    /// Malformed input was discarded while decoding.
    DecodeAnomaly {
        /// Endpoint the bytes arrived on.
        endpoint: EndpointId,
        /// Fault observed.
        error: FramingError,
    },
    /// An answer arrived with no matching outstanding request.
    UnmatchedAnswer {
        /// Endpoint the answer arrived on.
        endpoint: EndpointId,
        /// Key derived from the answer.
        key: CorrelationKey,
    },
    /// A request re-used the key of an outstanding transaction.
    DuplicateRequest {
        /// Endpoint the request arrived on.
        endpoint: EndpointId,
        /// Contested key.
        key: CorrelationKey,
    },
    /// A request could not be delivered because the destination endpoint
    /// was not open.
    ForwardFailed {
        /// Endpoint the frame could not be delivered to.
        destination: EndpointId,
        /// Key of the affected transaction, when the frame carried one.
        key: Option<CorrelationKey>,
    },
    /// A pending request passed its deadline without an answer.
    RequestTimedOut {
        /// Key of the expired transaction.
        key: CorrelationKey,
        /// Endpoint that originated the request.
        origin: EndpointId,
    },
    /// A pending request was cancelled by shutdown.
    RequestCancelled {
        /// Key of the cancelled transaction.
        key: CorrelationKey,
        /// Endpoint that originated the request.
        origin: EndpointId,
    },
}

/// Sink delivering [`BridgeEvent`]s to an optional external consumer.
///
/// Cloneable; the engine, endpoints, and supervisor each hold one. Delivery
/// never blocks: if the consumer's channel is full the event is dropped
/// after logging, so a slow collector cannot stall forwarding.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<BridgeEvent>>,
}

impl EventSink {
    /// Sink that only logs.
    #[must_use]
    pub fn disabled() -> Self { Self { tx: None } }

    /// Sink forwarding events to `tx` in addition to logging.
    #[must_use]
    pub fn new(tx: mpsc::Sender<BridgeEvent>) -> Self { Self { tx: Some(tx) } }

    /// Report an event.
    pub fn emit(&self, event: BridgeEvent) {
        log_event(&event);
        #[cfg(feature = "metrics")]
        record_event(&event);
        if let Some(tx) = &self.tx {
            if let Err(err) = tx.try_send(event) {
                debug!("event consumer not keeping up, dropping event: {err}");
            }
        }
    }
}

fn log_event(event: &BridgeEvent) {
    match event {
        BridgeEvent::EndpointState { endpoint, state } => {
            info!("{endpoint} endpoint is now {state}");
        }
        BridgeEvent::DecodeAnomaly { endpoint, error } => {
            warn!("{endpoint} endpoint discarded malformed input: {error}");
        }
        BridgeEvent::UnmatchedAnswer { endpoint, key } => {
            warn!("dropping unsolicited answer on {endpoint} endpoint: {key}");
        }
        BridgeEvent::DuplicateRequest { endpoint, key } => {
            warn!("rejecting duplicate request on {endpoint} endpoint: {key}");
        }
        BridgeEvent::ForwardFailed { destination, key } => {
            warn!("dropping frame for non-open {destination} endpoint (key: {key:?})");
        }
        BridgeEvent::RequestTimedOut { key, origin } => {
            warn!("request from {origin} endpoint timed out: {key}");
        }
        BridgeEvent::RequestCancelled { key, origin } => {
            debug!("request from {origin} endpoint cancelled by shutdown: {key}");
        }
    }
}

#[cfg(feature = "metrics")]
fn record_event(event: &BridgeEvent) {
    use crate::metrics;

    match event {
        BridgeEvent::EndpointState { .. } => {}
        BridgeEvent::RequestTimedOut { .. } => metrics::inc_timeouts(),
        BridgeEvent::DecodeAnomaly { .. }
        | BridgeEvent::UnmatchedAnswer { .. }
        | BridgeEvent::DuplicateRequest { .. }
        | BridgeEvent::ForwardFailed { .. }
        | BridgeEvent::RequestCancelled { .. } => metrics::inc_anomalies(),
    }
}
