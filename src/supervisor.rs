//! Top-level lifecycle management.
//!
//! The supervisor owns both endpoints' state machines and the forwarding
//! engine's running state. Each endpoint runs an independent connect/run/
//! backoff loop: a failure on one side degrades and reconnects that side
//! alone while the other keeps flowing. Shutdown is cooperative — a single
//! cancellation token stops the engine and both endpoint loops, pending
//! requests are cancelled immediately, and transports are closed on every
//! exit path.

use std::sync::Arc;

use futures::Future;
use log::{info, warn};
use tokio::{
    sync::{mpsc, watch},
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    codec::{NetCodec, SerialCodec},
    config::BridgeConfig,
    endpoint::{Connector, EndpointId, EndpointSession, EndpointState, SessionEnd},
    engine::{EndpointLink, EnumerationResponder, ForwardingEngine},
    events::{BridgeEvent, EventSink},
    frame::Frame,
};

/// Capacity of the engine's inbound channel and each outbound channel.
///
/// Small on purpose: a stalled endpoint exerts backpressure instead of
/// queueing frames for a peer that is not draining them.
const CHANNEL_CAPACITY: usize = 64;

/// Configuration for exponential back-off between reconnect attempts.
///
/// The delay starts at `initial_delay`, doubles on each consecutive
/// failure, and is capped at `max_delay`. The failure count resets when an
/// endpoint reaches the open state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay once retries have increased exponentially.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to sane bounds and ensure `initial_delay <= max_delay`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay before the `failures`-th consecutive retry (1-based).
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

/// Owns the engine and both endpoint lifecycle loops.
pub struct ConnectionSupervisor {
    serial_connector: Arc<dyn Connector>,
    network_connector: Arc<dyn Connector>,
    config: BridgeConfig,
    events: EventSink,
}

impl ConnectionSupervisor {
    /// Build a supervisor over the two transport factories.
    #[must_use]
    pub fn new(
        serial_connector: Arc<dyn Connector>,
        network_connector: Arc<dyn Connector>,
        config: BridgeConfig,
        events: EventSink,
    ) -> Self {
        Self {
            serial_connector,
            network_connector,
            config,
            events,
        }
    }

    /// Run the bridge until Ctrl+C.
    pub async fn run(self) {
        self.run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    }

    /// Run the bridge until the `shutdown` future resolves.
    ///
    /// All tasks are joined before this returns, so transports are released
    /// deterministically.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus operations internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (serial_tx, serial_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (network_tx, network_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (serial_state_tx, serial_state) = watch::channel(EndpointState::Closed);
        let (network_state_tx, network_state) = watch::channel(EndpointState::Closed);

        let mut engine = ForwardingEngine::new(
            inbound_rx,
            EndpointLink {
                tx: serial_tx,
                state: serial_state,
            },
            EndpointLink {
                tx: network_tx,
                state: network_state,
            },
            self.config.engine(),
            self.events.clone(),
            token.clone(),
        );
        if let Some(device_ids) = self.config.enumeration_device_ids.clone() {
            engine = engine.with_responder(EnumerationResponder::new(device_ids));
        }
        tracker.spawn(engine.run());

        tracker.spawn(endpoint_loop(
            EndpointLoop {
                id: EndpointId::Serial,
                connector: Arc::clone(&self.serial_connector),
                inbound_tx: inbound_tx.clone(),
                state_tx: serial_state_tx,
                events: self.events.clone(),
                token: token.clone(),
                backoff: self.config.backoff.normalized(),
                // A quiet serial client is normal; only the dialed network
                // transport can go half-open.
                read_idle_timeout: None,
            },
            SerialCodec::new(self.config.max_buffered),
            serial_rx,
        ));
        tracker.spawn(endpoint_loop(
            EndpointLoop {
                id: EndpointId::Network,
                connector: Arc::clone(&self.network_connector),
                inbound_tx,
                state_tx: network_state_tx,
                events: self.events.clone(),
                token: token.clone(),
                backoff: self.config.backoff.normalized(),
                read_idle_timeout: Some(self.config.read_idle_timeout),
            },
            NetCodec,
            network_rx,
        ));
        tracker.close();

        tokio::select! {
            () = shutdown => {
                info!("shutdown requested");
                token.cancel();
            }
            () = token.cancelled() => {}
        }
        tracker.wait().await;
        info!("bridge stopped");
    }
}

/// Everything one endpoint's lifecycle loop needs besides its codec and
/// outbound channel.
struct EndpointLoop {
    id: EndpointId,
    connector: Arc<dyn Connector>,
    inbound_tx: mpsc::Sender<(EndpointId, Frame)>,
    state_tx: watch::Sender<EndpointState>,
    events: EventSink,
    token: CancellationToken,
    backoff: BackoffConfig,
    read_idle_timeout: Option<Duration>,
}

impl EndpointLoop {
    fn publish(&self, state: EndpointState) {
        let _ = self.state_tx.send(state);
        self.events.emit(BridgeEvent::EndpointState {
            endpoint: self.id,
            state,
        });
    }

    /// Discard frames queued for a session that no longer exists.
    ///
    /// The outbound channel outlives individual sessions, so frames
    /// accepted while the previous transport was dying would otherwise be
    /// replayed verbatim on the next connection. Each stale frame is
    /// surfaced as a failed forward instead.
    fn discard_stale_outbound(&self, outbound_rx: &mut mpsc::Receiver<Frame>) {
        while let Ok(frame) = outbound_rx.try_recv() {
            self.events.emit(BridgeEvent::ForwardFailed {
                destination: self.id,
                key: frame.correlation_key(),
            });
        }
    }
}

/// Drive one endpoint's `Closed → Opening → Open → Degraded` cycle until
/// shutdown.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus operations internally"
)]
async fn endpoint_loop<C>(ep: EndpointLoop, codec: C, mut outbound_rx: mpsc::Receiver<Frame>)
where
    C: tokio_util::codec::Decoder<Item = Frame, Error = crate::codec::CodecError>
        + tokio_util::codec::Encoder<Frame, Error = crate::codec::CodecError>
        + Clone
        + Send
        + 'static,
{
    let mut failures: u32 = 0;
    while !ep.token.is_cancelled() {
        ep.publish(EndpointState::Opening);
        match ep.connector.connect().await {
            Ok(transport) => {
                failures = 0;
                ep.publish(EndpointState::Open);
                let mut session = EndpointSession::new(
                    ep.id,
                    codec.clone(),
                    transport,
                    ep.inbound_tx.clone(),
                    &mut outbound_rx,
                    ep.events.clone(),
                    ep.token.clone(),
                );
                if let Some(limit) = ep.read_idle_timeout {
                    session = session.with_read_idle_timeout(limit);
                }
                match session.run().await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::PeerClosed => {
                        warn!("{} endpoint: peer closed the stream", ep.id);
                        ep.publish(EndpointState::Degraded);
                    }
                    SessionEnd::Failed(err) => {
                        warn!("{} endpoint failed: {err}", ep.id);
                        ep.publish(EndpointState::Degraded);
                    }
                }
            }
            Err(err) => {
                warn!("{} endpoint connect failed: {err}", ep.id);
                ep.publish(EndpointState::Degraded);
            }
        }
        // The endpoint is degraded by this point; frames still queued were
        // addressed to the dead transport and must not reach the next one.
        ep.discard_stale_outbound(&mut outbound_rx);

        failures += 1;
        #[cfg(feature = "metrics")]
        crate::metrics::inc_reconnects(ep.id);
        let delay = ep.backoff.delay(failures);
        tokio::select! {
            () = ep.token.cancelled() => break,
            () = sleep(delay) => {}
        }
    }
    ep.publish(EndpointState::Closed);
}

#[cfg(test)]
mod tests {
    use tokio::time::Duration;

    use super::BackoffConfig;

    #[test]
    fn backoff_doubles_to_cap() {
        let cfg = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(cfg.delay(1), Duration::from_millis(100));
        assert_eq!(cfg.delay(2), Duration::from_millis(200));
        assert_eq!(cfg.delay(3), Duration::from_millis(400));
        assert_eq!(cfg.delay(4), Duration::from_millis(800));
        assert_eq!(cfg.delay(5), Duration::from_secs(1));
        assert_eq!(cfg.delay(30), Duration::from_secs(1));
    }

    #[test]
    fn normalized_swaps_inverted_delays() {
        let cfg = BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(1),
        }
        .normalized();
        assert_eq!(cfg.initial_delay, Duration::from_millis(1));
        assert_eq!(cfg.max_delay, Duration::from_millis(5));
    }
}
