//! Endpoint abstraction: transport seam, lifecycle states, and the
//! per-endpoint session loop.
//!
//! Each side of the bridge owns exactly one transport. A session task
//! drives that transport: it reads bytes, decodes them through the side's
//! codec, and feeds decoded frames into the forwarding engine's single
//! consumption point; in the other direction it encodes frames the engine
//! addressed to this side and writes them out. The transport is never
//! touched from any other task.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant, sleep_until},
};
use tokio_util::{
    codec::{Decoder, Encoder},
    sync::CancellationToken,
};

use crate::{
    codec::CodecError,
    events::{BridgeEvent, EventSink},
    frame::Frame,
};

/// Identifies one side of the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// The serial/COM side facing the client software.
    Serial,
    /// The networked CAN server side.
    Network,
}

impl EndpointId {
    /// The other side of the bridge.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Serial => Self::Network,
            Self::Network => Self::Serial,
        }
    }

    /// Lowercase name for logging and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one endpoint.
///
/// Transitions are driven by the supervisor: `Closed → Opening → Open` on
/// startup and reconnect, `Open → Degraded` on a read or write error,
/// `Degraded → Opening` after the backoff delay, and any state `→ Closed`
/// on shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndpointState {
    /// Not running; the terminal state after shutdown.
    #[default]
    Closed,
    /// Transport is being established.
    Opening,
    /// Transport established; traffic flows.
    Open,
    /// Transport failed; awaiting reconnect backoff.
    Degraded,
}

impl EndpointState {
    /// Lowercase name for logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors establishing a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be opened.
    #[error("failed to open transport: {0}")]
    Open(#[source] io::Error),

    /// The connect attempt did not complete within the configured timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
}

/// Byte-stream transport owned by one endpoint.
///
/// The bridge's core depends only on this contract, not on how bytes reach
/// a COM port or the CAN server.
#[async_trait]
pub trait Transport: Send {
    /// Read available bytes into `buf`, returning the number read.
    ///
    /// A return of `0` signals end of stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the session treats it as an
    /// endpoint failure.
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Write all of `bytes` to the peer.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the session treats it as an
    /// endpoint failure.
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Release the transport.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error. Close failures are logged and
    /// otherwise ignored; the transport is dropped regardless.
    async fn close(&mut self) -> io::Result<()>;
}

/// Factory establishing fresh transports for one endpoint.
///
/// The supervisor calls this on every (re)connect attempt, so transports
/// are created anew after each failure rather than reused.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the transport cannot be established;
    /// the supervisor retries with backoff.
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested; the transport was closed cooperatively.
    Shutdown,
    /// The peer closed the stream.
    PeerClosed,
    /// A read or write failed.
    Failed(io::Error),
}

/// One live attachment of a transport to the bridge.
///
/// Constructed by the supervisor after a successful connect and driven to
/// completion; the transport is closed on every exit path.
pub struct EndpointSession<'a, C> {
    id: EndpointId,
    codec: C,
    transport: Box<dyn Transport>,
    inbound_tx: mpsc::Sender<(EndpointId, Frame)>,
    outbound_rx: &'a mut mpsc::Receiver<Frame>,
    read_idle_timeout: Option<Duration>,
    events: EventSink,
    shutdown: CancellationToken,
}

impl<'a, C> EndpointSession<'a, C>
where
    C: Decoder<Item = Frame, Error = CodecError> + Encoder<Frame, Error = CodecError>,
{
    /// Bind a freshly connected transport to the engine's channels.
    pub fn new(
        id: EndpointId,
        codec: C,
        transport: Box<dyn Transport>,
        inbound_tx: mpsc::Sender<(EndpointId, Frame)>,
        outbound_rx: &'a mut mpsc::Receiver<Frame>,
        events: EventSink,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            codec,
            transport,
            inbound_tx,
            outbound_rx,
            read_idle_timeout: None,
            events,
            shutdown,
        }
    }

    /// Fail the session when no bytes arrive for `limit`.
    ///
    /// Detects half-open connections that keep accepting writes but never
    /// deliver data. Only sensible for dialed transports; a quiet serial
    /// client is normal, so the serial endpoint runs without one.
    #[must_use]
    pub fn with_read_idle_timeout(mut self, limit: Duration) -> Self {
        self.read_idle_timeout = Some(limit);
        self
    }

    /// Drive the session until shutdown, peer close, an I/O failure, or
    /// read-idle expiry.
    ///
    /// Reads and writes interleave through a biased `select!`: shutdown is
    /// observed first, then frames the engine addressed to this endpoint,
    /// then inbound bytes. Decoded frames are delivered to the engine in
    /// decode order; a full engine channel exerts backpressure on this
    /// endpoint only. When a read idle timeout is configured, the deadline
    /// is pushed out on every received byte and its expiry ends the session
    /// as a failure.
    pub async fn run(mut self) -> SessionEnd {
        let mut read_buf = BytesMut::with_capacity(1024);
        let idle_limit = self.read_idle_timeout;
        let mut idle_deadline = Instant::now() + idle_limit.unwrap_or(Duration::ZERO);
        let end = loop {
            #[expect(
                clippy::integer_division_remainder_used,
                reason = "tokio::select! expands to modulus operations internally"
            )]
            let end = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => Some(SessionEnd::Shutdown),

                maybe_frame = self.outbound_rx.recv() => match maybe_frame {
                    Some(frame) => self.send(frame).await,
                    // Engine gone; treat like shutdown.
                    None => Some(SessionEnd::Shutdown),
                },

                result = self.transport.read(&mut read_buf) => match result {
                    Ok(0) => Some(SessionEnd::PeerClosed),
                    Ok(_) => {
                        if let Some(limit) = idle_limit {
                            idle_deadline = Instant::now() + limit;
                        }
                        self.drain_decoded(&mut read_buf).await
                    }
                    Err(err) => Some(SessionEnd::Failed(err)),
                },

                () = sleep_until(idle_deadline), if idle_limit.is_some() => {
                    Some(SessionEnd::Failed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no bytes received within the read idle timeout",
                    )))
                }
            };
            if let Some(end) = end {
                break end;
            }
        };
        if let Err(err) = self.transport.close().await {
            log::debug!("{} transport close failed: {err}", self.id);
        }
        end
    }

    /// Encode and write one outbound frame.
    ///
    /// Frames the codec rejects (oversized payloads) are skipped with an
    /// anomaly event; only I/O failures end the session.
    async fn send(&mut self, frame: Frame) -> Option<SessionEnd> {
        let mut wire = BytesMut::new();
        match self.codec.encode(frame, &mut wire) {
            Ok(()) => {}
            Err(CodecError::Framing(error)) => {
                self.events.emit(BridgeEvent::DecodeAnomaly {
                    endpoint: self.id,
                    error,
                });
                return None;
            }
            Err(CodecError::Io(err)) => return Some(SessionEnd::Failed(err)),
        }
        match self.transport.write(&wire).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                crate::metrics::inc_forwarded(self.id);
                None
            }
            Err(err) => Some(SessionEnd::Failed(err)),
        }
    }

    /// Decode every complete frame buffered so far and hand it to the
    /// engine, recovering from framing faults in place.
    async fn drain_decoded(&mut self, read_buf: &mut BytesMut) -> Option<SessionEnd> {
        loop {
            match self.codec.decode(read_buf) {
                Ok(Some(frame)) => {
                    if self.inbound_tx.send((self.id, frame)).await.is_err() {
                        // Engine gone; treat like shutdown.
                        return Some(SessionEnd::Shutdown);
                    }
                }
                Ok(None) => return None,
                Err(CodecError::Framing(error)) => {
                    self.events.emit(BridgeEvent::DecodeAnomaly {
                        endpoint: self.id,
                        error,
                    });
                }
                Err(CodecError::Io(err)) => return Some(SessionEnd::Failed(err)),
            }
        }
    }
}
