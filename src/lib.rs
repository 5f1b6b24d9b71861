//! Public API for the `canbridge` library.
//!
//! `canbridge` bridges client software written against a serial CAN29
//! microscope driver to a networked CAN server speaking the same protocol
//! in a different envelope. The crate provides the frame codec, the
//! request/response forwarding engine, and the connection lifecycle
//! supervisor; transports sit behind a small trait so embedders can swap
//! the serial and network byte streams.

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod events;
pub mod frame;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pending;
pub mod supervisor;
pub mod transport;

pub use codec::{CodecError, FramingError, NetCodec, SerialCodec};
pub use config::{BridgeConfig, ConfigError};
pub use endpoint::{Connector, EndpointId, EndpointState, Transport, TransportError};
pub use engine::{EngineConfig, EnumerationResponder, ForwardingEngine};
pub use events::{BridgeEvent, EventSink};
pub use frame::{CorrelationKey, Frame, MessageKind};
pub use pending::{PendingError, PendingRequest, PendingRequestTable};
pub use supervisor::{BackoffConfig, ConnectionSupervisor};
