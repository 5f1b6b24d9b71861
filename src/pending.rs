//! Registry of in-flight requests awaiting an answer.
//!
//! The table is the single source of truth for "is this answer expected".
//! It is owned exclusively by the forwarding engine's task, so every
//! `register`/`resolve`/`sweep_expired` call is serialized through the
//! engine's event loop; no other component touches the entries.

use std::collections::HashMap;

use thiserror::Error;
use tokio::time::Instant;

use crate::{endpoint::EndpointId, frame::CorrelationKey};

/// Errors from table operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    /// A request with this key is already outstanding.
    ///
    /// Either a protocol violation or a client retry bug; surfaced rather
    /// than silently overwriting the original entry.
    #[error("duplicate correlation key: {0}")]
    DuplicateKey(CorrelationKey),

    /// No outstanding request matches this key.
    #[error("no pending request for key: {0}")]
    NotFound(CorrelationKey),
}

/// One in-flight request forwarded across the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    /// Correlation key derived from the request frame.
    pub key: CorrelationKey,
    /// Endpoint the request arrived on; answers are routed back here.
    pub origin: EndpointId,
    /// When the request was forwarded.
    pub registered_at: Instant,
    /// Instant past which the request counts as timed out.
    pub deadline: Instant,
}

/// In-flight request table keyed by [`CorrelationKey`].
///
/// Lookup and removal are `HashMap` operations, constant-time in the number
/// of outstanding requests.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: HashMap<CorrelationKey, PendingRequest>,
}

impl PendingRequestTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no requests are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Register a newly forwarded request.
    ///
    /// # Errors
    ///
    /// Returns [`PendingError::DuplicateKey`] if a request with the same
    /// key is already outstanding; the existing entry is left untouched.
    pub fn register(&mut self, request: PendingRequest) -> Result<(), PendingError> {
        match self.entries.entry(request.key) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(PendingError::DuplicateKey(request.key))
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    /// Remove and return the request matching `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PendingError::NotFound`] for an unsolicited answer.
    pub fn resolve(&mut self, key: &CorrelationKey) -> Result<PendingRequest, PendingError> {
        self.entries
            .remove(key)
            .ok_or(PendingError::NotFound(*key))
    }

    /// Origin endpoint of the request matching `key`, without removing it.
    ///
    /// Used for intermediate answers, which are routed to the origin while
    /// the transaction stays open.
    #[must_use]
    pub fn origin_of(&self, key: &CorrelationKey) -> Option<EndpointId> {
        self.entries.get(key).map(|entry| entry.origin)
    }

    /// Remove and return every request whose deadline has passed.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired: Vec<CorrelationKey> = self
            .entries
            .values()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    /// Remove and return every outstanding request.
    ///
    /// Called on shutdown so each entry can be reported as cancelled
    /// instead of waiting for natural expiry.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Remove and return every request awaiting an answer from `responder`.
    ///
    /// A request forwarded to `responder` originated on the opposite
    /// endpoint; when `responder` leaves the open state those requests can
    /// never be answered and are failed immediately instead of waiting for
    /// expiry.
    pub fn drain_awaiting(&mut self, responder: EndpointId) -> Vec<PendingRequest> {
        let origin = responder.opposite();
        let affected: Vec<CorrelationKey> = self
            .entries
            .values()
            .filter(|entry| entry.origin == origin)
            .map(|entry| entry.key)
            .collect();
        affected
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }
}
