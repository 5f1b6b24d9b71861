//! Metric helpers for `canbridge`.
//!
//! This module defines metric names and simple helper functions wrapping
//! the [`metrics`](https://docs.rs/metrics) crate. Available behind the
//! default-on `metrics` feature.

use metrics::{counter, gauge};

use crate::endpoint::EndpointId;

/// Name of the counter tracking forwarded frames.
pub const FRAMES_FORWARDED: &str = "canbridge_frames_forwarded_total";
/// Name of the counter tracking protocol anomalies.
pub const ANOMALIES_TOTAL: &str = "canbridge_anomalies_total";
/// Name of the counter tracking request timeouts.
pub const TIMEOUTS_TOTAL: &str = "canbridge_request_timeouts_total";
/// Name of the gauge tracking outstanding requests.
pub const REQUESTS_PENDING: &str = "canbridge_requests_pending";
/// Name of the counter tracking endpoint reconnect attempts.
pub const RECONNECTS_TOTAL: &str = "canbridge_reconnects_total";

/// Record a frame forwarded out of the endpoint `destination`.
pub fn inc_forwarded(destination: EndpointId) {
    counter!(FRAMES_FORWARDED, "destination" => destination.as_str()).increment(1);
}

/// Record a protocol anomaly.
pub fn inc_anomalies() { counter!(ANOMALIES_TOTAL).increment(1); }

/// Record a request timeout.
pub fn inc_timeouts() { counter!(TIMEOUTS_TOTAL).increment(1); }

/// Record a reconnect attempt for `endpoint`.
pub fn inc_reconnects(endpoint: EndpointId) {
    counter!(RECONNECTS_TOTAL, "endpoint" => endpoint.as_str()).increment(1);
}

/// Publish the current number of outstanding requests.
pub fn set_pending(count: usize) {
    // Precision loss above 2^52 pending requests is not a concern.
    #[expect(clippy::cast_precision_loss, reason = "gauge takes f64")]
    gauge!(REQUESTS_PENDING).set(count as f64);
}
