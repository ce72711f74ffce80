//! Metrics instrumentation for Tether.
//!
//! This module is only available when the `metrics` feature is enabled.

/// Metric names used throughout the crate.
pub mod names {
    /// Total unary calls issued.
    pub const CALLS_TOTAL: &str = "tether_calls_total";
    /// Total streams opened.
    pub const STREAMS_TOTAL: &str = "tether_streams_total";
    /// Total send attempts that were retried after a failure.
    pub const SEND_RETRIES_TOTAL: &str = "tether_send_retries_total";
    /// Total sends that failed every attempt.
    pub const SENDS_EXHAUSTED_TOTAL: &str = "tether_sends_exhausted_total";
    /// Total inbound envelopes ignored because their identifier was finished.
    pub const INERT_ENVELOPES_TOTAL: &str = "tether_inert_envelopes_total";
    /// Total reverse-channel requests handled, labeled by outcome.
    pub const HOST_REQUESTS_TOTAL: &str = "tether_host_requests_total";
    /// Number of outstanding calls and streams.
    pub const REGISTRY_SIZE: &str = "tether_registry_size";
}

/// Record a unary call being issued.
#[inline]
pub fn call_started() {
    metrics::counter!(names::CALLS_TOTAL).increment(1);
}

/// Record a stream being opened.
#[inline]
pub fn stream_started() {
    metrics::counter!(names::STREAMS_TOTAL).increment(1);
}

/// Record a send being retried.
#[inline]
pub fn send_retried() {
    metrics::counter!(names::SEND_RETRIES_TOTAL).increment(1);
}

/// Record a send giving up.
#[inline]
pub fn send_exhausted() {
    metrics::counter!(names::SENDS_EXHAUSTED_TOTAL).increment(1);
}

/// Record a late envelope being ignored.
#[inline]
pub fn inert_envelope() {
    metrics::counter!(names::INERT_ENVELOPES_TOTAL).increment(1);
}

/// Record a reverse-channel request outcome (`"ok"`, `"error"`, or `"unhandled"`).
#[inline]
pub fn host_request(outcome: &'static str) {
    metrics::counter!(names::HOST_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the current registry size.
#[inline]
#[allow(clippy::cast_precision_loss)]
pub fn registry_size(len: usize) {
    metrics::gauge!(names::REGISTRY_SIZE).set(len as f64);
}
