//! Metrics instrumentation for cluster-dns.
//!
//! All metrics are prefixed with `cluster_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record an answered query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    counter!("cluster_dns.query.count", "type" => record_type.to_string(), "result" => result.as_str())
        .increment(1);
    histogram!("cluster_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Authoritative answer with records.
    Success,
    /// Name exists but has no record of the requested type.
    NoData,
    /// Name does not exist.
    NxDomain,
    /// Upstream answered a forwarded query.
    Forwarded,
    /// Forwarding was refused.
    Refused,
    /// Server failure, including recovered faults.
    ServFail,
    /// Malformed or unsupported request.
    Rejected,
}

impl QueryResult {
    fn as_str(self) -> &'static str {
        match self {
            QueryResult::Success => "success",
            QueryResult::NoData => "nodata",
            QueryResult::NxDomain => "nxdomain",
            QueryResult::Forwarded => "forwarded",
            QueryResult::Refused => "refused",
            QueryResult::ServFail => "servfail",
            QueryResult::Rejected => "rejected",
        }
    }
}

/// Record one upstream exchange.
pub fn record_exchange(protocol: &str, ok: bool, duration: std::time::Duration) {
    let outcome = if ok { "success" } else { "error" };
    counter!("cluster_dns.forward.exchange.count", "protocol" => protocol.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("cluster_dns.forward.exchange.duration.seconds", "protocol" => protocol.to_string())
        .record(duration.as_secs_f64());
}

/// Record stored values that could not be turned into records.
pub fn record_format_errors(count: usize) {
    counter!("cluster_dns.query.format_error.count").increment(count as u64);
}

/// Record a reply that had to be cut to fit the transport.
pub fn record_truncated() {
    counter!("cluster_dns.reply.truncated.count").increment(1);
}

/// Record a handler fault turned into SERVFAIL.
pub fn record_recovered_panic() {
    counter!("cluster_dns.query.panic.count").increment(1);
}

/// Record an applied orchestration event.
pub fn record_event(kind: &'static str) {
    counter!("cluster_dns.store.event.count", "kind" => kind).increment(1);
}

/// Record store sizes (call periodically or on change).
pub fn record_store_counts(a_names: usize, srv_names: usize) {
    gauge!("cluster_dns.store.a_names.count").set(a_names as f64);
    gauge!("cluster_dns.store.srv_names.count").set(srv_names as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
