//! Error types for cluster-dns.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use hickory_proto::xfer::Protocol;
use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// A stored address is not a valid IPv4 literal.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// A stored SRV target is not a valid `host:port`.
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget {
        /// The offending stored value.
        target: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A record event line is not valid JSON for any known operation.
    #[error("invalid record event: {0}")]
    InvalidEvent(#[from] serde_json::Error),
}

/// Failures of the forwarding fallback.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// No exchanger for the transport, or no upstream configured.
    #[error("can't forward to {addrs:?} over {protocol:?}")]
    Unavailable {
        /// Configured upstream addresses.
        addrs: Vec<SocketAddr>,
        /// Transport the query arrived on.
        protocol: Protocol,
    },

    /// An exchange stage did not finish in time.
    #[error("{stage} to {addr} timed out after {timeout:?}")]
    Timeout {
        /// Upstream address.
        addr: SocketAddr,
        /// `dial`, `write` or `read`.
        stage: &'static str,
        /// The configured bound for the stage.
        timeout: Duration,
    },

    /// Socket error while talking to the upstream.
    #[error("exchange with {addr} failed: {source}")]
    Io {
        /// Upstream address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The upstream sent something that is not a DNS message.
    #[error("malformed reply from {addr}: {source}")]
    Proto {
        /// Upstream address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: hickory_proto::ProtoError,
    },

    /// The upstream answered a different query.
    #[error("reply from {addr} has id {got}, expected {expected}")]
    IdMismatch {
        /// Upstream address.
        addr: SocketAddr,
        /// Id of the query we sent.
        expected: u16,
        /// Id of the reply we got.
        got: u16,
    },
}

impl ForwardError {
    /// Response code reported to the client for this failure.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            ForwardError::Unavailable { .. } => ResponseCode::Refused,
            _ => ResponseCode::ServFail,
        }
    }
}

/// Errors gathered while answering a single query.
///
/// Individual record failures are collected here instead of aborting the
/// answer; the whole set is logged once the reply is assembled.
#[derive(Debug, Default)]
pub struct MultiError(Vec<DnsError>);

impl MultiError {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error.
    pub fn push(&mut self, err: impl Into<DnsError>) {
        self.0.push(err.into());
    }

    /// True when nothing went wrong.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of collected errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
