//! Forwarding of out-of-zone queries to upstream resolvers.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::xfer::Protocol;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::config::{ExchangeTimeouts, ZoneConfig};
use crate::error::{DnsError, ForwardError};
use crate::metrics::{self, Timer};
use crate::truncate::MAX_MESSAGE_SIZE;

/// One query/reply round trip with a single upstream.
#[async_trait]
pub trait Exchanger: Send + Sync {
    /// Send `query` to `addr` and wait for the matching reply.
    async fn exchange(&self, query: &Message, addr: SocketAddr) -> Result<Message, ForwardError>;
}

/// Run one exchange stage under its timeout.
async fn stage<T, F>(
    addr: SocketAddr,
    stage: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, ForwardError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ForwardError::Io { addr, source }),
        Err(_) => Err(ForwardError::Timeout {
            addr,
            stage,
            timeout,
        }),
    }
}

fn encode(query: &Message, addr: SocketAddr) -> Result<Vec<u8>, ForwardError> {
    query
        .to_vec()
        .map_err(|source| ForwardError::Proto { addr, source })
}

fn decode(query: &Message, bytes: &[u8], addr: SocketAddr) -> Result<Message, ForwardError> {
    let reply = Message::from_vec(bytes).map_err(|source| ForwardError::Proto { addr, source })?;
    if reply.id() != query.id() {
        return Err(ForwardError::IdMismatch {
            addr,
            expected: query.id(),
            got: reply.id(),
        });
    }
    Ok(reply)
}

/// Datagram exchange from an ephemeral local port.
#[derive(Debug, Clone)]
pub struct UdpExchanger {
    timeouts: ExchangeTimeouts,
}

impl UdpExchanger {
    /// Create an exchanger with the given stage bounds.
    pub fn new(timeouts: ExchangeTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl Exchanger for UdpExchanger {
    async fn exchange(&self, query: &Message, addr: SocketAddr) -> Result<Message, ForwardError> {
        let bytes = encode(query, addr)?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = stage(addr, "dial", self.timeouts.dial, async {
            let socket = UdpSocket::bind(local).await?;
            socket.connect(addr).await?;
            Ok::<_, io::Error>(socket)
        })
        .await?;

        stage(addr, "write", self.timeouts.write, socket.send(&bytes)).await?;

        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let len = stage(addr, "read", self.timeouts.read, socket.recv(&mut buf)).await?;

        decode(query, &buf[..len], addr)
    }
}

/// Stream exchange with the two-byte length prefix of RFC 1035 section 4.2.2.
#[derive(Debug, Clone)]
pub struct TcpExchanger {
    timeouts: ExchangeTimeouts,
}

impl TcpExchanger {
    /// Create an exchanger with the given stage bounds.
    pub fn new(timeouts: ExchangeTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl Exchanger for TcpExchanger {
    async fn exchange(&self, query: &Message, addr: SocketAddr) -> Result<Message, ForwardError> {
        let bytes = encode(query, addr)?;
        let len = u16::try_from(bytes.len()).map_err(|_| ForwardError::Io {
            addr,
            source: io::Error::new(io::ErrorKind::InvalidInput, "query too large"),
        })?;

        let mut stream = stage(addr, "dial", self.timeouts.dial, TcpStream::connect(addr)).await?;

        stage(addr, "write", self.timeouts.write, async {
            let mut framed = Vec::with_capacity(bytes.len() + 2);
            framed.extend_from_slice(&len.to_be_bytes());
            framed.extend_from_slice(&bytes);
            stream.write_all(&framed).await?;
            stream.flush().await
        })
        .await?;

        let reply = stage(addr, "read", self.timeouts.read, async {
            let len = stream.read_u16().await?;
            let mut buf = vec![0u8; usize::from(len)];
            stream.read_exact(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        })
        .await?;

        decode(query, &reply, addr)
    }
}

/// Wraps an exchanger with logging and exchange metrics.
pub struct Instrumented<E> {
    inner: E,
    protocol: &'static str,
}

impl<E> Instrumented<E> {
    /// Label every exchange through `inner` with `protocol`.
    pub fn new(inner: E, protocol: &'static str) -> Self {
        Self { inner, protocol }
    }
}

#[async_trait]
impl<E: Exchanger> Exchanger for Instrumented<E> {
    async fn exchange(&self, query: &Message, addr: SocketAddr) -> Result<Message, ForwardError> {
        let timer = Timer::start();
        let result = self.inner.exchange(query, addr).await;
        let elapsed = timer.elapsed();

        metrics::record_exchange(self.protocol, result.is_ok(), elapsed);
        match &result {
            Ok(reply) => debug!(
                %addr,
                protocol = self.protocol,
                id = query.id(),
                rcode = ?reply.response_code(),
                answers = reply.answers().len(),
                ?elapsed,
                "upstream exchange"
            ),
            Err(e) => warn!(%addr, protocol = self.protocol, id = query.id(), ?elapsed, error = %e, "upstream exchange failed"),
        }

        result
    }
}

/// Sends queries outside the cluster domain to the configured upstreams.
#[derive(Clone, Default)]
pub struct Forwarder {
    addrs: Vec<SocketAddr>,
    udp: Option<Arc<dyn Exchanger>>,
    tcp: Option<Arc<dyn Exchanger>>,
}

impl Forwarder {
    /// Forwarder for `addrs` with no exchangers yet.
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            addrs,
            udp: None,
            tcp: None,
        }
    }

    /// Use `exchanger` for queries that arrived over `protocol`.
    ///
    /// Only UDP and TCP carry forwarded queries; other transports are
    /// ignored.
    pub fn with_exchanger(mut self, protocol: Protocol, exchanger: Arc<dyn Exchanger>) -> Self {
        match protocol {
            Protocol::Udp => self.udp = Some(exchanger),
            Protocol::Tcp => self.tcp = Some(exchanger),
            other => warn!(protocol = ?other, "no forwarding over this transport"),
        }
        self
    }

    /// Instrumented UDP and TCP forwarding to the configured resolvers.
    pub fn from_config(config: &ZoneConfig) -> Result<Self, DnsError> {
        let timeouts = config.timeouts();
        Ok(Self::new(config.upstreams()?)
            .with_exchanger(
                Protocol::Udp,
                Arc::new(Instrumented::new(UdpExchanger::new(timeouts), "udp")),
            )
            .with_exchanger(
                Protocol::Tcp,
                Arc::new(Instrumented::new(TcpExchanger::new(timeouts), "tcp")),
            ))
    }

    /// Configured upstream addresses, in the order they are tried.
    pub fn upstreams(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Exchange `query` with each upstream in turn over the transport the
    /// client used. The first reply wins; if every upstream fails, the last
    /// failure is returned.
    pub async fn forward(&self, query: &Message, protocol: Protocol) -> Result<Message, ForwardError> {
        let exchanger = match protocol {
            Protocol::Udp => self.udp.as_ref(),
            Protocol::Tcp => self.tcp.as_ref(),
            _ => None,
        };

        let mut last_err = ForwardError::Unavailable {
            addrs: self.addrs.clone(),
            protocol,
        };
        let Some(exchanger) = exchanger else {
            return Err(last_err);
        };

        for &addr in &self.addrs {
            match exchanger.exchange(query, addr).await {
                Ok(reply) => return Ok(reply),
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }
}
