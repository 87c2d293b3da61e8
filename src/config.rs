//! Configuration types for cluster-dns.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};

use crate::error::DnsError;
use crate::state::RecordStore;

/// Port used for upstream resolvers given without one.
pub const DEFAULT_UPSTREAM_PORT: u16 = 53;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: ZoneConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Records served from startup, before any orchestration event arrives.
    #[serde(default)]
    pub records: StaticRecords,

    /// Record event feed.
    #[serde(default)]
    pub events: EventsConfig,
}

/// Where orchestration events are accepted from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// TCP address accepting newline-delimited JSON record events. No feed
    /// is opened when unset, and the store holds only the static records.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// Zone configuration, fixed for the lifetime of one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Address for the DNS server to listen on.
    pub listen_addr: SocketAddr,

    /// Authoritative domain (e.g., "swan.local"). The trailing dot is optional.
    pub domain: String,

    /// TTL for DNS records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Advertise recursion in authoritative replies.
    #[serde(default = "default_recurse_on")]
    pub recurse_on: bool,

    /// Upstream resolvers for names outside the domain, `ip` or `ip:port`.
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// Bound on each stage of an upstream exchange, in milliseconds.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,

    /// Override for the connect stage.
    #[serde(default)]
    pub dial_timeout_ms: Option<u64>,

    /// Override for the read stage.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Override for the write stage.
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,

    /// Also accept queries over TCP on `listen_addr`.
    #[serde(default)]
    pub tcp: bool,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

/// Dial, read and write bounds for one upstream exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTimeouts {
    /// Connect bound.
    pub dial: Duration,
    /// Receive bound.
    pub read: Duration,
    /// Send bound.
    pub write: Duration,
}

impl ZoneConfig {
    /// Minimal configuration for `domain` listening on `listen_addr`.
    pub fn new(domain: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            domain: domain.into(),
            ttl: default_ttl(),
            recurse_on: default_recurse_on(),
            resolvers: Vec::new(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
            dial_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            tcp: false,
            soa: SoaConfig::default(),
        }
    }

    /// The authoritative domain as a fully-qualified name.
    pub fn origin(&self) -> Result<Name, DnsError> {
        let domain = self.domain.trim();
        if domain.is_empty() || domain == "." {
            return Err(DnsError::Config("domain must not be empty".to_string()));
        }
        let mut name = Name::from_ascii(domain)
            .map_err(|e| DnsError::Config(format!("invalid domain {domain:?}: {e}")))?;
        name.set_fqdn(true);
        Ok(name)
    }

    /// Upstream resolver addresses, with the default port filled in.
    pub fn upstreams(&self) -> Result<Vec<SocketAddr>, DnsError> {
        self.resolvers
            .iter()
            .map(|addr| parse_upstream(addr))
            .collect()
    }

    /// Per-stage exchange timeouts.
    pub fn timeouts(&self) -> ExchangeTimeouts {
        let stage = |ms: Option<u64>| Duration::from_millis(ms.unwrap_or(self.exchange_timeout_ms));
        ExchangeTimeouts {
            dial: stage(self.dial_timeout_ms),
            read: stage(self.read_timeout_ms),
            write: stage(self.write_timeout_ms),
        }
    }

    /// Check every derived value once, so the server fails at startup
    /// instead of on the first query.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.origin()?;
        self.upstreams()?;
        self.soa.names()?;
        if self.exchange_timeout_ms == 0 {
            return Err(DnsError::Config(
                "exchange_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_upstream(addr: &str) -> Result<SocketAddr, DnsError> {
    let addr = addr.trim();
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock);
    }
    let host = addr
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(addr);
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_UPSTREAM_PORT))
        .map_err(|_| DnsError::Config(format!("invalid resolver address {addr:?}")))
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "cluster_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.swan.local").
    pub mname: String,

    /// Admin mailbox in DNS format (e.g., "root.ns1.swan.local").
    pub rname: String,

    /// Zone serial number.
    #[serde(default = "default_serial")]
    pub serial: u32,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,
}

impl SoaConfig {
    /// Parsed primary nameserver and mailbox names.
    pub fn names(&self) -> Result<(Name, Name), DnsError> {
        let parse = |field: &str, value: &str| {
            Name::from_ascii(value)
                .map_err(|e| DnsError::Config(format!("invalid soa {field} {value:?}: {e}")))
        };
        Ok((parse("mname", &self.mname)?, parse("rname", &self.rname)?))
    }
}

fn default_ttl() -> u32 {
    60
}

fn default_recurse_on() -> bool {
    true
}

fn default_exchange_timeout_ms() -> u64 {
    3000
}

fn default_serial() -> u32 {
    1
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.cluster.local.".to_string(),
            rname: "root.ns1.cluster.local.".to_string(),
            serial: default_serial(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
        }
    }
}

/// Fixed records loaded into the store at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticRecords {
    /// name -> IPv4 addresses
    #[serde(default)]
    pub a: BTreeMap<String, Vec<String>>,

    /// name -> `host:port` targets
    #[serde(default)]
    pub srv: BTreeMap<String, Vec<String>>,
}

impl StaticRecords {
    /// Insert every configured record into `store`.
    pub fn seed(&self, store: &RecordStore) {
        for (name, ips) in &self.a {
            for ip in ips {
                store.add_a(name, ip);
            }
        }
        for (name, targets) in &self.srv {
            for target in targets {
                store.add_srv(name, target);
            }
        }
    }
}
