//! Resource record synthesis from store entries and zone configuration.

use std::net::Ipv4Addr;

use hickory_proto::rr::rdata::{A, NS, SOA, SRV};
use hickory_proto::rr::{DNSClass, Name, RData, Record};

use crate::config::ZoneConfig;
use crate::error::DnsError;

/// Split a `host:port` target. Bracketed IPv6 hosts are accepted.
pub fn split_host_port(target: &str) -> Result<(&str, u16), DnsError> {
    let invalid = |reason| DnsError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let (host, port) = target.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let host = match host.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(|| invalid("unclosed bracket"))?,
        None if host.contains(':') => return Err(invalid("too many colons")),
        None => host,
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;

    Ok((host, port))
}

/// Builds A, SRV, SOA and NS records for one zone.
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    ttl: u32,
    mname: Name,
    rname: Name,
    serial: u32,
    refresh: u32,
    retry: u32,
    expire: u32,
}

impl RecordFormatter {
    /// Create a formatter from the zone configuration.
    pub fn new(config: &ZoneConfig) -> Result<Self, DnsError> {
        let (mname, rname) = config.soa.names()?;
        Ok(Self {
            ttl: config.ttl,
            mname,
            rname,
            serial: config.soa.serial,
            refresh: config.soa.refresh,
            retry: config.soa.retry,
            expire: config.soa.expire,
        })
    }

    fn record(&self, name: Name, rdata: RData) -> Record {
        let mut record = Record::from_rdata(name, self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        record
    }

    /// A record for `name` from a stored address.
    pub fn a(&self, name: &Name, target: &str) -> Result<Record, DnsError> {
        let ip: Ipv4Addr = target
            .parse()
            .map_err(|_| DnsError::InvalidAddress(target.to_string()))?;
        Ok(self.record(name.clone(), RData::A(A(ip))))
    }

    /// SRV record for `name` from a stored `host:port` target.
    ///
    /// Priority and weight are always zero; clients pick among targets.
    pub fn srv(&self, name: &Name, target: &str) -> Result<Record, DnsError> {
        let (host, port) = split_host_port(target)?;
        let host = Name::from_ascii(host).map_err(|_| DnsError::InvalidTarget {
            target: target.to_string(),
            reason: "invalid host name",
        })?;
        Ok(self.record(name.clone(), RData::SRV(SRV::new(0, 0, port, host))))
    }

    /// SOA record owned by `name`. The minimum field carries the record TTL.
    pub fn soa(&self, name: &Name) -> Record {
        let soa = SOA::new(
            self.mname.clone(),
            self.rname.clone(),
            self.serial,
            self.refresh as i32,
            self.retry as i32,
            self.expire as i32,
            self.ttl,
        );
        self.record(name.clone(), RData::SOA(soa))
    }

    /// NS record owned by `name`, pointing at the primary nameserver.
    pub fn ns(&self, name: &Name) -> Record {
        self.record(name.clone(), RData::NS(NS(self.mname.clone())))
    }
}
