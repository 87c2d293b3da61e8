//! Authoritative answers for the cluster domain.

use std::borrow::Cow;
use std::collections::HashSet;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{LowerName, Name, Record, RecordType};
use tracing::{debug, trace, warn};

use crate::config::ZoneConfig;
use crate::error::{DnsError, MultiError};
use crate::metrics::{self, QueryResult};
use crate::records::{split_host_port, RecordFormatter};
use crate::state::{normalize_name, NameRecords, RecordStore};

/// Strip the `.*` wildcard marker some service clients append to names
/// (`foo.*.bar.` is looked up as `foo.bar.`). Only this exact substring is
/// handled; standard `*.` wildcards are not expanded.
pub fn clean_wild(name: &str) -> Cow<'_, str> {
    if name.contains(".*") {
        Cow::Owned(name.replace(".*", ""))
    } else {
        Cow::Borrowed(name)
    }
}

/// The state of one query while its reply is assembled.
#[derive(Debug)]
pub struct QueryContext {
    /// Question name as received.
    pub name: Name,
    /// Question type.
    pub query_type: RecordType,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Authority section.
    pub authority: Vec<Record>,
    /// Additional (glue) section.
    pub additionals: Vec<Record>,
    /// Response code of the reply.
    pub response_code: ResponseCode,
    /// Records that could not be formatted.
    pub errors: MultiError,
}

impl QueryContext {
    fn new(name: Name, query_type: RecordType) -> Self {
        Self {
            name,
            query_type,
            answers: Vec::new(),
            authority: Vec::new(),
            additionals: Vec::new(),
            response_code: ResponseCode::NoError,
            errors: MultiError::new(),
        }
    }

    /// Outcome of the query for metrics.
    pub fn result(&self) -> QueryResult {
        if !self.answers.is_empty() {
            QueryResult::Success
        } else if self.response_code == ResponseCode::NXDomain {
            QueryResult::NxDomain
        } else {
            QueryResult::NoData
        }
    }
}

/// Answers queries under the cluster domain from the record store.
pub struct ClusterAuthority {
    origin: LowerName,
    store: RecordStore,
    formatter: RecordFormatter,
}

impl ClusterAuthority {
    /// Create a new authority for the given configuration and store.
    pub fn new(config: &ZoneConfig, store: RecordStore) -> Result<Self, DnsError> {
        Ok(Self {
            origin: config.origin()?.into(),
            store,
            formatter: RecordFormatter::new(config)?,
        })
    }

    /// The zone this authority answers for.
    pub fn origin(&self) -> &LowerName {
        &self.origin
    }

    /// Check whether `name` is the zone apex or below it.
    pub fn is_authoritative(&self, name: &LowerName) -> bool {
        self.origin.zone_of(name)
    }

    /// Build the answer, authority and additional sections for a question.
    pub fn resolve(&self, name: &Name, query_type: RecordType) -> QueryContext {
        let mut ctx = QueryContext::new(name.clone(), query_type);
        let lookup = normalize_name(&clean_wild(&name.to_ascii()));
        let records = self.store.snapshot(&lookup);

        trace!(name = %lookup, qtype = ?query_type, "authoritative lookup");

        match query_type {
            RecordType::SRV => self.handle_srv(&mut ctx, &records),
            RecordType::A => self.handle_a(&mut ctx, &lookup, &records),
            RecordType::SOA => self.handle_soa(&mut ctx),
            RecordType::NS => self.handle_ns(&mut ctx),
            RecordType::ANY => {
                self.handle_srv(&mut ctx, &records);
                self.handle_a(&mut ctx, &lookup, &records);
                self.handle_soa(&mut ctx);
                self.handle_ns(&mut ctx);
            }
            _ => {}
        }

        if ctx.answers.is_empty() {
            self.handle_empty(&mut ctx, &records);
        }

        if !ctx.errors.is_empty() {
            metrics::record_format_errors(ctx.errors.len());
            warn!(name = %lookup, errors = %ctx.errors, "skipped malformed records");
        }

        debug!(
            name = %lookup,
            qtype = ?query_type,
            rcode = ?ctx.response_code,
            answers = ctx.answers.len(),
            additionals = ctx.additionals.len(),
            "resolved"
        );

        ctx
    }

    /// One SRV answer per target, plus one glue A record per distinct host.
    fn handle_srv(&self, ctx: &mut QueryContext, records: &NameRecords) {
        let mut glued = HashSet::new();

        for target in &records.srv {
            match self.formatter.srv(&ctx.name, target) {
                Ok(record) => ctx.answers.push(record),
                Err(e) => {
                    ctx.errors.push(e);
                    continue;
                }
            }

            let Ok((host, _)) = split_host_port(target) else {
                continue;
            };
            let host = normalize_name(host);
            if glued.contains(&host) {
                continue;
            }
            let Some(ip) = records.glue.get(&host) else {
                continue;
            };

            let glue = Name::from_ascii(&host)
                .map_err(DnsError::from)
                .and_then(|owner| self.formatter.a(&owner, ip));
            match glue {
                Ok(record) => {
                    ctx.additionals.push(record);
                    glued.insert(host);
                }
                Err(e) => ctx.errors.push(e),
            }
        }
    }

    /// One A answer per stored address, owned by the cleaned name.
    fn handle_a(&self, ctx: &mut QueryContext, lookup: &str, records: &NameRecords) {
        if records.a.is_empty() {
            return;
        }
        let owner = match Name::from_ascii(lookup) {
            Ok(owner) => owner,
            Err(e) => {
                ctx.errors.push(e);
                return;
            }
        };

        for ip in &records.a {
            match self.formatter.a(&owner, ip) {
                Ok(record) => ctx.answers.push(record),
                Err(e) => ctx.errors.push(e),
            }
        }
    }

    fn handle_soa(&self, ctx: &mut QueryContext) {
        ctx.authority.push(self.formatter.soa(&ctx.name));
    }

    fn handle_ns(&self, ctx: &mut QueryContext) {
        ctx.authority.push(self.formatter.ns(&ctx.name));
    }

    /// Decide between NOERROR (NODATA) and NXDOMAIN for an empty answer.
    ///
    /// SOA and NS replies already carry their record in the authority
    /// section. An empty SRV set is a valid answer. A name that holds any A
    /// or SRV record exists, so other types get NODATA rather than a
    /// cacheable NXDOMAIN. AAAA is not served at all and always gets NODATA.
    fn handle_empty(&self, ctx: &mut QueryContext, records: &NameRecords) {
        match ctx.query_type {
            RecordType::SOA | RecordType::NS => return,
            RecordType::SRV => {}
            qtype => {
                ctx.response_code = if qtype == RecordType::AAAA || records.exists() {
                    ResponseCode::NoError
                } else {
                    ResponseCode::NXDomain
                };
            }
        }

        ctx.authority.push(self.formatter.soa(&ctx.name));
    }
}
