//! In-memory record store fed by orchestration events.
//!
//! Two independent indices, both keyed by lowercase fully-qualified name:
//! - A index: `<name>` -> IPv4 address strings
//! - SRV index: `<name>` -> `host:port` targets
//!
//! Values are stored as received; they are validated when a query turns them
//! into resource records, so one bad entry only costs its own record.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::records::split_host_port;

/// Everything one query needs from the store, read under a single lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameRecords {
    /// A index entries for the name.
    pub a: BTreeSet<String>,
    /// SRV index entries for the name.
    pub srv: BTreeSet<String>,
    /// First A address of each SRV target host that has one.
    pub glue: HashMap<String, String>,
}

impl NameRecords {
    /// True when the name has at least one A or SRV entry.
    pub fn exists(&self) -> bool {
        !self.a.is_empty() || !self.srv.is_empty()
    }
}

/// Thread-safe in-memory record store.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    inner: Arc<RwLock<RecordStoreInner>>,
}

#[derive(Debug, Default)]
struct RecordStoreInner {
    /// name -> IPv4 addresses
    a: HashMap<String, BTreeSet<String>>,

    /// name -> `host:port` targets
    srv: HashMap<String, BTreeSet<String>>,
}

impl RecordStoreInner {
    fn first_a(&self, name: &str) -> Option<String> {
        self.a.get(name).and_then(|ips| ips.first().cloned())
    }
}

/// Lowercase `name` and make sure it ends with a dot.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.trim().to_ascii_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

fn insert(index: &mut HashMap<String, BTreeSet<String>>, name: String, value: &str) -> bool {
    index.entry(name).or_default().insert(value.to_string())
}

fn remove(index: &mut HashMap<String, BTreeSet<String>>, name: &str, value: &str) -> bool {
    let Some(values) = index.get_mut(name) else {
        return false;
    };
    let removed = values.remove(value);
    if values.is_empty() {
        index.remove(name);
    }
    removed
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an A entry. Returns false if it was already present.
    pub fn add_a(&self, name: &str, ip: &str) -> bool {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        let added = insert(&mut inner.a, name.clone(), ip);
        if added {
            debug!(%name, ip, "added A record");
        }
        added
    }

    /// Add an SRV target (`host:port`). Returns false if it was already present.
    pub fn add_srv(&self, name: &str, target: &str) -> bool {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        let added = insert(&mut inner.srv, name.clone(), target);
        if added {
            debug!(%name, target, "added SRV record");
        }
        added
    }

    /// Remove one A entry. Returns false if it was not present.
    pub fn remove_a(&self, name: &str, ip: &str) -> bool {
        let name = normalize_name(name);
        let removed = remove(&mut self.inner.write().a, &name, ip);
        if removed {
            debug!(%name, ip, "removed A record");
        }
        removed
    }

    /// Remove one SRV target. Returns false if it was not present.
    pub fn remove_srv(&self, name: &str, target: &str) -> bool {
        let name = normalize_name(name);
        let removed = remove(&mut self.inner.write().srv, &name, target);
        if removed {
            debug!(%name, target, "removed SRV record");
        }
        removed
    }

    /// Drop every A and SRV entry for a name.
    pub fn remove_name(&self, name: &str) -> bool {
        let name = normalize_name(name);
        let mut inner = self.inner.write();
        let had_a = inner.a.remove(&name).is_some();
        let had_srv = inner.srv.remove(&name).is_some();
        if had_a || had_srv {
            debug!(%name, "removed all records");
        }
        had_a || had_srv
    }

    /// A entries for a name. Empty if the name is unknown.
    pub fn lookup_a(&self, name: &str) -> BTreeSet<String> {
        let name = normalize_name(name);
        self.inner.read().a.get(&name).cloned().unwrap_or_default()
    }

    /// SRV targets for a name. Empty if the name is unknown.
    pub fn lookup_srv(&self, name: &str) -> BTreeSet<String> {
        let name = normalize_name(name);
        self.inner.read().srv.get(&name).cloned().unwrap_or_default()
    }

    /// One address for the name, always the same one for the same set.
    pub fn first_a(&self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        self.inner.read().first_a(&name)
    }

    /// Check if the name has any A or SRV entry.
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        let inner = self.inner.read();
        inner.a.contains_key(&name) || inner.srv.contains_key(&name)
    }

    /// Read the A set, SRV set and SRV glue for a name in one consistent view.
    pub fn snapshot(&self, name: &str) -> NameRecords {
        let name = normalize_name(name);
        let inner = self.inner.read();

        let a = inner.a.get(&name).cloned().unwrap_or_default();
        let srv = inner.srv.get(&name).cloned().unwrap_or_default();

        let mut glue = HashMap::new();
        for target in &srv {
            let Ok((host, _)) = split_host_port(target) else {
                continue;
            };
            let host = normalize_name(host);
            if glue.contains_key(&host) {
                continue;
            }
            if let Some(ip) = inner.first_a(&host) {
                glue.insert(host, ip);
            }
        }

        NameRecords { a, srv, glue }
    }

    /// Number of names with at least one A entry.
    pub fn a_names(&self) -> usize {
        self.inner.read().a.len()
    }

    /// Number of names with at least one SRV target.
    pub fn srv_names(&self) -> usize {
        self.inner.read().srv.len()
    }

    /// Emit current store metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_store_counts(inner.a.len(), inner.srv.len());
    }
}
