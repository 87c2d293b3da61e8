//! Orchestration events that keep the record store current.
//!
//! Events arrive as newline-delimited JSON, one object per line, tagged by
//! `op`:
//!
//! ```text
//! {"op":"register","name":"web.swan.","ip":"10.0.0.1","port":8080}
//! {"op":"remove_a","name":"web.swan.","ip":"10.0.0.1"}
//! {"op":"remove_name","name":"web.swan."}
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DnsError;
use crate::metrics;
use crate::state::{normalize_name, RecordStore};

/// A running task as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Service name the task answers under.
    pub name: String,
    /// Task IPv4 address.
    pub ip: String,
    /// Service port, if the task exposes one.
    #[serde(default)]
    pub port: Option<u16>,
}

impl TaskRecord {
    /// SRV target pointing back at the task's own name.
    fn srv_target(&self) -> Option<String> {
        self.port
            .map(|port| format!("{}:{port}", normalize_name(&self.name)))
    }
}

/// One change to the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordEvent {
    /// Add an address to a name.
    AddA {
        /// Record name.
        name: String,
        /// IPv4 address.
        ip: String,
    },
    /// Add a `host:port` target to a name.
    AddSrv {
        /// Record name.
        name: String,
        /// `host:port` target.
        target: String,
    },
    /// Remove one address from a name.
    RemoveA {
        /// Record name.
        name: String,
        /// IPv4 address.
        ip: String,
    },
    /// Remove one target from a name.
    RemoveSrv {
        /// Record name.
        name: String,
        /// `host:port` target.
        target: String,
    },
    /// Drop every A and SRV entry of a name.
    RemoveName {
        /// Record name.
        name: String,
    },
    /// A task came up: A record, plus an SRV target when it has a port.
    Register(TaskRecord),
    /// A task went away: drop exactly what `Register` added.
    Deregister(TaskRecord),
}

impl RecordEvent {
    fn kind(&self) -> &'static str {
        match self {
            RecordEvent::AddA { .. } => "add_a",
            RecordEvent::AddSrv { .. } => "add_srv",
            RecordEvent::RemoveA { .. } => "remove_a",
            RecordEvent::RemoveSrv { .. } => "remove_srv",
            RecordEvent::RemoveName { .. } => "remove_name",
            RecordEvent::Register(_) => "register",
            RecordEvent::Deregister(_) => "deregister",
        }
    }
}

/// Apply one event. Returns true if the store changed.
pub fn apply(store: &RecordStore, event: &RecordEvent) -> bool {
    metrics::record_event(event.kind());

    match event {
        RecordEvent::AddA { name, ip } => store.add_a(name, ip),
        RecordEvent::AddSrv { name, target } => store.add_srv(name, target),
        RecordEvent::RemoveA { name, ip } => store.remove_a(name, ip),
        RecordEvent::RemoveSrv { name, target } => store.remove_srv(name, target),
        RecordEvent::RemoveName { name } => store.remove_name(name),
        RecordEvent::Register(task) => {
            let mut changed = store.add_a(&task.name, &task.ip);
            if let Some(target) = task.srv_target() {
                changed |= store.add_srv(&task.name, &target);
            }
            changed
        }
        RecordEvent::Deregister(task) => {
            let mut changed = store.remove_a(&task.name, &task.ip);
            if let Some(target) = task.srv_target() {
                changed |= store.remove_srv(&task.name, &target);
            }
            changed
        }
    }
}

/// Applies events from a channel to the store.
pub struct RecordWatcher {
    rx: mpsc::Receiver<RecordEvent>,
    store: RecordStore,
}

/// Create a bounded event channel feeding a watcher for `store`.
pub fn channel(store: RecordStore, capacity: usize) -> (mpsc::Sender<RecordEvent>, RecordWatcher) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, RecordWatcher::new(rx, store))
}

impl RecordWatcher {
    /// Create a watcher reading from `rx`.
    pub fn new(rx: mpsc::Receiver<RecordEvent>, store: RecordStore) -> Self {
        Self { rx, store }
    }

    /// Apply events until every sender is dropped or `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!("record watcher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("record watcher shutting down");
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        debug!("record event channel closed");
                        break;
                    };
                    let changed = apply(&self.store, &event);
                    debug!(?event, changed, "applied record event");
                }
            }
        }
        self.store.emit_metrics();
        info!("record watcher stopped");
    }
}

/// Decode one feed line.
pub fn decode(line: &str) -> Result<RecordEvent, DnsError> {
    Ok(serde_json::from_str(line)?)
}

/// Send every event read from `reader` to the watcher until end of input.
///
/// Blank lines are ignored; lines that do not decode are logged and skipped.
/// Returns the number of events sent.
pub async fn read_feed<R>(reader: R, tx: &mpsc::Sender<RecordEvent>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match decode(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping record event");
                metrics::record_event("invalid");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            debug!("record watcher gone, closing feed");
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

/// Accept feed connections on `listener` until `token` is cancelled.
///
/// Each connection streams events until it closes.
pub async fn serve_feed(listener: TcpListener, tx: mpsc::Sender<RecordEvent>, token: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "record event feed listening"),
        Err(e) => warn!(error = %e, "record event feed listening on unknown address"),
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept feed connection");
                    continue;
                }
            },
        };

        debug!(%peer, "record feed connected");
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = read_feed(BufReader::new(stream), &tx) => match result {
                    Ok(count) => debug!(%peer, count, "record feed closed"),
                    Err(e) => warn!(%peer, error = %e, "record feed failed"),
                },
            }
        });
    }

    info!("record event feed stopped");
}
