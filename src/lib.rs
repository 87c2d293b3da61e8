//! Cluster DNS - service discovery for an orchestrated cluster.
//!
//! This crate provides a DNS server that answers authoritatively for one
//! cluster domain out of an in-memory record store, and forwards every other
//! name to upstream resolvers. The store is kept current by orchestration
//! events as tasks come and go.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         cluster-dns                            │
//! │                                                                │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │  RecordWatcher   │───▶│   RecordStore    │                  │
//! │  │ (record events)  │    │   (A + SRV)      │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │                                   ▼                            │
//! │                          ┌──────────────────┐                  │
//! │                          │ ClusterAuthority │                  │
//! │                          └────────┬─────────┘                  │
//! │                                   ▼                            │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │    Forwarder     │◀───│    DnsHandler    │◀── UDP/TCP       │
//! │  │ (upstreams)      │    │ (truncation)     │                  │
//! │  └──────────────────┘    └──────────────────┘                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web.swan.     SRV → one SRV per `host:port` target, glue A per host
//! web.swan.     A   → one A per stored address
//! ghost.swan.   A   → NXDOMAIN + SOA
//! example.com.  *   → forwarded, reply relayed with the client's id
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use cluster_dns::{DnsServer, RecordStore, ZoneConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RecordStore::new();
//!     store.add_a("web.swan.", "10.0.0.1");
//!
//!     let config = ZoneConfig::new("swan.", "127.0.0.1:5353".parse().unwrap());
//!     let handle = DnsServer::new(config, store).start();
//!     let addr = handle.wait_running().await;
//!     // ...
//!     handle.shutdown().await;
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod events;
pub mod forward;
pub mod handler;
pub mod metrics;
pub mod records;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod truncate;

// Re-export main types
pub use authority::ClusterAuthority;
pub use config::{Config, EventsConfig, SoaConfig, StaticRecords, TelemetryConfig, ZoneConfig};
pub use error::{DnsError, ForwardError, MultiError};
pub use events::{RecordEvent, RecordWatcher, TaskRecord};
pub use forward::{Exchanger, Forwarder};
pub use handler::DnsHandler;
pub use server::{DnsServer, ServerHandle, ServerState};
pub use state::RecordStore;
