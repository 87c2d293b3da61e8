//! cluster-dns binary entry point.

use clap::Parser;
use cluster_dns::events;
use cluster_dns::{telemetry, Config, DnsServer, RecordStore};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Capacity of the record event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Service-discovery DNS server for an orchestrated cluster.
#[derive(Parser, Debug)]
#[command(name = "cluster-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "cluster-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("CLUSTER_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        domain = %config.dns.domain,
        resolvers = ?config.dns.resolvers,
        "Starting cluster-dns"
    );

    let store = RecordStore::new();
    config.records.seed(&store);
    info!(
        a_names = store.a_names(),
        srv_names = store.srv_names(),
        "Seeded static records"
    );

    // Setup graceful shutdown
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            token.cancel();
        }
    });

    // Record events
    let (events_tx, watcher) = events::channel(store.clone(), EVENT_CHANNEL_CAPACITY);
    let watcher_handle = tokio::spawn(watcher.run(token.clone()));
    let feed_handle = match config.events.listen_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            Some(tokio::spawn(events::serve_feed(listener, events_tx, token.clone())))
        }
        None => {
            info!("No record event feed configured, serving static records only");
            drop(events_tx);
            None
        }
    };

    // Run DNS server
    let server = DnsServer::new(config.dns, store);
    let result = server.run(token.clone()).await;

    token.cancel();
    if let Some(feed_handle) = feed_handle {
        let _ = feed_handle.await;
    }
    let _ = watcher_handle.await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("cluster-dns shutdown complete");
    Ok(())
}
