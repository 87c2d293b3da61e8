//! DNS server setup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::authority::ClusterAuthority;
use crate::config::ZoneConfig;
use crate::error::DnsError;
use crate::forward::Forwarder;
use crate::handler::DnsHandler;
use crate::state::RecordStore;

/// Interval for emitting store metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit store metrics.
async fn metrics_loop(store: RecordStore, token: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(
                    a_names = store.a_names(),
                    srv_names = store.srv_names(),
                    "emitted store metrics"
                );
            }
            _ = token.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Lifecycle of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not serving; either never started or shut down.
    Stopped,
    /// Binding listeners.
    Starting,
    /// Serving queries.
    Running {
        /// Address the datagram listener is bound to.
        local_addr: SocketAddr,
    },
    /// Shutdown requested, listeners closing.
    Stopping,
}

/// Handle to a server started with [`DnsServer::start`].
pub struct ServerHandle {
    token: CancellationToken,
    errors: mpsc::Receiver<DnsError>,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Request shutdown. Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Fatal server errors, such as a failed bind.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<DnsError> {
        &mut self.errors
    }

    /// Wait until the server is serving and return its bound address, or
    /// `None` if it stopped first.
    pub async fn wait_running(&self) -> Option<SocketAddr> {
        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                ServerState::Running { local_addr } => return Some(local_addr),
                ServerState::Stopped | ServerState::Stopping => return None,
                ServerState::Starting => {}
            }
            state.changed().await.ok()?;
        }
    }

    /// Request shutdown and wait for the server task to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!("DNS server task failed: {}", e);
        }
    }
}

/// DNS server for the cluster domain backed by a [`RecordStore`].
pub struct DnsServer {
    config: ZoneConfig,
    store: RecordStore,
    forwarder: Option<Forwarder>,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration and store.
    pub fn new(config: ZoneConfig, store: RecordStore) -> Self {
        Self {
            config,
            store,
            forwarder: None,
        }
    }

    /// Use `forwarder` instead of one built from the configured resolvers.
    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Get a reference to the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Get a reference to the zone configuration.
    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    /// Start serving in the background and return immediately.
    ///
    /// Startup failures are delivered on [`ServerHandle::errors`].
    pub fn start(self) -> ServerHandle {
        let token = CancellationToken::new();
        let (error_tx, errors) = mpsc::channel(16);
        let (state_tx, state) = watch::channel(ServerState::Starting);

        let task = tokio::spawn({
            let token = token.clone();
            async move {
                if let Err(e) = self.serve(token, &state_tx).await {
                    error!("DNS server error: {}", e);
                    let _ = error_tx.send(e).await;
                }
                state_tx.send_replace(ServerState::Stopped);
            }
        });

        ServerHandle {
            token,
            errors,
            state,
            task,
        }
    }

    /// Run the DNS server until the token is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), DnsError> {
        let (state_tx, _) = watch::channel(ServerState::Starting);
        let result = self.serve(token, &state_tx).await;
        state_tx.send_replace(ServerState::Stopped);
        result
    }

    async fn serve(
        self,
        token: CancellationToken,
        state: &watch::Sender<ServerState>,
    ) -> Result<(), DnsError> {
        state.send_replace(ServerState::Starting);
        self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            domain = %self.config.domain,
            resolvers = ?self.config.resolvers,
            "Starting cluster-dns server"
        );

        let authority = Arc::new(ClusterAuthority::new(&self.config, self.store.clone())?);
        let forwarder = match self.forwarder {
            Some(forwarder) => forwarder,
            None => Forwarder::from_config(&self.config)?,
        };
        if forwarder.upstreams().is_empty() {
            info!("no upstream resolvers, out-of-zone queries are refused");
        } else {
            info!(upstreams = ?forwarder.upstreams(), "forwarding out-of-zone queries");
        }
        let origin = authority.origin().clone();
        let handler = DnsHandler::new(authority, forwarder, self.config.recurse_on);

        let mut server = ServerFuture::new(handler);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        let local_addr = udp_socket.local_addr()?;
        info!(addr = %local_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP on the same port
        if self.config.tcp {
            let tcp_listener = TcpListener::bind(local_addr).await?;
            info!(addr = %local_addr, "DNS TCP listening");
            server.register_listener(tcp_listener, TCP_TIMEOUT);
        }

        state.send_replace(ServerState::Running { local_addr });
        info!(zone = %origin, "DNS server ready to serve queries");

        // Start metrics loop
        self.store.emit_metrics();
        let metrics_token = token.child_token();
        let metrics_handle = tokio::spawn(metrics_loop(self.store.clone(), metrics_token.clone()));

        let result = tokio::select! {
            _ = token.cancelled() => {
                info!("DNS server shutdown requested");
                Ok(())
            }
            result = server.block_until_done() => result,
        };

        state.send_replace(ServerState::Stopping);
        // Dropping the server aborts its listener tasks and closes the sockets.
        drop(server);

        metrics_token.cancel();
        let _ = metrics_handle.await;

        info!("DNS server stopped");
        result.map_err(DnsError::from)
    }
}
