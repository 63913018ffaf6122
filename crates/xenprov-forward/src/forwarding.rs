//! Forwarding implementation
//!
//! Listens on an ephemeral local port and relays every accepted connection to
//! a fixed remote target. Each connection runs in its own task; a failure in
//! one (remote unreachable, handshake rejected, relay I/O error) is logged and
//! never stops the listener.

use crate::address::join_host_port;
use crate::wrapper::{ConnectionWrapper, HandshakeError};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Invalid remote target: {0}")]
    InvalidTarget(String),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check that the interface exists and ephemeral ports are available\n  • Try binding to a different interface")]
    Bind { address: String, reason: String },

    #[error("Forwarding is already started")]
    AlreadyStarted,

    #[error("Forwarding is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection failures. Logged by the relay task, never propagated.
#[derive(Debug, Error)]
enum RelayError {
    #[error("failed to connect to remote: {0}")]
    Connect(std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("transport error: {0}")]
    Transport(std::io::Error),
}

/// The fixed endpoint every accepted connection is relayed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_host_port(&self.host, self.port))
    }
}

/// Simple connection ID generator for logging
#[derive(Clone)]
pub(crate) struct ConnectionIdGenerator {
    next_id: Arc<AtomicU64>,
}

impl ConnectionIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn generate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared read-only by the accept task and every relay task
struct RelayContext {
    remote: RemoteTarget,
    wrapper: Arc<dyn ConnectionWrapper>,
    handshake_timeout: Duration,
    ids: ConnectionIdGenerator,
}

/// A local endpoint tunnelling to a remote, handshake-gated service.
///
/// Created idle; [`Forwarding::start`] binds the listener and
/// [`Forwarding::close`] tears everything down. Dropping a started
/// forwarding closes it.
pub struct Forwarding {
    remote: RemoteTarget,
    wrapper: Arc<dyn ConnectionWrapper>,
    bind_ip: IpAddr,
    max_connections: Option<usize>,
    handshake_timeout: Duration,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    closed: bool,
}

impl Forwarding {
    /// Configure a forwarding to `remote_host:remote_port`. Opens no socket.
    pub fn new<W>(
        remote_host: impl Into<String>,
        remote_port: u16,
        wrapper: W,
    ) -> Result<Self, ForwardError>
    where
        W: ConnectionWrapper,
    {
        Self::with_shared_wrapper(remote_host, remote_port, Arc::new(wrapper))
    }

    pub fn with_shared_wrapper(
        remote_host: impl Into<String>,
        remote_port: u16,
        wrapper: Arc<dyn ConnectionWrapper>,
    ) -> Result<Self, ForwardError> {
        let remote_host = remote_host.into();
        if remote_host.trim().is_empty() {
            return Err(ForwardError::InvalidTarget(
                "remote host must not be empty".to_string(),
            ));
        }
        if remote_port == 0 {
            return Err(ForwardError::InvalidTarget(format!(
                "remote port for {} must be between 1 and 65535",
                remote_host
            )));
        }

        Ok(Self {
            remote: RemoteTarget {
                host: remote_host,
                port: remote_port,
            },
            wrapper,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_connections: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            local_addr: None,
            shutdown: CancellationToken::new(),
            accept_task: None,
            closed: false,
        })
    }

    /// Interface to listen on (default loopback)
    pub fn with_bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    /// Cap on concurrently relayed connections. Unbounded when unset.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections.max(1));
        self
    }

    /// Upper bound on how long the wrapper may take per connection
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn remote_host(&self) -> &str {
        &self.remote.host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote.port
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Local host to show the operator; empty before a successful start
    pub fn service_host(&self) -> String {
        self.local_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Local port to show the operator; zero before a successful start
    pub fn service_port(&self) -> u16 {
        self.local_addr.map(|addr| addr.port()).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some() && !self.closed
    }

    /// Bind an ephemeral port and start accepting connections.
    ///
    /// Returns the bound local address.
    pub async fn start(&mut self) -> Result<SocketAddr, ForwardError> {
        if self.closed {
            return Err(ForwardError::Closed);
        }
        if self.accept_task.is_some() {
            return Err(ForwardError::AlreadyStarted);
        }

        let bind_addr = SocketAddr::new(self.bind_ip, 0);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ForwardError::Bind {
                address: bind_addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        info!(
            local_addr = %local_addr,
            remote = %self.remote,
            "Forwarding listening"
        );

        let context = Arc::new(RelayContext {
            remote: self.remote.clone(),
            wrapper: self.wrapper.clone(),
            handshake_timeout: self.handshake_timeout,
            ids: ConnectionIdGenerator::new(),
        });
        let limiter = self.max_connections.map(|n| Arc::new(Semaphore::new(n)));
        let shutdown = self.shutdown.clone();

        self.accept_task = Some(tokio::spawn(async move {
            accept_loop(listener, context, limiter, shutdown).await
        }));

        Ok(local_addr)
    }

    /// Stop accepting, release the listener and terminate in-flight relays.
    ///
    /// Never blocks and never fails; repeated calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.cancel();

        if let Some(task) = self.accept_task.take() {
            task.abort();
            info!(remote = %self.remote, "Forwarding closed");
        }
    }
}

impl Drop for Forwarding {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Forwarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forwarding")
            .field("remote", &self.remote)
            .field("bind_ip", &self.bind_ip)
            .field("local_addr", &self.local_addr)
            .field("max_connections", &self.max_connections)
            .field("closed", &self.closed)
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<RelayContext>,
    limiter: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = match &limiter {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => permit,
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                }
            }
            None => None,
        };

        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((inbound, peer_addr)) => {
                let context = context.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    let _permit = permit;
                    context.handle_connection(inbound, peer_addr, token).await;
                });
            }
            Err(e) => {
                // Closing the listener is a normal way out
                if shutdown.is_cancelled() {
                    break;
                }
                warn!(error = %e, "Failed to accept connection");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!(remote = %context.remote, "Accept loop stopped");
}

impl RelayContext {
    async fn handle_connection(
        &self,
        inbound: TcpStream,
        peer_addr: SocketAddr,
        shutdown: CancellationToken,
    ) {
        let connection_id = self.ids.generate();
        debug!(
            connection_id,
            peer_addr = %peer_addr,
            remote = %self.remote,
            "Accepted connection"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(connection_id, "Connection terminated by shutdown");
            }
            result = self.relay(connection_id, inbound) => {
                match result {
                    Ok((to_remote, to_client)) => {
                        debug!(
                            connection_id,
                            bytes_to_remote = to_remote,
                            bytes_to_client = to_client,
                            "Connection closed"
                        );
                    }
                    Err(RelayError::Transport(e)) => {
                        debug!(connection_id, error = %e, "Relay ended with transport error");
                    }
                    Err(e) => {
                        warn!(
                            connection_id,
                            peer_addr = %peer_addr,
                            remote = %self.remote,
                            error = %e,
                            "Dropping connection"
                        );
                    }
                }
            }
        }
    }

    /// Connect, wrap, then copy until either side closes.
    ///
    /// Returns (bytes_to_remote, bytes_to_client). Both sockets are dropped
    /// on every exit path.
    async fn relay(
        &self,
        connection_id: u64,
        mut inbound: TcpStream,
    ) -> Result<(u64, u64), RelayError> {
        let outbound = TcpStream::connect((self.remote.host.as_str(), self.remote.port))
            .await
            .map_err(RelayError::Connect)?;
        if let Err(e) = outbound.set_nodelay(true) {
            debug!(connection_id, error = %e, "Failed to set TCP_NODELAY on remote socket");
        }

        let mut remote = tokio::time::timeout(self.handshake_timeout, self.wrapper.wrap(outbound))
            .await
            .map_err(|_| HandshakeError::Timeout(self.handshake_timeout))??;

        tokio::io::copy_bidirectional(&mut inbound, remote.as_mut())
            .await
            .map_err(RelayError::Transport)
    }
}
