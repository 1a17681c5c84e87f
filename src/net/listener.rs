//! SNI-routed TCP listener.
//!
//! # Responsibilities
//! - Bind and accept with a bounded number of live connections
//! - Learn the SNI, by terminating TLS or by sniffing the ClientHello
//! - Resolve the TCP domain and its destination
//! - Stream bytes both ways, over TLS to the backend when configured

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ServerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::Instrument;

use crate::config::schema::{Protocol, TcpConfig, TcpMode};
use crate::load_balancer::destination::Destination;
use crate::net::connection::ConnectionTracker;
use crate::net::sni::{ClientHelloSniffer, Sniffed, MAX_SNIFF_BYTES, SNIFF_TIMEOUT};
use crate::net::stream::{pipe, Transferred};
use crate::net::tls::{server_name, TlsError};
use crate::observability::metrics;
use crate::registry::Gateway;
use crate::routing::matcher::normalize_host;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to accept: {0}")]
    Accept(io::Error),

    #[error("connection limit closed")]
    Closed,

    #[error("terminate mode needs a [tls] section")]
    MissingTls,
}

/// Why a TCP connection was dropped before or while streaming.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("client handshake failed: {0}")]
    Handshake(io::Error),

    #[error("client handshake timed out")]
    HandshakeTimeout,

    #[error("client sent no SNI")]
    MissingSni,

    #[error("first bytes are not a TLS ClientHello")]
    NotTls,

    #[error("no TCP domain for `{0}`")]
    UnknownHost(String),

    #[error("domain `{0}` is disabled")]
    Disabled(String),

    #[error("domain `{0}` has no `/` route")]
    NoRoute(String),

    #[error("no destination available for `{0}`")]
    NoDestination(String),

    #[error("connect to `{dest}` failed: {source}")]
    Connect { dest: String, source: io::Error },

    #[error("connect to `{0}` timed out")]
    ConnectTimeout(String),

    #[error("backend handshake with `{dest}` failed: {source}")]
    BackendHandshake { dest: String, source: io::Error },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

impl RouteError {
    /// Label for `gateway_tcp_connections_total`.
    pub fn outcome(&self) -> &'static str {
        match self {
            RouteError::Handshake(_) | RouteError::HandshakeTimeout => "handshake_failed",
            RouteError::MissingSni | RouteError::NotTls => "no_sni",
            RouteError::UnknownHost(_) | RouteError::Disabled(_) | RouteError::NoRoute(_) => "unrouted",
            RouteError::NoDestination(_) => "no_destination",
            RouteError::Connect { .. } | RouteError::ConnectTimeout(_) | RouteError::BackendHandshake { .. } => {
                "backend_failed"
            }
            RouteError::Tls(_) | RouteError::Io(_) => "stream_error",
        }
    }
}

/// A TCP listener that limits concurrent connections.
///
/// A semaphore permit is taken before each accept, so at the limit new
/// connections wait in the kernel backlog.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(addr: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections.max(1))),
            max_connections,
        })
    }

    /// Accept a connection. The permit must live as long as the connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );
        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Routes TLS connections to TCP domains by SNI.
pub struct TcpRouter {
    gateway: Arc<Gateway>,
    mode: TcpMode,
    acceptor: Option<TlsAcceptor>,
    connector: TlsConnector,
    connect_timeout: Duration,
    sniffer: ClientHelloSniffer,
    tracker: ConnectionTracker,
}

impl TcpRouter {
    pub fn new(
        gateway: Arc<Gateway>,
        config: &TcpConfig,
        server_tls: Option<Arc<ServerConfig>>,
        client_tls: Arc<ClientConfig>,
    ) -> Result<Self, ListenerError> {
        let acceptor = match config.mode {
            TcpMode::Terminate => Some(TlsAcceptor::from(server_tls.ok_or(ListenerError::MissingTls)?)),
            TcpMode::Passthrough => None,
        };
        Ok(Self {
            gateway,
            mode: config.mode,
            acceptor,
            connector: TlsConnector::from(client_tls),
            connect_timeout: config.connect_timeout(),
            sniffer: ClientHelloSniffer::new(SNIFF_TIMEOUT, MAX_SNIFF_BYTES),
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept until shutdown, then give open streams a moment to finish.
    pub async fn run(self: Arc<Self>, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, mode = ?self.mode, "TCP router starting");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);
                        let router = Arc::clone(&self);
                        tokio::spawn(
                            async move {
                                router.handle(stream, peer).await;
                                drop(guard);
                                drop(permit);
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("TCP router received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        drop(listener);
        if !self.tracker.drain(DRAIN_TIMEOUT).await {
            tracing::warn!(open = self.tracker.active_count(), "TCP streams still open after drain timeout");
        }
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let result = match &self.acceptor {
            Some(acceptor) => self.terminate(acceptor, stream, peer).await,
            None => self.passthrough(stream, peer).await,
        };

        match result {
            Ok(moved) => {
                metrics::record_tcp_connection("ok");
                tracing::debug!(
                    sent = moved.client_to_backend,
                    received = moved.backend_to_client,
                    "Stream closed"
                );
            }
            Err(e) => {
                metrics::record_tcp_connection(e.outcome());
                tracing::warn!(error = %e, "TCP connection dropped");
            }
        }
    }

    async fn terminate(
        &self,
        acceptor: &TlsAcceptor,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Transferred, RouteError> {
        let tls = time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream))
            .await
            .map_err(|_| RouteError::HandshakeTimeout)?
            .map_err(RouteError::Handshake)?;

        let sni = tls
            .get_ref()
            .1
            .server_name()
            .map(normalize_host)
            .ok_or(RouteError::MissingSni)?;
        let dest = self.resolve(&sni, peer)?;
        tracing::debug!(sni = %sni, dest = %dest.url, "Routing terminated stream");

        let backend = self.dial(&dest).await?;
        self.forward(tls, backend, &dest, &sni).await
    }

    async fn passthrough(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<Transferred, RouteError> {
        let mut hello = Vec::new();
        let sni = match self.sniffer.sniff(&mut stream, &mut hello).await? {
            Sniffed::Found(sni) => sni,
            Sniffed::NoSni => return Err(RouteError::MissingSni),
            Sniffed::Timeout => return Err(RouteError::HandshakeTimeout),
            Sniffed::NotTls | Sniffed::Malformed => return Err(RouteError::NotTls),
        };
        let dest = self.resolve(&sni, peer)?;
        tracing::debug!(sni = %sni, dest = %dest.url, "Routing passthrough stream");

        let mut backend = self.dial(&dest).await?;
        backend.write_all(&hello).await?;
        Ok(pipe(stream, backend).await?)
    }

    /// Pipe `client` to the backend, wrapping the backend in TLS if asked.
    async fn forward<S>(
        &self,
        client: S,
        backend: TcpStream,
        dest: &Destination,
        sni: &str,
    ) -> Result<Transferred, RouteError>
    where
        S: AsyncRead + AsyncWrite,
    {
        if !dest.with_tls {
            return Ok(pipe(client, backend).await?);
        }

        let name = server_name(dest.server_name.as_deref().unwrap_or(sni))?;
        let backend = self
            .connector
            .connect(name, backend)
            .await
            .map_err(|source| RouteError::BackendHandshake {
                dest: dest.url.clone(),
                source,
            })?;
        Ok(pipe(client, backend).await?)
    }

    fn resolve(&self, sni: &str, peer: SocketAddr) -> Result<Arc<Destination>, RouteError> {
        let registry = self.gateway.registry();
        let domain = registry
            .trie()
            .match_with_protocol(sni, Protocol::Tcp)
            .ok_or_else(|| RouteError::UnknownHost(sni.to_string()))?;
        if !domain.is_enabled() {
            return Err(RouteError::Disabled(domain.name.clone()));
        }

        let route = domain
            .route("/")
            .ok_or_else(|| RouteError::NoRoute(domain.name.clone()))?;
        let dest = match route.balancer_kind {
            Some(_) => route.balancer.select_alive(&peer.ip().to_string()),
            None => route.balancer.first(),
        };
        dest.ok_or_else(|| RouteError::NoDestination(domain.name.clone()))
    }

    async fn dial(&self, dest: &Destination) -> Result<TcpStream, RouteError> {
        let addr = dest.target.authority();
        let stream = time::timeout(self.connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| RouteError::ConnectTimeout(dest.url.clone()))?
            .map_err(|source| RouteError::Connect {
                dest: dest.url.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_holds_permits_per_connection() {
        let listener = Listener::bind("127.0.0.1:0", 2).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.max_connections(), 2);

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
    }

    #[tokio::test]
    async fn bind_error_names_the_address() {
        let taken = Listener::bind("127.0.0.1:0", 1).await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let err = Listener::bind(&addr, 1).await.unwrap_err();
        assert!(err.to_string().contains(&addr));
    }

    #[test]
    fn outcomes() {
        assert_eq!(RouteError::MissingSni.outcome(), "no_sni");
        assert_eq!(RouteError::UnknownHost("x".into()).outcome(), "unrouted");
        assert_eq!(RouteError::ConnectTimeout("x".into()).outcome(), "backend_failed");
    }
}
