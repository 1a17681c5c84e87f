//! Startup orchestration.
//!
//! # Responsibilities
//! - Build TLS material, the outbound client and the first Registry
//! - Start background tasks (rate-limit sweeper, health broadcast, reloads)
//! - Bind listeners last, so traffic only arrives once routing is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned to `main`
//! - Every task subscribes to the same shutdown broadcast

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::schema::ProxyConfig;
use crate::config::watcher::ConfigWatcher;
use crate::health::HealthBroadcaster;
use crate::http::{build_client, HttpServer};
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError, TcpRouter};
use crate::net::tls::{self, TlsError};
use crate::registry::{run_reloader, Gateway, RegistryError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },

    #[error("{0} requires a [tls] section")]
    MissingTls(&'static str),

    #[error("config watcher: {0}")]
    Watcher(#[from] notify::Error),
}

/// Startup inputs beyond the config itself.
#[derive(Debug, Default)]
pub struct Startup {
    config: ProxyConfig,
    watch_path: Option<PathBuf>,
    extra_roots: Vec<CertificateDer<'static>>,
}

/// Handles to a started gateway.
pub struct Running {
    pub gateway: Arc<Gateway>,
    pub broadcaster: Arc<HealthBroadcaster>,
    pub http_addr: Option<SocketAddr>,
    pub https_addr: Option<SocketAddr>,
    pub tcp_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Startup {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Reload whenever this file changes.
    pub fn watch(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_path = Some(path.into());
        self
    }

    /// Trust an extra root when dialing TLS destinations.
    pub fn trust(mut self, root: CertificateDer<'static>) -> Self {
        self.extra_roots.push(root);
        self
    }

    pub async fn start(self, shutdown: &Shutdown) -> Result<Running, StartupError> {
        let config = self.config;

        let client_tls = tls::client_config(&self.extra_roots)?;
        let server_tls = config.tls.as_ref().map(tls::load_server_config).transpose()?;
        let client = build_client(Duration::from_secs(config.timeouts.connect_secs), Arc::clone(&client_tls));

        let gateway = Arc::new(Gateway::new(config.clone(), client)?);
        let broadcaster = Arc::new(HealthBroadcaster::new());
        let mut tasks = Vec::new();

        let max_idle = Duration::from_secs(config.rate_limit.idle_eviction_secs.max(1));
        tasks.push(tokio::spawn(
            Arc::clone(gateway.limiter()).run_sweeper(max_idle, shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(Arc::clone(&broadcaster).run(
            Arc::clone(&gateway),
            Duration::from_secs(config.health_check.broadcast_interval_secs.max(1)),
            shutdown.subscribe(),
        )));

        let watcher = match self.watch_path {
            Some(path) => {
                let (watcher, updates) = ConfigWatcher::new(&path);
                let handle = watcher.run()?;
                tasks.push(tokio::spawn(run_reloader(
                    Arc::clone(&gateway),
                    updates,
                    shutdown.subscribe(),
                )));
                tracing::info!(path = %path.display(), "Watching configuration file");
                Some(handle)
            }
            None => None,
        };

        let mut http_addr = None;
        if let Some(addr) = &config.listener.http_address {
            let listener = TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?;
            http_addr = Some(listener.local_addr().map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?);
            let server = HttpServer::http(Arc::clone(&gateway), &config);
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener, rx).await {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            }));
        }

        let mut https_addr = None;
        if let Some(addr) = &config.listener.https_address {
            let server_tls = server_tls.as_ref().ok_or(StartupError::MissingTls("listener.https_address"))?;
            let listener = std::net::TcpListener::bind(addr).map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?;
            https_addr = Some(listener.local_addr().map_err(|source| StartupError::Bind {
                addr: addr.clone(),
                source,
            })?);
            let server = HttpServer::https(Arc::clone(&gateway), &config);
            let tls = tls::with_http_alpn(server_tls);
            let rx = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve_tls(listener, tls, rx).await {
                    tracing::error!(error = %e, "HTTPS server failed");
                }
            }));
        }

        let mut tcp_addr = None;
        if config.tcp.enabled {
            let router = Arc::new(TcpRouter::new(
                Arc::clone(&gateway),
                &config.tcp,
                server_tls.clone(),
                client_tls,
            )?);
            let listener = Listener::bind(&config.tcp.bind_address, config.tcp.max_connections).await?;
            tcp_addr = listener.local_addr().ok();
            tasks.push(tokio::spawn(router.run(listener, shutdown.subscribe())));
        }

        tracing::info!(
            http = ?http_addr,
            https = ?https_addr,
            tcp = ?tcp_addr,
            domains = gateway.registry().trie().len(),
            "Gateway started"
        );

        Ok(Running {
            gateway,
            broadcaster,
            http_addr,
            https_addr,
            tcp_addr,
            tasks,
            _watcher: watcher,
        })
    }
}

impl Running {
    /// Wait for every task to finish after shutdown, up to `deadline`.
    pub async fn join(self, deadline: Duration) {
        let Running { gateway, tasks, .. } = self;
        let all = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Task ended abnormally");
                }
            }
        };
        if tokio::time::timeout(deadline, all).await.is_err() {
            tracing::warn!("Tasks still running after shutdown deadline");
        }
        gateway.stop();
    }
}
