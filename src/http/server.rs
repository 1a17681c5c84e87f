//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router around the dispatcher
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve plain HTTP and HTTPS listeners until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::schema::ProxyConfig;
use crate::http::dispatch::{dispatch, DispatchState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::registry::Gateway;

/// How long in-flight requests may run after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One HTTP(S) listener of the gateway.
pub struct HttpServer {
    router: Router,
    proto: &'static str,
}

impl HttpServer {
    /// Plain HTTP listener.
    pub fn http(gateway: Arc<Gateway>, config: &ProxyConfig) -> Self {
        Self::new(gateway, config, "http", config.listener.enforce_allowed_hosts_http)
    }

    /// TLS listener.
    pub fn https(gateway: Arc<Gateway>, config: &ProxyConfig) -> Self {
        Self::new(gateway, config, "https", config.listener.enforce_allowed_hosts_https)
    }

    fn new(gateway: Arc<Gateway>, config: &ProxyConfig, proto: &'static str, enforce_allowed_hosts: bool) -> Self {
        let state = DispatchState {
            gateway,
            proto,
            enforce_allowed_hosts,
            max_body_bytes: config.listener.max_body_bytes,
        };
        let router = Self::build_router(config, state);
        Self { router, proto }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: DispatchState) -> Router {
        let max_body_bytes = state.max_body_bytes;
        Router::new().fallback(dispatch).with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                .map_response(|res: axum::response::Response<_>| res.map(axum::body::Body::new))
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
    }

    /// Serve plain HTTP on `listener` until shutdown.
    pub async fn serve(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, proto = self.proto, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `listener` until shutdown.
    pub async fn serve_tls(
        self,
        listener: std::net::TcpListener,
        tls: Arc<ServerConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        tracing::info!(address = %addr, proto = self.proto, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server received shutdown signal");
            drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(tls))
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!(address = %addr, "HTTPS server stopped");
        Ok(())
    }
}
