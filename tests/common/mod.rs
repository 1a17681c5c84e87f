//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use hostgate::config::parse_config;
use hostgate::lifecycle::{Running, Shutdown, Startup};
use hostgate::net::tls::server_config_from_pem;
use rustls::pki_types::CertificateDer;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Serve `router` on an ephemeral port.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A backend answering every request with `body`.
pub async fn spawn_backend(body: &'static str) -> SocketAddr {
    spawn_router(Router::new().fallback(move || async move { body })).await
}

/// A backend answering every request with 500.
pub async fn spawn_failing_backend() -> SocketAddr {
    spawn_router(Router::new().fallback(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") })).await
}

/// A backend that never answers in time.
pub async fn spawn_hanging_backend() -> SocketAddr {
    spawn_router(Router::new().fallback(|| async {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        "late"
    }))
    .await
}

/// A backend describing the request it received as JSON.
pub async fn spawn_inspect_backend() -> SocketAddr {
    spawn_router(Router::new().fallback(|request: Request| async move {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        axum::Json(json!({
            "path": request.uri().path(),
            "query": request.uri().query(),
            "host": header("host"),
            "x_forwarded_for": header("x-forwarded-for"),
            "x_forwarded_host": header("x-forwarded-host"),
            "x_forwarded_proto": header("x-forwarded-proto"),
            "x_request_id": header("x-request-id"),
        }))
    }))
    .await
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn echo<S: AsyncRead + AsyncWrite + Unpin>(stream: S) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}

/// A plain TCP echo server.
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(echo(socket));
        }
    });
    addr
}

/// A TLS echo server presenting `cert`.
pub async fn spawn_tls_echo(cert: &TestCert) -> SocketAddr {
    let config = server_config_from_pem(cert.cert_pem.as_bytes(), cert.key_pem.as_bytes()).unwrap();
    let acceptor = TlsAcceptor::from(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(socket).await {
                    echo(stream).await;
                }
            });
        }
    });
    addr
}

/// A self-signed certificate written to a fresh temp directory.
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: CertificateDer<'static>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestCert {
    pub fn generate(names: &[&str]) -> Self {
        let names = names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let generated = rcgen::generate_simple_self_signed(names).unwrap();
        let cert_pem = generated.cert.pem();
        let key_pem = generated.key_pair.serialize_pem();

        let dir = std::env::temp_dir().join(format!("hostgate-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, &key_pem).unwrap();

        Self {
            cert_pem,
            key_pem,
            der: generated.cert.der().clone(),
            cert_path,
            key_path,
        }
    }

    /// `[tls]` section pointing at the written files.
    pub fn tls_section(&self) -> String {
        format!(
            "[tls]\ncert_path = {:?}\nkey_path = {:?}\n",
            self.cert_path.display().to_string(),
            self.key_path.display().to_string()
        )
    }

    /// Client config trusting only this certificate.
    pub fn client_config(&self) -> Arc<rustls::ClientConfig> {
        Arc::new(self.client_config_with_alpn(Vec::new()))
    }

    pub fn client_config_with_alpn(&self, alpn: Vec<Vec<u8>>) -> rustls::ClientConfig {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.der.clone()).unwrap();
        let mut config = rustls::ClientConfig::builder_with_provider(hostgate::net::tls::provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = alpn;
        config
    }
}

/// A running gateway and the handle that stops it.
pub struct TestGateway {
    pub running: Running,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.running.http_addr.unwrap(), path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.running.join(std::time::Duration::from_secs(5)).await;
    }
}

/// Start a gateway from TOML. The HTTP listener binds an ephemeral port and
/// health checks are off unless `body` has a `[health_check]` table.
pub async fn start_gateway(body: &str) -> TestGateway {
    start_gateway_trusting(body, Vec::new()).await
}

pub async fn start_gateway_trusting(body: &str, roots: Vec<CertificateDer<'static>>) -> TestGateway {
    let mut config = parse_config(body).unwrap();
    config.listener.http_address = Some("127.0.0.1:0".to_string());
    if !body.contains("[health_check]") {
        config.health_check.enabled = false;
    }
    let mut startup = Startup::new(config);
    for root in roots {
        startup = startup.trust(root);
    }
    let shutdown = Shutdown::new();
    let running = startup.start(&shutdown).await.unwrap();
    TestGateway { running, shutdown }
}

/// GET `path` on the gateway with the given `Host`.
pub async fn get(gateway: &TestGateway, host: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(gateway.http_url(path))
        .header(reqwest::header::HOST, host)
        .send()
        .await
        .unwrap()
}

pub async fn get_json(gateway: &TestGateway, host: &str, path: &str) -> Value {
    get(gateway, host, path).await.json().await.unwrap()
}

/// A response read off a raw HTTP/1.1 connection.
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
    /// Protocol agreed over ALPN.
    pub alpn: Option<Vec<u8>>,
}

/// One HTTP/1.1 GET over TLS, offering only `http/1.1` over ALPN.
pub async fn https_get(addr: SocketAddr, cert: &TestCert, sni: &str, host: &str, path: &str) -> RawResponse {
    let config = cert.client_config_with_alpn(vec![b"http/1.1".to_vec()]);
    let stream = TcpStream::connect(addr).await.unwrap();
    let server_name = hostgate::net::tls::server_name(sni).unwrap();
    let mut tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .unwrap();
    let alpn = tls.get_ref().1.alpn_protocol().map(|p| p.to_vec());

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    tls.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tls.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            // Some servers close without close_notify.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }

    let text = String::from_utf8_lossy(&raw).into_owned();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    RawResponse {
        status,
        head: head.to_string(),
        body: body.to_string(),
        alpn,
    }
}
