//! Transport listener.
//!
//! Accepts connections on a plain or TLS socket and serves the HTTP router on
//! them. Upgraded WebSocket connections become sessions; everything else is
//! a regular request. Both listener kinds stop accepting when the shared
//! shutdown token is cancelled.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long open HTTP connections may linger after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors raised while binding or serving a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(String),

    /// The server task failed.
    #[error("listener failed: {0}")]
    Serve(String),
}

/// Which transport a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Plain HTTP and `ws://`.
    Plain,
    /// HTTPS and `wss://`.
    Secure,
}

impl std::fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerKind::Plain => write!(f, "http"),
            ListenerKind::Secure => write!(f, "https"),
        }
    }
}

/// A bound listener serving the router in a background task.
pub struct TransportListener {
    kind: ListenerKind,
    local_addr: SocketAddr,
    task: JoinHandle<Result<(), ListenerError>>,
}

impl TransportListener {
    /// Binds a plain listener and starts serving.
    pub async fn bind_plain(
        addr: SocketAddr,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(addr = %local_addr, "Listening (http)");

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| ListenerError::Serve(e.to_string()))
        });

        Ok(Self {
            kind: ListenerKind::Plain,
            local_addr,
            task,
        })
    }

    /// Binds a TLS listener with PEM certificate chain and key, and starts serving.
    pub async fn bind_secure(
        addr: SocketAddr,
        cert: &Path,
        key: &Path,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<Self, ListenerError> {
        let tls = RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| ListenerError::Tls(format!("{} / {}: {}", cert.display(), key.display(), e)))?;

        let listener = std::net::TcpListener::bind(addr)
            .map_err(|source| ListenerError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(addr = %local_addr, "Listening (https)");

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        let task = tokio::spawn(async move {
            axum_server::from_tcp_rustls(listener, tls)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .map_err(|e| ListenerError::Serve(e.to_string()))
        });

        Ok(Self {
            kind: ListenerKind::Secure,
            local_addr,
            task,
        })
    }

    /// Returns the transport kind.
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the listener to stop.
    pub async fn join(self) -> Result<(), ListenerError> {
        let kind = self.kind;
        let result = match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ListenerError::Serve(e.to_string())),
        };
        tracing::debug!(kind = %kind, addr = %self.local_addr, "Listener stopped");
        result
    }
}
