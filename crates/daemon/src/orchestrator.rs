//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that builds the shared
//! handler state, binds the configured listeners and coordinates graceful
//! shutdown of listeners and running sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::network::{ListenerKind, TransportListener};
use crate::router::{build_router, AppState};
use crate::session::{ExitStatus, SessionId};

/// Slack on top of the session teardown timeout when waiting at shutdown.
const SESSION_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding listeners.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A listener is accepting connections.
    ListenerBound { kind: ListenerKind, addr: SocketAddr },
    /// A channel was accepted and its shell started.
    SessionOpened { id: SessionId, pid: Option<u32> },
    /// A session terminated.
    SessionClosed {
        id: SessionId,
        exit: Option<ExitStatus>,
    },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Shared handler state.
    app_state: AppState,
    /// Bound listeners.
    listeners: Vec<TransportListener>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        let shutdown_token = CancellationToken::new();
        let (event_tx, _) = broadcast::channel(256);

        let app_state = AppState::from_config(&config, shutdown_token.clone(), event_tx.clone())
            .context("Failed to initialize handler state")?;

        info!(home_dir = %config.home_dir().display(), shell = %config.session.shell, "Daemon configured");

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            app_state,
            listeners: Vec::new(),
            shutdown_token,
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the daemon orchestrator.
    ///
    /// Binds the plain listener and, when configured, the TLS listener. Fails
    /// without leaving anything bound if either cannot be started.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.bind_listeners().await {
            error!("Failed to start listeners: {:#}", e);
            self.emit_event(OrchestratorEvent::Error {
                message: format!("{:#}", e),
            });
            self.shutdown_token.cancel();
            for listener in self.listeners.drain(..) {
                let _ = listener.join().await;
            }
            *self.state.write().await = OrchestratorState::Stopped;
            self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
            return Err(e);
        }

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    async fn bind_listeners(&mut self) -> Result<()> {
        let server = self.config.server.clone();
        let router = build_router(self.app_state.clone(), &server);

        let plain = TransportListener::bind_plain(
            server.http_addr,
            router.clone(),
            self.shutdown_token.clone(),
        )
        .await
        .context("Failed to start HTTP listener")?;
        self.register_listener(plain);

        if let Some(addr) = server.https_addr {
            let (cert, key) = match (&server.tls_cert, &server.tls_key) {
                (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                _ => anyhow::bail!("https_addr requires both tls_cert and tls_key"),
            };
            let secure = TransportListener::bind_secure(
                addr,
                &cert,
                &key,
                router,
                self.shutdown_token.clone(),
            )
            .await
            .context("Failed to start HTTPS listener")?;
            self.register_listener(secure);
        }

        Ok(())
    }

    fn register_listener(&mut self, listener: TransportListener) {
        debug!(kind = %listener.kind(), addr = %listener.local_addr(), "Listener registered");
        self.emit_event(OrchestratorEvent::ListenerBound {
            kind: listener.kind(),
            addr: listener.local_addr(),
        });
        self.listeners.push(listener);
    }

    /// Stops the daemon orchestrator gracefully.
    ///
    /// Running sessions observe the shutdown token and terminate their shells;
    /// this waits for them, bounded by the session teardown timeout.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!(
            sessions = self.app_state.active_sessions(),
            "Stopping daemon orchestrator..."
        );

        self.shutdown_token.cancel();

        for listener in self.listeners.drain(..) {
            let kind = listener.kind();
            if let Err(e) = listener.join().await {
                warn!("Error stopping {} listener: {}", kind, e);
            }
        }

        self.wait_for_sessions().await;

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    async fn wait_for_sessions(&self) {
        let tasks = self.app_state.session_tasks();
        tasks.close();
        let limit = self.config.session.teardown_timeout() + SESSION_DRAIN_GRACE;
        if tokio::time::timeout(limit, tasks.wait()).await.is_err() {
            warn!(
                remaining = tasks.len(),
                "Sessions still running after shutdown timeout"
            );
        } else {
            debug!("All sessions finished");
        }
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the addresses of the bound listeners.
    pub fn local_addrs(&self) -> Vec<(ListenerKind, SocketAddr)> {
        self.listeners
            .iter()
            .map(|l| (l.kind(), l.local_addr()))
            .collect()
    }

    /// Returns the bound address of the plain listener.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.kind() == ListenerKind::Plain)
            .map(TransportListener::local_addr)
    }

    /// Returns the number of running sessions.
    pub fn session_count(&self) -> usize {
        self.app_state.active_sessions()
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
