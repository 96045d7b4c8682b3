//! # WebShell Daemon Library
//!
//! This crate provides the daemon (server) functionality for WebShell,
//! giving a browser terminal interactive shell access to the host machine.
//!
//! ## Overview
//!
//! The daemon accepts WebSocket channels and bridges each one to its own
//! login shell on a pseudo-terminal. It provides:
//!
//! - **Terminal Sessions**: One PTY-backed shell per channel, with resize,
//!   classified output and clean teardown from either side
//! - **File Operations**: Whole-file read/write and recursive directory trees
//! - **Transport**: Plain and TLS listeners sharing one HTTP router
//!
//! ## Architecture
//!
//! ```text
//!   browser ──ws──► TransportListener (http / https)
//!                        │
//!                        ▼
//!                   router ──► /file, /directory ──► FileTransfer / DirectoryBrowser
//!                        │
//!                        ▼  one per channel
//!   WebSocketSink ◄── Session ──► PtyProcess ──► login shell
//!                        ▲
//!                        └── OutputClassifier tags each output chunk
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serve until asked to stop...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY process, output classification and the session bridge
//! - [`files`]: Directory trees and file read/write
//! - [`network`]: WebSocket channels and transport listeners
//! - [`router`]: HTTP routes
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod files;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    ExitStatus, OutputClassifier, PtyProcess, Session, SessionError, SessionId, SessionOptions,
    SessionOutcome, SessionState,
};

// Re-export network types for convenience
pub use network::{ChannelError, ChannelEvent, ChannelSink, ListenerKind, TransportListener};

// Re-export files types for convenience
pub use files::{DirectoryBrowser, DirectoryEntry, FileTransfer};

// Re-export router types for convenience
pub use router::{build_router, AppState, RouterError};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
