//! Session management module.
//!
//! This module provides PTY spawning, output classification and the session
//! bridge that relays between one channel and one shell process.

pub mod bridge;
pub mod classifier;
pub mod pty;

pub use bridge::{Session, SessionOptions, SessionOutcome, SessionState};
pub use classifier::{OutputClassifier, DEFAULT_ERROR_PATTERNS};
pub use pty::{
    ExitStatus, ProcessEvents, ProcessHandle, PtyProcess, SessionError, SessionId, SpawnOptions,
};
