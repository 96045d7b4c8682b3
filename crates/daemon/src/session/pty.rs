//! PTY process adapter.
//!
//! This module owns the lifecycle of a single shell process bound to a
//! pseudo-terminal. Output and exit are surfaced as channel events rather
//! than callbacks: a blocking reader thread feeds a bounded chunk queue and a
//! waiter thread fires a oneshot exactly once when the process ends.

use std::io::{Read, Write};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::TerminalSize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::SessionConfig;

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The shell could not be started (missing executable, permission denied).
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// The process has already been asked to terminate.
    #[error("process already terminated")]
    AlreadyTerminated,

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to signal the process.
    #[error("failed to kill process: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// How a process ended.
///
/// A process killed by a signal carries the signal name and no exit code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitStatus {
    /// Exit code, if the process exited normally.
    pub code: Option<u32>,
    /// Name of the terminating signal, if any.
    pub signal: Option<String>,
}

impl ExitStatus {
    /// Status for a normal exit.
    pub fn with_code(code: u32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Status for a process killed by a signal.
    pub fn with_signal(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Prefix portable-pty's `Display` gives a signalled status.
const PTY_SIGNAL_PREFIX: &str = "Terminated by ";

impl From<portable_pty::ExitStatus> for ExitStatus {
    fn from(status: portable_pty::ExitStatus) -> Self {
        // The signal name is only reachable through the Display output.
        if !status.success() {
            if let Some(signal) = status.to_string().strip_prefix(PTY_SIGNAL_PREFIX) {
                return ExitStatus::with_signal(signal);
            }
        }
        ExitStatus::with_code(status.exit_code())
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.signal) {
            (_, Some(signal)) => write!(f, "signal {}", signal),
            (Some(code), None) => write!(f, "code {}", code),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Operations a session needs from the process it owns.
pub trait ProcessHandle: Send {
    /// Process ID, if known.
    fn pid(&self) -> Option<u32>;

    /// Forwards raw bytes to the process's standard input. No framing.
    fn write(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Applies new terminal dimensions without interrupting I/O.
    fn resize(&mut self, size: TerminalSize) -> Result<(), SessionError>;

    /// Requests termination without waiting for it.
    ///
    /// Returns `true` when this call sent the request and `false` when an
    /// earlier call already did.
    fn terminate(&mut self) -> Result<bool, SessionError>;

    /// Kills a process that ignored [`terminate`](Self::terminate).
    fn force_kill(&mut self) -> Result<(), SessionError>;
}

/// Event sources of a spawned process.
pub struct ProcessEvents {
    /// Output chunks in production order, with no alignment to lines.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Fires once when the process ends.
    pub exit: oneshot::Receiver<ExitStatus>,
}

/// Everything fixed at spawn time.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Shell executable.
    pub shell: String,
    /// Shell arguments.
    pub args: Vec<String>,
    /// Working directory; inherited when unset.
    pub cwd: Option<PathBuf>,
    /// Complete environment. The daemon's own environment is not inherited.
    pub env: Vec<(String, String)>,
    /// Value of `TERM`.
    pub term: String,
    /// Initial terminal size.
    pub size: TerminalSize,
    /// Capacity of the output chunk queue.
    pub output_queue: usize,
}

impl SpawnOptions {
    /// Builds spawn options from the session configuration.
    pub fn from_config(config: &SessionConfig, cwd: Option<PathBuf>) -> Self {
        Self {
            shell: config.shell.clone(),
            args: config.shell_args.clone(),
            cwd,
            env: config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            term: config.term.clone(),
            size: config.initial_size(),
            output_queue: config.output_queue,
        }
    }
}

/// A shell process attached to a pseudo-terminal.
pub struct PtyProcess {
    /// The PTY master handle.
    master: Box<dyn MasterPty + Send>,

    /// The writer for the PTY.
    writer: Box<dyn Write + Send>,

    /// Kills the child without holding the child handle.
    killer: Box<dyn ChildKiller + Send + Sync>,

    /// Process ID.
    pid: Option<u32>,

    /// Current terminal size.
    size: TerminalSize,

    /// Set once termination has been requested.
    terminate_sent: bool,
}

impl PtyProcess {
    /// Spawns the shell and starts its reader and waiter threads.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(options: &SpawnOptions) -> Result<(Self, ProcessEvents), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(options.size))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&options.shell);
        cmd.args(&options.args);
        cmd.env_clear();
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", &options.term);
        if let Some(ref dir) = options.cwd {
            cmd.cwd(dir);
        }

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", options.shell, e)))?;
        // Keeping the slave open would hide EOF from the reader after exit.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let (output_tx, output_rx) = mpsc::channel(options.output_queue.max(1));
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || read_loop(reader, output_tx, pid));

        tokio::task::spawn_blocking(move || {
            let status = match child.wait() {
                Ok(status) => ExitStatus::from(status),
                Err(e) => {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to wait for shell process");
                    ExitStatus::default()
                }
            };
            tracing::debug!(pid = ?pid, status = %status, "Shell process reaped");
            let _ = exit_tx.send(status);
        });

        tracing::debug!(
            pid = ?pid,
            shell = %options.shell,
            size = %options.size,
            "Spawned shell on PTY"
        );

        let process = PtyProcess {
            master: pair.master,
            writer,
            killer,
            pid,
            size: options.size,
            terminate_sent: false,
        };

        Ok((
            process,
            ProcessEvents {
                output: output_rx,
                exit: exit_rx,
            },
        ))
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.size
    }
}

impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.terminate_sent {
            return Err(SessionError::AlreadyTerminated);
        }

        self.writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> Result<(), SessionError> {
        if self.terminate_sent {
            return Err(SessionError::AlreadyTerminated);
        }

        self.master
            .resize(pty_size(size))
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;
        self.size = size;

        tracing::debug!(pid = ?self.pid, cols = size.cols, rows = size.rows, "Resized PTY");
        Ok(())
    }

    fn terminate(&mut self) -> Result<bool, SessionError> {
        if self.terminate_sent {
            return Ok(false);
        }
        self.terminate_sent = true;

        // SIGHUP is what a real terminal delivers on hang-up.
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            match signal::kill(Pid::from_raw(pid), Signal::SIGHUP) {
                Ok(()) | Err(Errno::ESRCH) => return Ok(true),
                Err(e) => {
                    tracing::debug!(pid, error = %e, "SIGHUP failed, falling back to kill");
                }
            }
        }

        self.killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))?;
        Ok(true)
    }

    fn force_kill(&mut self) -> Result<(), SessionError> {
        self.terminate_sent = true;
        self.killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Reads the PTY until EOF and forwards chunks in order.
///
/// Blocks on a full queue, which in turn stalls the shell once the kernel's
/// PTY buffer fills. Nothing is dropped.
fn read_loop(mut reader: Box<dyn Read + Send>, output_tx: mpsc::Sender<Vec<u8>>, pid: Option<u32>) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                tracing::debug!(pid = ?pid, "PTY EOF");
                break;
            }
            Ok(n) => {
                if output_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    tracing::trace!(pid = ?pid, "Output receiver dropped");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO on the master once the slave side is gone.
                tracing::debug!(pid = ?pid, error = %e, "PTY read ended");
                break;
            }
        }
    }
}
