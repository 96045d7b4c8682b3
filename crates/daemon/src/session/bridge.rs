//! Terminal session bridge.
//!
//! A [`Session`] pairs one channel with one shell process and relays between
//! them until either side goes away. Both directions feed a single event loop
//! ([`Session::run`]), so the session's state is only ever touched by one
//! task and teardown ordering does not depend on callback timing.
//!
//! ```text
//!  channel inbound ──► decode ──► write / resize ──► process
//!  process output  ──► classify ──► encode ──────► channel outbound
//! ```
//!
//! Lifecycle: `Active` → `Terminating` → `Terminated`. Any of channel close,
//! process exit, an unrecoverable I/O error or server shutdown starts
//! termination; the session is `Terminated` once both the process exit and
//! the channel close have been observed, in either order.

use std::sync::Arc;
use std::time::Duration;

use protocol::{ClientMessage, OutputFrame, ServerMessage, TerminalSize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::classifier::OutputClassifier;
use super::pty::{ExitStatus, ProcessEvents, ProcessHandle, SessionError, SessionId};
use crate::config::SessionConfig;
use crate::network::{ChannelEvent, ChannelSink};

/// How long to keep reading output after the process exits.
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Lifecycle state of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Relaying in both directions.
    Active,
    /// Teardown requested; waiting for the remaining close event.
    Terminating,
    /// Process and channel are both gone.
    Terminated,
}

/// Per-session behavior knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Send an exit frame before closing the channel.
    pub notify_exit: bool,
    /// How long `Terminating` may last before the session gives up waiting.
    pub teardown_timeout: Duration,
}

impl SessionOptions {
    /// Builds options from the session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            notify_exit: config.notify_exit,
            teardown_timeout: config.teardown_timeout(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Summary returned once a session has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session identifier.
    pub id: SessionId,
    /// Process exit status, when the exit was observed.
    pub exit: Option<ExitStatus>,
    /// Whether the teardown deadline expired before both close events arrived.
    pub forced: bool,
}

/// One interactive shell bound to one channel.
pub struct Session<P: ProcessHandle, C: ChannelSink> {
    id: SessionId,
    process: Option<P>,
    channel: C,
    classifier: Arc<OutputClassifier>,
    options: SessionOptions,
    size: TerminalSize,
    state: SessionState,
    process_exited: bool,
    channel_closed: bool,
    exit: Option<ExitStatus>,
    spawn_error: Option<String>,
    terminating_since: Option<Instant>,
    forced: bool,
    decoder: Utf8Decoder,
}

impl<P: ProcessHandle, C: ChannelSink> Session<P, C> {
    /// Creates an active session around a freshly spawned process.
    pub fn new(
        process: P,
        channel: C,
        size: TerminalSize,
        classifier: Arc<OutputClassifier>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process: Some(process),
            channel,
            classifier,
            options,
            size,
            state: SessionState::Active,
            process_exited: false,
            channel_closed: false,
            exit: None,
            spawn_error: None,
            terminating_since: None,
            forced: false,
            decoder: Utf8Decoder::default(),
        }
    }

    /// Creates a session whose process never started.
    ///
    /// When run, it reports the failure to the client as one `error` frame
    /// and goes straight to `Terminating`.
    pub fn spawn_failed(
        channel: C,
        size: TerminalSize,
        classifier: Arc<OutputClassifier>,
        options: SessionOptions,
        error: &SessionError,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process: None,
            channel,
            classifier,
            options,
            size,
            state: SessionState::Active,
            process_exited: true,
            channel_closed: false,
            exit: None,
            spawn_error: Some(error.to_string()),
            terminating_since: None,
            forced: false,
            decoder: Utf8Decoder::default(),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    /// Returns the process ID of the shell, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Drives the session until it is `Terminated`.
    ///
    /// `inbound` carries channel events, `process` the output and exit
    /// sources of the shell (absent after a spawn failure) and `shutdown`
    /// requests termination from the server side.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ChannelEvent>,
        process: Option<ProcessEvents>,
        shutdown: CancellationToken,
    ) -> SessionOutcome {
        let (mut output, mut exit) = match process {
            Some(events) => (Some(events.output), Some(events.exit)),
            None => (None, None),
        };

        tracing::info!(
            session_id = %self.id,
            pid = ?self.pid(),
            size = %self.size,
            "Session started"
        );

        if let Some(reason) = self.spawn_error.take() {
            self.report_spawn_failure(reason).await;
        }

        while self.state != SessionState::Terminated {
            let deadline = self.teardown_deadline();

            tokio::select! {
                biased;

                event = inbound.recv(), if !self.channel_closed => match event {
                    Some(ChannelEvent::Message(raw)) => self.on_channel_message(&raw).await,
                    Some(ChannelEvent::Closed) | None => self.on_channel_close().await,
                },

                chunk = next_output(&mut output) => match chunk {
                    Some(chunk) => self.on_process_output(&chunk).await,
                    None => output = None,
                },

                status = next_exit(&mut exit) => {
                    exit = None;
                    // Background jobs may keep the pty open; stop reading it.
                    if let Some(mut rx) = output.take() {
                        self.drain_output(&mut rx).await;
                    }
                    self.on_process_exit(status).await;
                }

                _ = shutdown.cancelled(), if self.state == SessionState::Active => {
                    self.begin_termination("server shutting down").await;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.force_teardown();
                }
            }
        }

        tracing::info!(
            session_id = %self.id,
            exit = ?self.exit,
            forced = self.forced,
            "Session terminated"
        );

        SessionOutcome {
            id: self.id,
            exit: self.exit,
            forced: self.forced,
        }
    }

    /// Handles one raw frame from the client.
    ///
    /// Malformed frames are dropped; the session keeps serving.
    pub async fn on_channel_message(&mut self, raw: &[u8]) {
        if self.state != SessionState::Active {
            tracing::trace!(session_id = %self.id, "Ignoring frame after teardown started");
            return;
        }

        let message = match ClientMessage::decode_bytes(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "Ignoring malformed frame");
                return;
            }
        };

        let Some(process) = self.process.as_mut() else {
            return;
        };

        match message {
            ClientMessage::Input(input) => {
                tracing::trace!(session_id = %self.id, bytes = input.len(), "Input");
                if let Err(e) = process.write(input.as_bytes()) {
                    tracing::debug!(session_id = %self.id, error = %e, "PTY input failed");
                    self.begin_termination("process input closed").await;
                }
            }
            ClientMessage::Resize(size) => match process.resize(size) {
                Ok(()) => self.size = size,
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Resize ignored");
                }
            },
        }
    }

    /// Handles the remote peer closing the channel.
    pub async fn on_channel_close(&mut self) {
        if self.channel_closed {
            return;
        }
        self.channel_closed = true;
        tracing::info!(session_id = %self.id, "Channel closed");

        self.begin_termination("channel closed").await;
        self.maybe_finish();
    }

    /// Handles one chunk of raw process output.
    pub async fn on_process_output(&mut self, chunk: &[u8]) {
        let text = self.decoder.decode(chunk);
        self.forward_output(text).await;
    }

    /// Handles the process exit event.
    pub async fn on_process_exit(&mut self, status: ExitStatus) {
        if self.process_exited {
            return;
        }
        self.process_exited = true;

        tracing::info!(
            session_id = %self.id,
            pid = ?self.pid(),
            code = ?status.code,
            signal = ?status.signal,
            "Shell process exited"
        );

        let tail = self.decoder.finish();
        self.forward_output(tail).await;

        self.exit = Some(status);
        self.begin_termination("process exited").await;
        self.maybe_finish();
    }

    /// Moves the session to `Terminating` and tears down the live side(s).
    ///
    /// Idempotent: only the first call has any effect.
    pub async fn begin_termination(&mut self, reason: &str) {
        if self.state != SessionState::Active {
            return;
        }
        self.state = SessionState::Terminating;
        self.terminating_since = Some(Instant::now());

        tracing::debug!(session_id = %self.id, reason, "Session terminating");

        if !self.process_exited {
            if let Some(process) = self.process.as_mut() {
                match process.terminate() {
                    Ok(true) => {
                        tracing::debug!(session_id = %self.id, "Sent hang-up to shell")
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(session_id = %self.id, error = %e, "Failed to terminate shell")
                    }
                }
            }
        }

        if !self.channel_closed {
            if self.options.notify_exit {
                if let Some(status) = self.exit.clone() {
                    let frame = ServerMessage::Exit {
                        code: status.code,
                        signal: status.signal,
                    };
                    if self.channel.send(frame.encode()).await.is_err() {
                        self.channel_closed = true;
                    }
                }
            }

            if !self.channel_closed {
                if let Err(e) = self.channel.close().await {
                    tracing::debug!(session_id = %self.id, error = %e, "Channel already gone");
                    self.channel_closed = true;
                }
            }
        }

        self.maybe_finish();
    }

    async fn report_spawn_failure(&mut self, reason: String) {
        tracing::error!(session_id = %self.id, error = %reason, "Shell failed to start");

        let frame = OutputFrame::new(protocol::OutputKind::Error, format!("{}\r\n", reason));
        if let Err(e) = self.channel.send(frame.encode()).await {
            tracing::debug!(session_id = %self.id, error = %e, "Could not report spawn failure");
            self.channel_closed = true;
        }
        self.begin_termination("spawn failed").await;
    }

    async fn forward_output(&mut self, text: String) {
        if text.is_empty() || self.channel_closed || self.state != SessionState::Active {
            return;
        }

        let kind = self.classifier.classify(&text);
        tracing::trace!(session_id = %self.id, kind = kind.as_str(), bytes = text.len(), "Output");

        let frame = OutputFrame::new(kind, text);
        if let Err(e) = self.channel.send(frame.encode()).await {
            tracing::debug!(session_id = %self.id, error = %e, "Channel write failed");
            self.channel_closed = true;
            self.begin_termination("channel write failed").await;
        }
    }

    /// Forwards output produced up to shortly after the exit was observed.
    ///
    /// Bounded by one overall window so a writer that never stops cannot
    /// hold the session open.
    async fn drain_output(&mut self, rx: &mut mpsc::Receiver<Vec<u8>>) {
        let deadline = Instant::now() + OUTPUT_DRAIN_WINDOW;
        while let Ok(Some(chunk)) = timeout_at(deadline, rx.recv()).await {
            self.on_process_output(&chunk).await;
        }
    }

    fn teardown_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Terminating => self
                .terminating_since
                .map(|since| since + self.options.teardown_timeout),
            _ => None,
        }
    }

    fn force_teardown(&mut self) {
        tracing::warn!(
            session_id = %self.id,
            process_exited = self.process_exited,
            channel_closed = self.channel_closed,
            "Teardown timed out"
        );

        if !self.process_exited {
            if let Some(process) = self.process.as_mut() {
                if let Err(e) = process.force_kill() {
                    tracing::warn!(session_id = %self.id, error = %e, "Failed to kill shell");
                }
            }
        }

        self.forced = true;
        self.state = SessionState::Terminated;
    }

    fn maybe_finish(&mut self) {
        if self.state == SessionState::Terminating && self.process_exited && self.channel_closed {
            self.state = SessionState::Terminated;
        }
    }
}

async fn next_output(output: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match output {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_exit(exit: &mut Option<oneshot::Receiver<ExitStatus>>) -> ExitStatus {
    match exit {
        // A dropped sender means the waiter died without a status.
        Some(rx) => rx.await.unwrap_or_default(),
        None => std::future::pending().await,
    }
}

/// Incremental UTF-8 decoding across chunk boundaries.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back until
/// the next chunk; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a dangling partial sequence.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
