//! Channel message definitions for WebShell.
//!
//! Frames travel as JSON text over the channel. The client sends either
//! keystrokes or a resize request:
//!
//! ```text
//! { "input": "ls -la\n" }
//! { "resize": [120, 40] }
//! ```
//!
//! The server answers with classified output chunks and, optionally, an exit
//! notification:
//!
//! ```text
//! { "type": "output", "output": "total 8\r\n" }
//! { "type": "error",  "output": "bash: foo: command not found\r\n" }
//! { "type": "exit",   "code": 0, "signal": null }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ProtocolError, Result};

/// Default terminal columns for a fresh session.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal rows for a fresh session.
pub const DEFAULT_ROWS: u16 = 24;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Width in columns.
    pub cols: u16,
    /// Height in rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Creates a terminal size.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

// ============================================================================
// Client -> Server
// ============================================================================

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Raw text to forward to the shell's standard input.
    Input(String),
    /// New terminal dimensions for the live process.
    Resize(TerminalSize),
}

/// Wire shape of a client frame before disambiguation.
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    resize: Option<(u16, u16)>,
}

impl ClientMessage {
    /// Decodes a client frame from its JSON text.
    ///
    /// A non-empty `input` takes precedence over `resize` when both are
    /// present. A frame with neither yields [`ProtocolError::EmptyMessage`].
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawClientMessage = serde_json::from_str(text)?;

        if let Some(input) = raw.input.filter(|s| !s.is_empty()) {
            return Ok(ClientMessage::Input(input));
        }

        match raw.resize {
            Some((cols, rows)) if cols == 0 || rows == 0 => {
                Err(ProtocolError::InvalidResize { cols, rows })
            }
            Some((cols, rows)) => Ok(ClientMessage::Resize(TerminalSize::new(cols, rows))),
            None => Err(ProtocolError::EmptyMessage),
        }
    }

    /// Decodes a client frame delivered as raw bytes (binary channel frames).
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Self::decode(text)
    }

    /// Encodes the frame into its JSON text.
    pub fn encode(&self) -> String {
        match self {
            ClientMessage::Input(input) => json!({ "input": input }).to_string(),
            ClientMessage::Resize(size) => json!({ "resize": [size.cols, size.rows] }).to_string(),
        }
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Classification of one output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Ordinary output.
    Output,
    /// Output that looks like a failure message.
    Error,
}

impl OutputKind {
    /// Returns the wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Output => "output",
            OutputKind::Error => "error",
        }
    }
}

/// One classified chunk of process output.
///
/// The kind describes the chunk's content only, not the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    /// Classification of this chunk.
    pub kind: OutputKind,
    /// Chunk text.
    pub payload: String,
}

impl OutputFrame {
    /// Creates an output frame.
    pub fn new(kind: OutputKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encodes the frame into its JSON text.
    pub fn encode(&self) -> String {
        json!({ "type": self.kind.as_str(), "output": self.payload }).to_string()
    }
}

/// Any frame the server sends to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Ordinary output chunk.
    Output {
        /// Chunk text.
        output: String,
    },
    /// Output chunk classified as an error.
    Error {
        /// Chunk text.
        output: String,
    },
    /// The shell process ended.
    Exit {
        /// Exit code, absent when the process was killed by a signal.
        code: Option<u32>,
        /// Name of the terminating signal, if any.
        signal: Option<String>,
    },
}

impl ServerMessage {
    /// Encodes the frame into its JSON text. Never fails.
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::Output { output } => {
                json!({ "type": "output", "output": output }).to_string()
            }
            ServerMessage::Error { output } => {
                json!({ "type": "error", "output": output }).to_string()
            }
            ServerMessage::Exit { code, signal } => {
                json!({ "type": "exit", "code": code, "signal": signal }).to_string()
            }
        }
    }

    /// Decodes a server frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the chunk text for output frames.
    pub fn output(&self) -> Option<&str> {
        match self {
            ServerMessage::Output { output } | ServerMessage::Error { output } => Some(output),
            ServerMessage::Exit { .. } => None,
        }
    }
}

impl From<OutputFrame> for ServerMessage {
    fn from(frame: OutputFrame) -> Self {
        match frame.kind {
            OutputKind::Output => ServerMessage::Output {
                output: frame.payload,
            },
            OutputKind::Error => ServerMessage::Error {
                output: frame.payload,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_input() {
        let msg = ClientMessage::decode(r#"{"input":"echo hi\n"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Input("echo hi\n".to_string()));
    }

    #[test]
    fn test_decode_resize() {
        let msg = ClientMessage::decode(r#"{"resize":[120,40]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize(TerminalSize::new(120, 40)));
    }

    #[test]
    fn test_decode_input_wins_over_resize() {
        let msg = ClientMessage::decode(r#"{"input":"x","resize":[100,30]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Input("x".to_string()));
    }

    #[test]
    fn test_decode_empty_input_falls_through_to_resize() {
        let msg = ClientMessage::decode(r#"{"input":"","resize":[100,30]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize(TerminalSize::new(100, 30)));
    }

    #[test]
    fn test_decode_empty_object() {
        assert_eq!(
            ClientMessage::decode("{}").unwrap_err(),
            ProtocolError::EmptyMessage
        );
        assert_eq!(
            ClientMessage::decode(r#"{"input":""}"#).unwrap_err(),
            ProtocolError::EmptyMessage
        );
        assert_eq!(
            ClientMessage::decode(r#"{"input":null}"#).unwrap_err(),
            ProtocolError::EmptyMessage
        );
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = ClientMessage::decode(r#"{"input":"a","extra":true}"#).unwrap();
        assert_eq!(msg, ClientMessage::Input("a".to_string()));
    }

    #[test]
    fn test_decode_malformed() {
        for text in [
            "",
            "not json",
            "[1,2]",
            r#"{"resize":[80]}"#,
            r#"{"resize":[-1,24]}"#,
            r#"{"resize":"80x24"}"#,
            r#"{"input":42}"#,
        ] {
            let err = ClientMessage::decode(text).unwrap_err();
            assert!(
                matches!(err, ProtocolError::Deserialization(_)),
                "expected deserialization error for {:?}, got {:?}",
                text,
                err
            );
        }
    }

    #[test]
    fn test_decode_zero_resize() {
        assert_eq!(
            ClientMessage::decode(r#"{"resize":[0,24]}"#).unwrap_err(),
            ProtocolError::InvalidResize { cols: 0, rows: 24 }
        );
    }

    #[test]
    fn test_decode_bytes() {
        let msg = ClientMessage::decode_bytes(br#"{"input":"ls\n"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Input("ls\n".to_string()));

        let err = ClientMessage::decode_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_client_encode_matches_wire_schema() {
        assert_eq!(
            ClientMessage::Input("pwd\n".to_string()).encode(),
            r#"{"input":"pwd\n"}"#
        );
        assert_eq!(
            ClientMessage::Resize(TerminalSize::new(132, 50)).encode(),
            r#"{"resize":[132,50]}"#
        );
    }

    #[test]
    fn test_output_frame_encode() {
        let frame = OutputFrame::new(OutputKind::Output, "hi\n");
        let value: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value, json!({ "type": "output", "output": "hi\n" }));

        let frame = OutputFrame::new(OutputKind::Error, "cannot open");
        let value: serde_json::Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value, json!({ "type": "error", "output": "cannot open" }));
    }

    #[test]
    fn test_output_frame_escapes_control_characters() {
        let frame = OutputFrame::new(OutputKind::Output, "\u{1b}[0m\"quoted\"\r\n");
        let decoded = ServerMessage::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.output(), Some("\u{1b}[0m\"quoted\"\r\n"));
    }

    #[test]
    fn test_server_message_from_frame() {
        let msg: ServerMessage = OutputFrame::new(OutputKind::Error, "failed").into();
        assert_eq!(
            msg,
            ServerMessage::Error {
                output: "failed".to_string()
            }
        );
        assert_eq!(msg.encode(), OutputFrame::new(OutputKind::Error, "failed").encode());
    }

    #[test]
    fn test_exit_frame() {
        let msg = ServerMessage::Exit {
            code: None,
            signal: Some("Hangup".to_string()),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(
            value,
            json!({ "type": "exit", "code": null, "signal": "Hangup" })
        );
        assert_eq!(ServerMessage::decode(&msg.encode()).unwrap(), msg);
        assert_eq!(msg.output(), None);
    }

    #[test]
    fn test_server_decode_unknown_type() {
        let err = ServerMessage::decode(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_terminal_size_default_and_display() {
        let size = TerminalSize::default();
        assert_eq!(size, TerminalSize::new(80, 24));
        assert_eq!(size.to_string(), "80x24");
    }

    #[test]
    fn test_output_kind_serde() {
        assert_eq!(serde_json::to_string(&OutputKind::Error).unwrap(), "\"error\"");
        assert_eq!(
            serde_json::from_str::<OutputKind>("\"output\"").unwrap(),
            OutputKind::Output
        );
    }
}
