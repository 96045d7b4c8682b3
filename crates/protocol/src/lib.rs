//! # WebShell Protocol Library
//!
//! This crate provides the message definitions exchanged between a browser
//! terminal and the WebShell daemon over a WebSocket channel.
//!
//! ## Overview
//!
//! - **Client frames**: keystrokes (`input`) and terminal resize requests (`resize`)
//! - **Server frames**: classified output chunks (`output` / `error`) and an
//!   optional `exit` notification
//! - **Codec**: deterministic JSON encoding; decoding failures are typed and
//!   never panic
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, OutputFrame, OutputKind, ServerMessage, TerminalSize};
//!
//! let msg = ClientMessage::decode(r#"{"resize":[120,40]}"#).unwrap();
//! assert_eq!(msg, ClientMessage::Resize(TerminalSize::new(120, 40)));
//!
//! let frame = OutputFrame::new(OutputKind::Output, "hi\n");
//! let wire = frame.encode();
//! assert_eq!(ServerMessage::decode(&wire).unwrap().output(), Some("hi\n"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Channel message definitions and codec
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientMessage, OutputFrame, OutputKind, ServerMessage, TerminalSize, DEFAULT_COLS,
    DEFAULT_ROWS,
};
