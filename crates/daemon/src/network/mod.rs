//! Network module for browser channel connections.
//!
//! This module provides:
//! - The [`ChannelSink`] seam a session writes frames through
//! - WebSocket channel handling for browser terminals
//! - The transport listener serving plain and TLS endpoints

pub mod listener;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Errors raised by the outbound half of a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer is gone.
    #[error("channel closed")]
    Closed,

    /// The frame could not be written.
    #[error("failed to send on channel: {0}")]
    Send(String),
}

/// Something a session observed on the inbound half of its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A raw client frame, not yet decoded.
    Message(Vec<u8>),
    /// The remote peer closed the channel or the connection dropped.
    Closed,
}

/// The outbound half of a channel.
///
/// This trait abstracts over the concrete transport so a session can be
/// driven by an in-memory channel in tests.
pub trait ChannelSink: Send {
    /// Sends one text frame.
    fn send<'a>(
        &'a mut self,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>>;

    /// Starts a graceful close. Confirmation arrives as [`ChannelEvent::Closed`].
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>>;
}

// Re-export key types
pub use listener::{ListenerError, ListenerKind, TransportListener};
pub use websocket::{serve_channel, SessionContext, WebSocketSink};
