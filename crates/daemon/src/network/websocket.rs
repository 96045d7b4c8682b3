//! WebSocket channel handling for browser terminals.
//!
//! Each upgraded WebSocket becomes exactly one [`Session`]. The socket is split:
//! the outbound half is wrapped in a [`WebSocketSink`] owned by the session,
//! and the inbound half is pumped by a small task into the session's event
//! queue as [`ChannelEvent`]s.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{ChannelError, ChannelEvent, ChannelSink};
use crate::orchestrator::OrchestratorEvent;
use crate::session::{
    OutputClassifier, PtyProcess, Session, SessionOptions, SessionOutcome, SpawnOptions,
};

/// Capacity of the queue between the inbound pump and the session.
const INBOUND_QUEUE: usize = 64;

/// Outbound half of a WebSocket.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    close_sent: bool,
}

impl WebSocketSink {
    /// Wraps the outbound half of a split socket.
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink,
            close_sent: false,
        }
    }
}

impl ChannelSink for WebSocketSink {
    fn send<'a>(
        &'a mut self,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            if self.close_sent {
                return Err(ChannelError::Closed);
            }
            self.sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| ChannelError::Send(e.to_string()))
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + 'a>> {
        Box::pin(async move {
            if self.close_sent {
                return Ok(());
            }
            self.close_sent = true;
            self.sink
                .send(Message::Close(None))
                .await
                .map_err(|e| ChannelError::Send(e.to_string()))
        })
    }
}

/// Everything a WebSocket needs to start a session.
#[derive(Clone)]
pub struct SessionContext {
    /// How to start the shell.
    pub spawn: SpawnOptions,
    /// Shared output classifier.
    pub classifier: Arc<OutputClassifier>,
    /// Per-session behavior.
    pub options: SessionOptions,
    /// Server shutdown signal.
    pub shutdown: CancellationToken,
    /// Lifecycle event sink.
    pub events: broadcast::Sender<OrchestratorEvent>,
}

/// Runs one session over an upgraded WebSocket until it terminates.
pub async fn serve_channel(socket: WebSocket, ctx: SessionContext) -> SessionOutcome {
    let (sink, stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let pump = tokio::spawn(pump_inbound(stream, inbound_tx));
    let channel = WebSocketSink::new(sink);
    let size = ctx.spawn.size;

    let outcome = match PtyProcess::spawn(&ctx.spawn) {
        Ok((process, process_events)) => {
            let session = Session::new(process, channel, size, ctx.classifier, ctx.options);
            let _ = ctx.events.send(OrchestratorEvent::SessionOpened {
                id: session.id().clone(),
                pid: session.pid(),
            });
            session
                .run(inbound_rx, Some(process_events), ctx.shutdown)
                .await
        }
        Err(e) => {
            let session = Session::<PtyProcess, _>::spawn_failed(
                channel,
                size,
                ctx.classifier,
                ctx.options,
                &e,
            );
            let _ = ctx.events.send(OrchestratorEvent::Error {
                message: e.to_string(),
            });
            session.run(inbound_rx, None, ctx.shutdown).await
        }
    };

    pump.abort();
    let _ = ctx.events.send(OrchestratorEvent::SessionClosed {
        id: outcome.id.clone(),
        exit: outcome.exit.clone(),
    });
    outcome
}

/// Forwards inbound frames until the peer closes or the connection drops.
async fn pump_inbound(mut stream: SplitStream<WebSocket>, tx: mpsc::Sender<ChannelEvent>) {
    while let Some(message) = stream.next().await {
        let event = match message {
            Ok(Message::Text(text)) => ChannelEvent::Message(text.as_str().as_bytes().to_vec()),
            Ok(Message::Binary(data)) => ChannelEvent::Message(data.to_vec()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "Peer sent close frame");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket receive error");
                break;
            }
        };

        if tx.send(event).await.is_err() {
            return;
        }
    }

    let _ = tx.send(ChannelEvent::Closed).await;
}
