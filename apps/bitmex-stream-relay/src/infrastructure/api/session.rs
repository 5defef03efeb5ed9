//! Subscriber Sessions
//!
//! One task per upgraded socket. The task binds the connection, drains its
//! outbound queue into the socket, watches for the client going away, and
//! unbinds on exit.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};

use crate::domain::connection::SubscriberConnection;
use crate::domain::subscriber::SubscriberId;
use crate::infrastructure::api::ApiState;
use crate::infrastructure::metrics;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket or the stream ended.
    ClientClosed,
    /// A newer connection for the same subscriber took over.
    Superseded,
    /// The server is shutting down.
    Shutdown,
    /// Writing to or reading from the socket failed.
    TransportError,
}

impl SessionEnd {
    fn close_frame(self) -> Option<CloseFrame> {
        match self {
            Self::Superseded => Some(CloseFrame {
                code: close_code::NORMAL,
                reason: Utf8Bytes::from_static("superseded"),
            }),
            Self::Shutdown => Some(CloseFrame {
                code: close_code::AWAY,
                reason: Utf8Bytes::from_static("shutting down"),
            }),
            Self::ClientClosed | Self::TransportError => None,
        }
    }
}

/// Serve one subscriber socket until it closes.
pub async fn run_session(
    socket: WebSocket,
    subscriber: SubscriberId,
    state: Arc<ApiState>,
) -> SessionEnd {
    let (connection, mut outbound) = SubscriberConnection::channel(state.queue_capacity);
    let connection_id = connection.id();
    let closed = connection.close_signal();

    if let Some(previous) = state.connections.bind(subscriber, Arc::clone(&connection)) {
        tracing::info!(
            subscriber = %subscriber,
            superseded = %previous.id(),
            connection = %connection_id,
            "Subscriber reconnected; previous connection closed"
        );
    }
    metrics::set_subscriber_connections(state.connections.len());
    tracing::info!(subscriber = %subscriber, connection = %connection_id, "Subscriber connected");

    let (mut sink, mut stream) = socket.split();

    let end = loop {
        tokio::select! {
            () = closed.cancelled() => break SessionEnd::Superseded,
            () = state.shutdown.cancelled() => break SessionEnd::Shutdown,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break SessionEnd::Superseded;
                };
                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                    tracing::debug!(connection = %connection_id, error = %e, "Subscriber write failed");
                    break SessionEnd::TransportError;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %connection_id, error = %e, "Subscriber read failed");
                    break SessionEnd::TransportError;
                }
            },
        }
    };

    if let Some(frame) = end.close_frame() {
        let _ = sink.send(Message::Close(Some(frame))).await;
    }

    connection.close();
    state.connections.unbind(connection_id);
    metrics::set_subscriber_connections(state.connections.len());

    tracing::info!(
        subscriber = %subscriber,
        connection = %connection_id,
        reason = ?end,
        "Subscriber disconnected"
    );
    end
}
