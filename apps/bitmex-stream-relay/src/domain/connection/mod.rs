//! Subscriber Connection Registry
//!
//! Bidirectional mapping between subscriber identities and their live
//! outbound channels. At most one connection is bound per subscriber; a
//! newer connection supersedes and closes the older one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::DeliveryFrame;
use crate::domain::subscriber::SubscriberId;

// =============================================================================
// Connection
// =============================================================================

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The connection has been closed.
    #[error("connection closed")]
    Closed,
}

/// Sending half of one subscriber transport.
///
/// Frames are queued without blocking; the session task owning the socket
/// drains the queue.
#[derive(Debug)]
pub struct SubscriberConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<DeliveryFrame>,
    closed: CancellationToken,
}

impl SubscriberConnection {
    /// Create a connection with a bounded outbound queue.
    ///
    /// Returns the connection and the receiver the session task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<DeliveryFrame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            outbound,
            closed: CancellationToken::new(),
        });
        (connection, rx)
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting. A full queue drops the new frame.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] or [`DeliveryError::Closed`].
    pub fn try_deliver(&self, frame: DeliveryFrame) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the session task to close the transport.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the connection was closed or its receiver dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.outbound.is_closed()
    }

    /// Token cancelled when the connection is closed.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct Bindings {
    by_subscriber: HashMap<SubscriberId, Arc<SubscriberConnection>>,
    by_connection: HashMap<ConnectionId, SubscriberId>,
}

/// Concurrent subscriber to connection registry.
///
/// Both directions live under one lock so they are always consistent.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: RwLock<Bindings>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a subscriber.
    ///
    /// A previous connection for the same subscriber is unbound and closed,
    /// and returned to the caller.
    pub fn bind(
        &self,
        subscriber: SubscriberId,
        connection: Arc<SubscriberConnection>,
    ) -> Option<Arc<SubscriberConnection>> {
        let connection_id = connection.id();
        let superseded = {
            let mut bindings = self.bindings.write();
            let bindings = &mut *bindings;

            if let Some(previous_owner) = bindings.by_connection.insert(connection_id, subscriber)
                && previous_owner != subscriber
                && bindings
                    .by_subscriber
                    .get(&previous_owner)
                    .is_some_and(|c| c.id() == connection_id)
            {
                bindings.by_subscriber.remove(&previous_owner);
            }

            match bindings.by_subscriber.insert(subscriber, connection) {
                Some(previous) if previous.id() != connection_id => {
                    bindings.by_connection.remove(&previous.id());
                    Some(previous)
                }
                _ => None,
            }
        };

        if let Some(previous) = &superseded {
            previous.close();
        }
        superseded
    }

    /// Live connection for a subscriber.
    #[must_use]
    pub fn lookup(&self, subscriber: SubscriberId) -> Option<Arc<SubscriberConnection>> {
        self.bindings.read().by_subscriber.get(&subscriber).cloned()
    }

    /// Subscriber bound to a connection.
    #[must_use]
    pub fn subscriber_of(&self, connection: ConnectionId) -> Option<SubscriberId> {
        self.bindings.read().by_connection.get(&connection).copied()
    }

    /// Remove both directions for a connection.
    ///
    /// Returns `false` if the connection was not bound, e.g. because a newer
    /// connection superseded it.
    pub fn unbind(&self, connection: ConnectionId) -> bool {
        let mut bindings = self.bindings.write();
        let Some(subscriber) = bindings.by_connection.remove(&connection) else {
            return false;
        };
        if bindings
            .by_subscriber
            .get(&subscriber)
            .is_some_and(|c| c.id() == connection)
        {
            bindings.by_subscriber.remove(&subscriber);
        }
        true
    }

    /// Number of bound subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().by_subscriber.len()
    }

    /// Whether no subscriber is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
