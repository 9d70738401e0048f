//! Session representation
//!
//! A `Session` is one live connection as seen by the broker: an id plus the
//! sending side of the connection's outbound delivery channel. The channel is
//! bounded and FIFO, so deliveries reach a session in the order they were
//! dispatched, and a consumer that stops reading loses deliveries instead of
//! growing the server's memory.

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use uuid::Uuid;

use crate::broker::message::Delivery;

pub type SessionId = String;

/// Deliveries buffered per session when no capacity is configured.
pub const DEFAULT_SESSION_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    sender: Sender<Delivery>,
}

impl Session {
    /// Create a session with a fresh `session-<uuid>` id around `sender`.
    pub fn new(sender: Sender<Delivery>) -> Self {
        Self::with_id(format!("session-{}", Uuid::new_v4()), sender)
    }

    pub fn with_id(id: impl Into<SessionId>, sender: Sender<Delivery>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }

    /// Create a session together with the receiving end of its channel.
    pub fn channel() -> (Self, Receiver<Delivery>) {
        Self::bounded(DEFAULT_SESSION_BUFFER)
    }

    /// Like `channel`, buffering at most `capacity` undelivered messages.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Hand a delivery to the connection without waiting. Fails when the
    /// buffer is full or the connection's receiver is gone.
    pub fn deliver(&self, delivery: Delivery) -> Result<(), TrySendError<Delivery>> {
        self.sender.try_send(delivery)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
