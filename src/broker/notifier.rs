//! Admin event notifier
//!
//! Monitoring observers (not topic subscribers) receive a live stream of
//! registry and ledger activity over a `tokio::sync::broadcast` channel. Each
//! event carries enough data to rebuild the registry and ledger views without
//! polling the store.
//!
//! Publishing never blocks: an observer that falls more than the channel
//! capacity behind sees `RecvError::Lagged` and skips ahead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::broker::message::{Consumption, Message, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdminEvent {
    NewClient {
        session: String,
        consumer: String,
        topic: String,
        connected_at: i64,
    },
    ClientDisconnected {
        session: String,
        consumer: String,
        topic: String,
    },
    NewMessage {
        topic: String,
        message_id: String,
        message: String,
        producer: String,
        timestamp: i64,
    },
    NewConsumption {
        consumer: String,
        topic: String,
        message_id: String,
        message: String,
        timestamp: i64,
    },
}

impl AdminEvent {
    pub fn client_joined(binding: &Subscription) -> Self {
        Self::NewClient {
            session: binding.session.clone(),
            consumer: binding.consumer.clone(),
            topic: binding.topic.clone(),
            connected_at: binding.connected_at,
        }
    }

    pub fn client_left(binding: &Subscription) -> Self {
        Self::ClientDisconnected {
            session: binding.session.clone(),
            consumer: binding.consumer.clone(),
            topic: binding.topic.clone(),
        }
    }

    pub fn published(message: &Message) -> Self {
        Self::NewMessage {
            topic: message.topic.clone(),
            message_id: message.message_id.clone(),
            message: message.payload.clone(),
            producer: message.producer.clone(),
            timestamp: message.timestamp,
        }
    }

    pub fn consumed(consumption: &Consumption) -> Self {
        Self::NewConsumption {
            consumer: consumption.consumer.clone(),
            topic: consumption.topic.clone(),
            message_id: consumption.message_id.clone(),
            message: consumption.message.clone(),
            timestamp: consumption.timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminNotifier {
    sender: broadcast::Sender<AdminEvent>,
}

impl AdminNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Join the admin channel. Only events sent after this call are seen.
    pub fn watch(&self) -> broadcast::Receiver<AdminEvent> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn notify(&self, event: AdminEvent) {
        // no observers is the common case, not an error
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(?event, "admin event dropped, no observers");
        }
    }
}

impl Default for AdminNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}
