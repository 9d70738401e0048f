//! Message definitions for the broker
//!
//! These are both the in-memory representation used by the core and the row
//! shapes persisted by the store. Serialized field names follow the audit
//! schema other tooling reads (`message` is the payload column, `sid` the
//! session column).
//!
//! Timestamps are milliseconds since the UNIX epoch.

use serde::{Deserialize, Serialize};

/// One publish event. Created by the dispatch engine, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub message_id: String,
    /// Opaque application data; the broker never interprets it.
    #[serde(rename = "message")]
    pub payload: String,
    pub producer: String,
    pub timestamp: i64,
}

impl Message {
    /// The event pushed to each subscriber of the message's topic.
    pub fn delivery(&self) -> Delivery {
        Delivery {
            topic: self.topic.clone(),
            message_id: self.message_id.clone(),
            message: self.payload.clone(),
            producer: self.producer.clone(),
        }
    }
}

/// A message as read back from the store, with its autoincrement row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: u64,
    #[serde(flatten)]
    pub message: Message,
}

/// What a subscriber receives for one publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: String,
    pub message_id: String,
    pub message: String,
    pub producer: String,
}

/// A live interest binding of one session to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "sid")]
    pub session: String,
    pub consumer: String,
    pub topic: String,
    pub connected_at: i64,
}

/// A recorded acknowledgment that `consumer` processed a message.
///
/// Nothing checks that `message_id` was ever published or delivered to the
/// consumer, and the same acknowledgment may be recorded any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumption {
    pub consumer: String,
    pub topic: String,
    pub message_id: String,
    pub message: String,
    pub timestamp: i64,
}
