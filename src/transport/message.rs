use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::broker::message::{Consumption, Delivery, StoredMessage, Subscription};
use crate::broker::notifier::AdminEvent;

/// Frames a client may send. Missing string fields deserialize as empty so
/// the broker can reject them with a descriptive error.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default)]
        consumer: String,
        #[serde(default)]
        topics: Vec<String>,
    },

    #[serde(rename = "publish")]
    Publish {
        #[serde(default)]
        topic: String,
        #[serde(default, deserialize_with = "payload_text")]
        message: String,
        producer: Option<String>,
        message_id: Option<String>,
    },

    #[serde(rename = "consumed")]
    Consumed {
        #[serde(default)]
        consumer: String,
        #[serde(default)]
        topic: String,
        #[serde(default)]
        message_id: String,
        #[serde(default, deserialize_with = "payload_text")]
        message: String,
    },

    /// Join the admin channel.
    #[serde(rename = "watch")]
    Watch,

    #[serde(rename = "list_messages")]
    ListMessages,

    #[serde(rename = "list_subscriptions")]
    ListSubscriptions,

    #[serde(rename = "list_consumptions")]
    ListConsumptions,
}

/// Payloads are opaque text. A JSON string is taken as-is; any other value
/// is kept as its JSON encoding, and `null` counts as missing.
fn payload_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "subscribed")]
    Subscribed { topics: Vec<String> },

    #[serde(rename = "published")]
    Published { message_id: String },

    #[serde(rename = "recorded")]
    Recorded { message_id: String },

    #[serde(rename = "message")]
    Message {
        topic: String,
        message_id: String,
        message: String,
        producer: String,
    },

    #[serde(rename = "watching")]
    Watching,

    #[serde(rename = "admin")]
    Admin { event: AdminEvent },

    /// The observer fell behind and `missed` admin events were skipped.
    #[serde(rename = "lagged")]
    Lagged { missed: u64 },

    #[serde(rename = "messages")]
    Messages { rows: Vec<StoredMessage> },

    #[serde(rename = "subscriptions")]
    Subscriptions { rows: Vec<Subscription> },

    #[serde(rename = "consumptions")]
    Consumptions { rows: Vec<Consumption> },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

impl From<Delivery> for ServerMessage {
    fn from(d: Delivery) -> Self {
        Self::Message {
            topic: d.topic,
            message_id: d.message_id,
            message: d.message,
            producer: d.producer,
        }
    }
}
