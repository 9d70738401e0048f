//! Client stub
//!
//! `PubSubClient` connects as one consumer, subscribes to its topics and
//! runs until the server closes the connection. Handlers are plain closures
//! keyed by topic; a delivery for a topic without a handler is logged and
//! still acknowledged.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Delivery;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{BrokerError, Result};

pub type Handler = Box<dyn Fn(&Delivery) + Send + Sync>;

pub struct PubSubClient {
    url: String,
    consumer: String,
    topics: Vec<String>,
    handlers: HashMap<String, Handler>,
}

impl PubSubClient {
    pub fn new(url: impl Into<String>, consumer: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            url: url.into(),
            consumer: consumer.into(),
            topics,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `topic`, replacing any previous one.
    pub fn register_handler<F>(&mut self, topic: impl Into<String>, handler: F)
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.handlers.insert(topic.into(), Box::new(handler));
    }

    /// Run `delivery` through its topic's handler. Returns `false` when no
    /// handler is registered for the topic.
    pub fn dispatch(&self, delivery: &Delivery) -> bool {
        match self.handlers.get(&delivery.topic) {
            Some(handler) => {
                handler(delivery);
                true
            }
            None => {
                warn!(consumer = %self.consumer, topic = %delivery.topic, "no handler for topic");
                false
            }
        }
    }

    /// The acknowledgment sent after `delivery` was handled.
    pub fn acknowledgment(&self, delivery: &Delivery) -> ClientMessage {
        ClientMessage::Consumed {
            consumer: self.consumer.clone(),
            topic: delivery.topic.clone(),
            message_id: delivery.message_id.clone(),
            message: delivery.message.clone(),
        }
    }

    /// Connect, subscribe and process deliveries until the connection ends.
    pub async fn run(&self) -> Result<()> {
        info!(consumer = %self.consumer, topics = ?self.topics, "connecting to {}", self.url);
        let (mut ws_stream, _response) = connect_async(self.url.as_str()).await?;

        let subscribe = ClientMessage::Subscribe {
            consumer: self.consumer.clone(),
            topics: self.topics.clone(),
        };
        ws_stream
            .send(WsMessage::text(serde_json::to_string(&subscribe)?))
            .await?;

        while let Some(frame) = ws_stream.next().await {
            let text = match frame? {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<ServerMessage>(text.as_str())? {
                ServerMessage::Message {
                    topic,
                    message_id,
                    message,
                    producer,
                } => {
                    let delivery = Delivery {
                        topic,
                        message_id,
                        message,
                        producer,
                    };
                    info!(
                        consumer = %self.consumer,
                        topic = %delivery.topic,
                        producer = %delivery.producer,
                        message_id = %delivery.message_id,
                        "received message"
                    );
                    self.dispatch(&delivery);
                    let ack = self.acknowledgment(&delivery);
                    ws_stream
                        .send(WsMessage::text(serde_json::to_string(&ack)?))
                        .await?;
                }
                ServerMessage::Subscribed { topics } => {
                    info!(consumer = %self.consumer, ?topics, "subscribed");
                }
                ServerMessage::Error { message } => {
                    warn!(consumer = %self.consumer, "broker error: {message}");
                }
                other => debug!(consumer = %self.consumer, ?other, "ignored frame"),
            }
        }

        info!(consumer = %self.consumer, "disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient")
            .field("url", &self.url)
            .field("consumer", &self.consumer)
            .field("topics", &self.topics)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Publish one message over a fresh connection and return the message id the
/// broker assigned.
pub async fn publish(
    url: &str,
    topic: &str,
    message: &str,
    producer: &str,
    message_id: Option<&str>,
) -> Result<String> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let request = ClientMessage::Publish {
        topic: topic.to_string(),
        message: message.to_string(),
        producer: Some(producer.to_string()),
        message_id: message_id.map(str::to_string),
    };
    ws_stream
        .send(WsMessage::text(serde_json::to_string(&request)?))
        .await?;

    let outcome = loop {
        let Some(frame) = ws_stream.next().await else {
            break Err(BrokerError::Protocol(
                "connection closed before publish was acknowledged".to_string(),
            ));
        };
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text.as_str())? {
            ServerMessage::Published { message_id } => break Ok(message_id),
            ServerMessage::Error { message } => break Err(BrokerError::Rejected(message)),
            other => {
                break Err(BrokerError::Protocol(format!(
                    "unexpected reply to publish: {other:?}"
                )));
            }
        }
    };

    let _ = ws_stream.close(None).await;
    outcome
}
