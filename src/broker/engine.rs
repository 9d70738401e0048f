//! Broker engine
//!
//! `Broker` is the dispatch engine and the facade the transport uses for
//! every core operation:
//! - publishing: assign identity and timestamp, persist, snapshot the topic's
//!   subscribers, hand the message to each of them, notify admin observers
//! - subscribing and disconnecting sessions through the registry, mirroring
//!   the bindings into the store's subscription table
//! - recording consumptions through the ledger
//! - read-back queries for monitoring
//!
//! Concurrency and usage notes:
//! - All methods take `&self`; share the broker as `Arc<Broker>`. There is no
//!   outer lock.
//! - Publishes are serialized by a sequencer lock so timestamps, row order,
//!   per-subscriber delivery order and admin event order agree. The sequencer
//!   starts from the newest stored timestamp, so it holds across restarts.
//!   The registry lock is only held while the subscriber snapshot is taken.
//! - Delivery is a non-blocking push onto each session's bounded channel; the
//!   connection's writer task does the network I/O. A session whose buffer is
//!   full misses the delivery.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::mpsc::{Receiver, error::TrySendError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::ledger::ConsumptionLedger;
use crate::broker::message::{Consumption, Delivery, Message, StoredMessage, Subscription};
use crate::broker::notifier::{AdminEvent, AdminNotifier};
use crate::broker::now_millis;
use crate::broker::registry::SubscriptionRegistry;
use crate::broker::session::{DEFAULT_SESSION_BUFFER, Session};
use crate::config::BrokerSettings;
use crate::persistence::{SledStore, Storage};
use crate::utils::{BrokerError, Result};

pub struct Broker {
    registry: SubscriptionRegistry,
    ledger: ConsumptionLedger,
    notifier: AdminNotifier,
    store: Arc<dyn Storage>,
    /// Timestamp of the last stored message.
    sequencer: Mutex<i64>,
    session_buffer: usize,
}

impl Broker {
    /// Producer recorded when a publish does not name one.
    pub const ANONYMOUS_PRODUCER: &'static str = "anonymous";

    pub fn new(store: Arc<dyn Storage>, admin_buffer: usize) -> Self {
        let notifier = AdminNotifier::new(admin_buffer);
        let last = match store.last_message_timestamp() {
            Ok(last) => last.unwrap_or(i64::MIN),
            Err(e) => {
                warn!("could not read last message timestamp: {e}");
                i64::MIN
            }
        };
        Self {
            registry: SubscriptionRegistry::new(notifier.clone()),
            ledger: ConsumptionLedger::new(store.clone(), notifier.clone()),
            notifier,
            store,
            sequencer: Mutex::new(last),
            session_buffer: DEFAULT_SESSION_BUFFER,
        }
    }

    /// Set the per-session delivery buffer used by `open_session`.
    pub fn with_session_buffer(mut self, capacity: usize) -> Self {
        self.session_buffer = capacity.max(1);
        self
    }

    /// Open the sled store described by `settings` and build a broker on it.
    pub fn open(settings: &BrokerSettings) -> Result<Self> {
        let store = SledStore::open(&settings.database_path, settings.flush_on_write)?;
        Ok(Self::new(Arc::new(store), settings.admin_buffer)
            .with_session_buffer(settings.session_buffer))
    }

    /// A new session sized to this broker's delivery buffer.
    pub fn open_session(&self) -> (Session, Receiver<Delivery>) {
        Session::bounded(self.session_buffer)
    }

    /// Publish `payload` to `topic` and return the message id.
    ///
    /// Nothing is dispatched unless the message was stored first. A session
    /// whose channel is closed or full is skipped without affecting the
    /// others.
    pub fn publish(
        &self,
        topic: &str,
        payload: &str,
        producer: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<String> {
        if topic.is_empty() {
            return Err(BrokerError::validation("topic must not be empty"));
        }
        if payload.is_empty() {
            return Err(BrokerError::validation("message must not be empty"));
        }

        let message_id = match message_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let producer = match producer {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => Self::ANONYMOUS_PRODUCER.to_string(),
        };

        let mut last = self.sequencer.lock().unwrap_or_else(PoisonError::into_inner);
        // never go backwards, even if the wall clock does
        let timestamp = now_millis().max(*last);

        let message = Message {
            topic: topic.to_string(),
            message_id,
            payload: payload.to_string(),
            producer,
            timestamp,
        };

        let row = match self.store.append_message(&message) {
            Ok(row) => row,
            Err(e) => {
                error!(topic, message_id = %message.message_id, "publish failed, not dispatched: {e}");
                return Err(e);
            }
        };
        *last = timestamp;

        let subscribers = self.registry.subscribers_of(topic);
        let delivery = message.delivery();
        let mut delivered = 0usize;
        for subscriber in &subscribers {
            match subscriber.session.deliver(delivery.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!(
                    session = %subscriber.session.id,
                    consumer = %subscriber.consumer,
                    "delivery dropped, session buffer full"
                ),
                Err(TrySendError::Closed(_)) => warn!(
                    session = %subscriber.session.id,
                    consumer = %subscriber.consumer,
                    "delivery failed, session channel closed"
                ),
            }
        }
        self.notifier.notify(AdminEvent::published(&message));
        drop(last);

        info!(
            topic,
            message_id = %message.message_id,
            row,
            delivered,
            subscribers = subscribers.len(),
            "message published"
        );
        Ok(message.message_id)
    }

    /// Bind `session` to `topics` on behalf of `consumer`. Returns the
    /// bindings that did not exist before.
    pub fn subscribe(
        &self,
        session: &Session,
        consumer: &str,
        topics: &[String],
    ) -> Result<Vec<Subscription>> {
        let created = self.registry.subscribe(session, consumer, topics)?;
        for binding in &created {
            // the table is a monitoring mirror; the registry stays authoritative
            if let Err(e) = self.store.put_subscription(binding) {
                warn!(session = %binding.session, topic = %binding.topic, "failed to mirror subscription: {e}");
            }
        }
        if !created.is_empty() {
            info!(session = %session.id, consumer, topics = created.len(), "session subscribed");
        }
        Ok(created)
    }

    /// Drop every binding of `session`. Call once, when the connection ends.
    pub fn disconnect(&self, session: &str) -> Vec<Subscription> {
        let removed = self.registry.unsubscribe_all(session);
        if let Err(e) = self.store.remove_subscriptions(session) {
            warn!(session, "failed to clear mirrored subscriptions: {e}");
        }
        info!(session, bindings = removed.len(), "session disconnected");
        removed
    }

    pub fn consumed(
        &self,
        consumer: &str,
        topic: &str,
        message_id: &str,
        payload: &str,
    ) -> Result<Consumption> {
        self.ledger
            .record_consumption(consumer, topic, message_id, payload)
    }

    pub fn list_messages(&self) -> Result<Vec<StoredMessage>> {
        self.store.messages()
    }

    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.store.subscriptions()
    }

    pub fn list_consumptions(&self) -> Result<Vec<Consumption>> {
        self.ledger.consumptions()
    }

    /// Join the admin channel.
    pub fn watch(&self) -> broadcast::Receiver<AdminEvent> {
        self.notifier.watch()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .field("observers", &self.notifier.observer_count())
            .finish_non_exhaustive()
    }
}
