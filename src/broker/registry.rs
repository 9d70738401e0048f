//! Subscription registry
//!
//! Tracks which live sessions want which topics and answers "who receives a
//! message published to this topic right now". All state sits behind one
//! mutex that is never exposed; every operation takes it, does its work and
//! releases it before notifying admin observers. Readers get an owned
//! snapshot, so callers can deliver to it without holding the lock.
//!
//! Registry state is volatile. Nothing here is rebuilt from the store after a
//! restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::broker::message::Subscription;
use crate::broker::notifier::{AdminEvent, AdminNotifier};
use crate::broker::now_millis;
use crate::broker::session::{Session, SessionId};
use crate::broker::topic::{Binding, Topic};
use crate::utils::{BrokerError, Result};

/// One entry of a `subscribers_of` snapshot.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub session: Session,
    pub consumer: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    topics: HashMap<String, Topic>,
    /// Reverse index: the topics each session is bound to.
    sessions: HashMap<SessionId, HashSet<String>>,
}

#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    notifier: AdminNotifier,
}

impl SubscriptionRegistry {
    pub fn new(notifier: AdminNotifier) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            notifier,
        }
    }

    // Every mutation leaves both maps consistent before the guard drops, so a
    // poisoned lock still guards valid state.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `session` to each topic in `topics` it is not already bound to.
    ///
    /// The whole request is validated first; an invalid request changes
    /// nothing. Returns the bindings that were newly created, and emits one
    /// "new client" admin event for each of them.
    pub fn subscribe(
        &self,
        session: &Session,
        consumer: &str,
        topics: &[String],
    ) -> Result<Vec<Subscription>> {
        if consumer.is_empty() {
            return Err(BrokerError::validation("consumer must not be empty"));
        }
        if topics.is_empty() {
            return Err(BrokerError::validation("topics must not be empty"));
        }
        if topics.iter().any(|t| t.is_empty()) {
            return Err(BrokerError::validation("topic names must not be empty"));
        }

        let connected_at = now_millis();
        let mut created = Vec::new();
        {
            let mut state = self.lock();
            for name in topics {
                let topic = state
                    .topics
                    .entry(name.clone())
                    .or_insert_with(|| Topic::new(name));
                let fresh = topic.subscribe(Binding {
                    session: session.clone(),
                    consumer: consumer.to_string(),
                    connected_at,
                });
                if !fresh {
                    continue;
                }
                state
                    .sessions
                    .entry(session.id.clone())
                    .or_default()
                    .insert(name.clone());
                created.push(Subscription {
                    session: session.id.clone(),
                    consumer: consumer.to_string(),
                    topic: name.clone(),
                    connected_at,
                });
            }
        }

        for binding in &created {
            debug!(session = %binding.session, topic = %binding.topic, "binding created");
            self.notifier.notify(AdminEvent::client_joined(binding));
        }
        Ok(created)
    }

    /// Remove every binding owned by `session` in one step. Emits one
    /// "client disconnected" admin event per removed binding.
    pub fn unsubscribe_all(&self, session: &str) -> Vec<Subscription> {
        let mut removed = Vec::new();
        {
            let mut state = self.lock();
            let Some(names) = state.sessions.remove(session) else {
                return removed;
            };
            for name in names {
                let Some(topic) = state.topics.get_mut(&name) else {
                    continue;
                };
                if let Some(binding) = topic.unsubscribe(session) {
                    removed.push(Subscription {
                        session: session.to_string(),
                        consumer: binding.consumer,
                        topic: name.clone(),
                        connected_at: binding.connected_at,
                    });
                }
                if topic.is_empty() {
                    state.topics.remove(&name);
                }
            }
        }

        removed.sort_by(|a, b| a.topic.cmp(&b.topic));
        for binding in &removed {
            debug!(session = %binding.session, topic = %binding.topic, "binding removed");
            self.notifier.notify(AdminEvent::client_left(binding));
        }
        removed
    }

    /// Snapshot of the sessions bound to `topic` at the instant of the call.
    pub fn subscribers_of(&self, topic: &str) -> Vec<Subscriber> {
        let state = self.lock();
        state
            .topics
            .get(topic)
            .map(|t| {
                t.subscribers
                    .values()
                    .map(|b| Subscriber {
                        session: b.session.clone(),
                        consumer: b.consumer.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Topics `session` is currently bound to, sorted.
    pub fn topics_of(&self, session: &str) -> Vec<String> {
        let state = self.lock();
        let mut topics: Vec<String> = state
            .sessions
            .get(session)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Total number of (session, topic) bindings.
    pub fn binding_count(&self) -> usize {
        self.lock().sessions.values().map(HashSet::len).sum()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}
