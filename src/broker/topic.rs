//! Topic management
//!
//! A `Topic` holds the bindings of the sessions currently interested in one
//! topic name, keyed by session id. A session is bound at most once, so a
//! repeated subscribe is a no-op.
//!
//! Concurrency note: `Topic` is not synchronized itself; the registry owns
//! every `Topic` behind its lock.

use std::collections::HashMap;

use crate::broker::session::{Session, SessionId};

#[derive(Debug, Clone)]
pub struct Binding {
    pub session: Session,
    pub consumer: String,
    pub connected_at: i64,
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SessionId, Binding>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Bind a session to the topic. Returns `false` when the session was
    /// already bound, in which case the existing binding is kept.
    pub fn subscribe(&mut self, binding: Binding) -> bool {
        if self.subscribers.contains_key(&binding.session.id) {
            return false;
        }
        self.subscribers.insert(binding.session.id.clone(), binding);
        true
    }

    /// Remove a session's binding, returning it if there was one.
    pub fn unsubscribe(&mut self, id: &str) -> Option<Binding> {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
