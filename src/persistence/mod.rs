//! The `persistence` module is the broker's durable audit trail.
//!
//! The core only ever appends to it (messages, consumptions) or mirrors the
//! live subscription table into it; the read-back queries exist for
//! monitoring. The production store is `sled`, embedded in the process.

pub mod sled_store;

use crate::broker::message::{Consumption, Message, StoredMessage, Subscription};
use crate::utils::Result;

pub use sled_store::SledStore;

/// Append-only write interface plus read-back queries.
pub trait Storage: Send + Sync {
    /// Durably record a published message, returning its row id.
    fn append_message(&self, message: &Message) -> Result<u64>;

    fn append_consumption(&self, consumption: &Consumption) -> Result<()>;

    /// Insert or replace the (sid, topic) subscription row.
    fn put_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Drop every subscription row of `session`.
    fn remove_subscriptions(&self, session: &str) -> Result<()>;

    /// Published messages, newest first.
    fn messages(&self) -> Result<Vec<StoredMessage>>;

    fn subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Consumption rows, newest first.
    fn consumptions(&self) -> Result<Vec<Consumption>>;

    /// Timestamp of the most recently stored message, if any.
    fn last_message_timestamp(&self) -> Result<Option<i64>> {
        Ok(self
            .messages()?
            .first()
            .map(|row| row.message.timestamp))
    }
}
