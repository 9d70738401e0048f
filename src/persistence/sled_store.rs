//! Persistence layer backed by `sled`
//!
//! One tree per audit table:
//! - `messages`: key is a sled-generated id (big-endian, so iteration follows
//!   insertion order); the id doubles as the autoincrement row id.
//! - `consumptions`: same keying as `messages`.
//! - `subscriptions`: key is `sid NUL topic`, which makes (sid, topic) the
//!   primary key and lets a session's rows be found by prefix.
//!
//! Values are JSON rows. When `flush_on_write` is set every append is flushed
//! before it returns.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::broker::message::{Consumption, Message, StoredMessage, Subscription};
use crate::persistence::Storage;
use crate::utils::Result;

const MESSAGES: &str = "messages";
const CONSUMPTIONS: &str = "consumptions";
const SUBSCRIPTIONS: &str = "subscriptions";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    messages: Tree,
    consumptions: Tree,
    subscriptions: Tree,
    flush_on_write: bool,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    ///
    /// The subscription table only mirrors live sessions, and no session
    /// survives a restart, so it is emptied here.
    pub fn open(path: &str, flush_on_write: bool) -> Result<Self> {
        let db = sled::open(path)?;
        let store = Self::from_db(db, flush_on_write)?;
        store.subscriptions.clear()?;
        info!(path, "opened audit store");
        Ok(store)
    }

    /// A throwaway store that lives in memory only.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, false)
    }

    fn from_db(db: Db, flush_on_write: bool) -> Result<Self> {
        Ok(Self {
            messages: db.open_tree(MESSAGES)?,
            consumptions: db.open_tree(CONSUMPTIONS)?,
            subscriptions: db.open_tree(SUBSCRIPTIONS)?,
            db,
            flush_on_write,
        })
    }

    fn append<T: Serialize>(&self, tree: &Tree, row: &T) -> Result<u64> {
        let value = serde_json::to_vec(row)?;
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes(), value)?;
        if self.flush_on_write {
            tree.flush()?;
        }
        Ok(id)
    }

    fn subscription_key(session: &str, topic: &str) -> Vec<u8> {
        let mut key = Self::session_prefix(session);
        key.extend_from_slice(topic.as_bytes());
        key
    }

    fn session_prefix(session: &str) -> Vec<u8> {
        let mut key = session.as_bytes().to_vec();
        key.push(0);
        key
    }

    /// Rows of `tree` in key order.
    fn rows<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<(u64, T)>> {
        tree.iter()
            .map(|entry| -> Result<(u64, T)> {
                let (key, value) = entry?;
                let key: &[u8] = &key;
                // subscription keys are not ids and read back as 0
                let id = <[u8; 8]>::try_from(key)
                    .map(u64::from_be_bytes)
                    .unwrap_or_default();
                Ok((id, serde_json::from_slice(&value)?))
            })
            .collect()
    }
}

impl Storage for SledStore {
    fn append_message(&self, message: &Message) -> Result<u64> {
        let id = self.append(&self.messages, message)?;
        debug!(id, message_id = %message.message_id, "message appended");
        Ok(id)
    }

    fn append_consumption(&self, consumption: &Consumption) -> Result<()> {
        self.append(&self.consumptions, consumption)?;
        Ok(())
    }

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let key = Self::subscription_key(&subscription.session, &subscription.topic);
        self.subscriptions
            .insert(key, serde_json::to_vec(subscription)?)?;
        Ok(())
    }

    fn remove_subscriptions(&self, session: &str) -> Result<()> {
        let keys = self
            .subscriptions
            .scan_prefix(Self::session_prefix(session))
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in keys {
            self.subscriptions.remove(key)?;
        }
        Ok(())
    }

    fn messages(&self) -> Result<Vec<StoredMessage>> {
        let mut rows: Vec<StoredMessage> = Self::rows::<Message>(&self.messages)?
            .into_iter()
            .map(|(id, message)| StoredMessage { id, message })
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn last_message_timestamp(&self) -> Result<Option<i64>> {
        match self.messages.last()? {
            Some((_, value)) => {
                let message: Message = serde_json::from_slice(&value)?;
                Ok(Some(message.timestamp))
            }
            None => Ok(None),
        }
    }

    fn subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(Self::rows(&self.subscriptions)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    fn consumptions(&self) -> Result<Vec<Consumption>> {
        let mut rows: Vec<Consumption> = Self::rows(&self.consumptions)?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        rows.reverse();
        Ok(rows)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("flush_on_write", &self.flush_on_write)
            .finish()
    }
}
