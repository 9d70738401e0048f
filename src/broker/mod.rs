//! Broker core
//!
//! - `registry`: which live sessions want which topics
//! - `engine`: the `Broker`, sole entry point for publishing
//! - `ledger`: append-only consumption acknowledgments
//! - `notifier`: live admin events for monitoring observers
//!
//! The transport talks to the core only through `Broker`.

pub mod engine;
pub mod ledger;
pub mod message;
pub mod notifier;
pub mod registry;
pub mod session;
pub mod topic;

pub use engine::Broker;
pub use message::{Consumption, Delivery, Message, StoredMessage, Subscription};
pub use notifier::{AdminEvent, AdminNotifier};
pub use session::{Session, SessionId};

/// Wall-clock milliseconds since the UNIX epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
