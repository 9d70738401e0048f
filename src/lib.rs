//! # auditbus
//!
//! `auditbus` is a real-time publish/subscribe broker. Producers publish
//! messages to named topics over WebSockets, connected consumers receive
//! them as they arrive, and every publish and every consumption
//! acknowledgment is durably recorded for audit and monitoring.
//!
//! ## Core Modules
//!
//! - `broker`: subscription registry, dispatch engine, consumption ledger
//!   and admin event notifier.
//! - `persistence`: the append-only audit store (`sled`).
//! - `transport`: the WebSocket server and its JSON protocol.
//! - `client`: a consumer/producer stub with per-topic handlers.
//! - `config`: layered configuration loading.
//! - `utils`: error type and logging.
//!
//! Delivery is a point-in-time fan-out: a consumer that is offline when a
//! message is published never receives it.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;

pub use broker::Broker;
pub use utils::{BrokerError, Result};
