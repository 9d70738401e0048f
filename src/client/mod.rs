//! The `client` module is a small consumer/producer stub for talking to the
//! broker over WebSockets.
//!
//! Consumers register one handler per topic; the stub invokes them one at a
//! time, in arrival order, and acknowledges every delivery with a `consumed`
//! frame.

pub mod pubsub_client;

pub use pubsub_client::{PubSubClient, publish};
