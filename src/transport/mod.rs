//! The `transport` module is responsible for network communication with
//! producers, consumers and monitoring observers over WebSockets.
//!
//! It defines the JSON protocol spoken on the socket and the server that
//! maps each frame onto a broker operation.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{serve, start_websocket_server};

#[cfg(test)]
mod tests;
