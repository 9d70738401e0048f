//! The `utils` module provides definitions shared across the `auditbus`
//! application: the crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};

#[cfg(test)]
mod tests;
