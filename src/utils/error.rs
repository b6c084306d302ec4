//! The `error` module defines the error taxonomy of the broker engine.
//!
//! Routing and declaration errors are synchronous and local to the call
//! that triggered them. Delivery-side errors surface only through the
//! ack/nack contract, never into unrelated call paths.

use thiserror::Error;

/// Errors surfaced by the broker engine's public API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Redeclaring an exchange or queue with incompatible arguments, or
    /// binding with a spec the exchange type cannot interpret.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation referenced an exchange that was never declared.
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    /// Operation referenced a queue that was never declared or was deleted.
    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    /// A mandatory publish matched no bound queue.
    #[error("no queue matched message published to '{exchange}' with routing key '{routing_key}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    /// Ack or nack referenced a delivery id that is not outstanding.
    /// Acking twice is a protocol violation, not a silent no-op.
    #[error("unknown delivery id {0}")]
    UnknownDeliveryId(u64),

    /// Operation referenced a consumer tag that is not registered.
    #[error("unknown consumer '{0}'")]
    UnknownConsumer(String),
}
