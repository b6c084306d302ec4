//! # EmberMQ
//!
//! `embermq` is an embeddable, in-memory message broker engine built with Rust.
//! It implements exchange-based routing (direct, topic and header matching),
//! priority queues with acknowledgment-based at-least-once delivery, and
//! TTL-based delayed delivery via dead-letter re-publishing. Transport,
//! connection management and process wiring are left to the embedding host,
//! which interacts purely through the publish/consume/ack contract.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: the engine core — exchange registry, binding matcher, queues,
//!   delivery dispatcher and the dead-letter scheduler, composed behind the
//!   [`Broker`] façade.
//! - `config`: loading and merging of engine configuration.
//! - `persistence`: the pass-through storage hook consulted at enqueue/ack
//!   boundaries (currently backed by `sled`).
//! - `utils`: shared utilities — the error taxonomy and logging setup.

pub mod broker;
pub mod config;
pub mod persistence;
pub mod utils;

pub use broker::Broker;
pub use broker::dispatch::ConsumerTag;
pub use broker::exchange::{ExchangeType, MatchMode};
pub use broker::message::{Delivery, Headers, PublishProperties};
pub use broker::queue::QueueOptions;
pub use utils::error::BrokerError;
