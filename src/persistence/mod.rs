//! The `persistence` module is the engine's pass-through storage hook.
//!
//! Queues consult it only at enqueue/ack/nack boundaries; the core never
//! assumes synchronous durability. Durable and lazy queues write each
//! ready message here and delete it on ack.
//!
//! Backed by `sled` as an embedded key-value store, one tree per queue.

pub mod sled_store;

pub use sled_store::{Persistence, StoredMessage};

#[cfg(test)]
mod tests;
