use std::collections::HashMap;

/// String-keyed header map carried by published messages and inspected by
/// header-exchange bindings. Dynamic by design; there is no schema.
pub type Headers = HashMap<String, String>;

/// An exchange/routing-key pair a message is re-published through when it
/// expires or is rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    pub exchange: String,
    pub routing_key: String,
}

/// A message as held inside the engine.
///
/// Created by `publish`, mutated only by the engine itself: the
/// `redelivered` flag flips on nack-with-requeue, and TTL/dead-letter
/// fields are cleared when the scheduler re-publishes an expired message
/// so it cannot cycle through the scheduler again.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub headers: Headers,
    /// Clamped to the owning queue's priority ceiling at enqueue time.
    pub priority: u8,
    pub ttl_ms: Option<u64>,
    pub dead_letter: Option<DeadLetterTarget>,
    /// Durability hint from the publisher. Non-behavioral for delivery.
    pub persistent: bool,
    pub redelivered: bool,
}

impl Message {
    /// Builds an engine message from a publish request.
    pub fn from_publish(routing_key: &str, payload: Vec<u8>, props: &PublishProperties) -> Self {
        let dead_letter = match (&props.dead_letter_exchange, &props.dead_letter_routing_key) {
            (Some(exchange), key) => Some(DeadLetterTarget {
                exchange: exchange.clone(),
                routing_key: key.clone().unwrap_or_else(|| routing_key.to_string()),
            }),
            (None, _) => None,
        };
        Self {
            payload,
            routing_key: routing_key.to_string(),
            headers: props.headers.clone(),
            priority: props.priority,
            ttl_ms: props.expiration_ms,
            dead_letter,
            persistent: props.persistent,
            redelivered: false,
        }
    }
}

/// Per-message publish properties, mirroring the argument names honored at
/// the transport boundary (`priority`, `expiration`, `headers`,
/// `persistent`) plus the mandatory-routing flag.
#[derive(Debug, Clone, Default)]
pub struct PublishProperties {
    pub priority: u8,
    /// Per-message TTL in milliseconds. Overrides the queue-level
    /// `x-message-ttl` default when both are present.
    pub expiration_ms: Option<u64>,
    pub headers: Headers,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub persistent: bool,
    /// When set, a publish matching zero queues is an `Unroutable` error
    /// instead of a silent drop.
    pub mandatory: bool,
}

/// A delivery handed to a consumer. The `(queue, delivery_id)` pair
/// correlates the subsequent ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub delivery_id: u64,
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub headers: Headers,
    pub redelivered: bool,
}
