use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::message::{DeadLetterTarget, Delivery, Message};
use crate::utils::error::BrokerError;

/// Declaration arguments for a queue, mirroring the argument names the
/// transport boundary honors (`x-max-priority`, `x-message-ttl`,
/// `x-dead-letter-exchange`, `x-dead-letter-routing-key`,
/// `x-queue-mode: lazy`, `durable`, `exclusive`).
///
/// `durable` and `lazy` are storage hints: they decide whether ready
/// messages pass through the persistence hook, and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    /// Priority ceiling. 0 disables priorities entirely: every message is
    /// clamped to 0 and the queue is strictly FIFO.
    pub max_priority: u8,
    pub lazy: bool,
    /// Queue-level default TTL applied when a message carries none.
    pub message_ttl_ms: Option<u64>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

/// Ready-set ordering: priority descending, then enqueue sequence
/// ascending. `BinaryHeap` is a max-heap, so the sequence comparison is
/// reversed to make the earliest entry the greatest among equals.
#[derive(Debug)]
struct ReadyEntry {
    seq: u64,
    message: Message,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

#[derive(Debug)]
struct UnackedEntry {
    seq: u64,
    message: Message,
}

/// Outcome of a nack, acted on by the engine: a requeued message needs
/// its persistence record rewritten under the new sequence, a rejected
/// one is dead-lettered or dropped.
#[derive(Debug)]
pub enum NackOutcome {
    Requeued {
        old_seq: u64,
        new_seq: u64,
        message: Message,
    },
    Rejected {
        seq: u64,
        message: Message,
    },
}

/// An ordered, priority-aware, acknowledgment-tracking holding area for
/// one logical consumer group.
///
/// A message is either in the ready set or in the unacknowledged map,
/// never both. Delivery ids are assigned per queue, monotonically, and
/// correlate acks with deliveries.
#[derive(Debug)]
pub struct Queue {
    name: String,
    options: QueueOptions,
    ready: BinaryHeap<ReadyEntry>,
    unacked: HashMap<u64, UnackedEntry>,
    seq: u64,
    next_delivery_id: u64,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            ready: BinaryHeap::new(),
            unacked: HashMap::new(),
            seq: 0,
            next_delivery_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Inserts a message into the ready ordering and returns its enqueue
    /// sequence. TTL handling happens before this point; a message that
    /// reaches the ready set is visible to consumers.
    pub fn enqueue(&mut self, mut message: Message) -> u64 {
        message.priority = message.priority.min(self.options.max_priority);
        self.seq += 1;
        let seq = self.seq;
        self.ready.push(ReadyEntry { seq, message });
        seq
    }

    /// Pops the highest-priority, earliest-enqueued ready message, assigns
    /// it the next delivery id and moves it to the unacknowledged map.
    /// Non-blocking: returns `None` on an empty ready set.
    pub fn deliver_next(&mut self) -> Option<Delivery> {
        let entry = self.ready.pop()?;
        self.next_delivery_id += 1;
        let delivery_id = self.next_delivery_id;
        let delivery = Delivery {
            queue: self.name.clone(),
            delivery_id,
            payload: entry.message.payload.clone(),
            routing_key: entry.message.routing_key.clone(),
            headers: entry.message.headers.clone(),
            redelivered: entry.message.redelivered,
        };
        self.unacked.insert(
            delivery_id,
            UnackedEntry {
                seq: entry.seq,
                message: entry.message,
            },
        );
        Some(delivery)
    }

    /// Retires a delivered message. Returns its enqueue sequence so the
    /// engine can drop the persistence record. An id that is not
    /// outstanding (including a second ack) is a protocol violation.
    pub fn ack(&mut self, delivery_id: u64) -> Result<u64, BrokerError> {
        self.unacked
            .remove(&delivery_id)
            .map(|entry| entry.seq)
            .ok_or(BrokerError::UnknownDeliveryId(delivery_id))
    }

    /// Rejects a delivered message. With `requeue` the message re-enters
    /// the ready set marked redelivered, with a fresh sequence: it may
    /// reorder relative to same-priority peers. Without `requeue` the
    /// caller routes it to the dead-letter target or drops it.
    pub fn nack(&mut self, delivery_id: u64, requeue: bool) -> Result<NackOutcome, BrokerError> {
        let entry = self
            .unacked
            .remove(&delivery_id)
            .ok_or(BrokerError::UnknownDeliveryId(delivery_id))?;
        if requeue {
            let mut message = entry.message;
            message.redelivered = true;
            let new_seq = self.enqueue(message.clone());
            Ok(NackOutcome::Requeued {
                old_seq: entry.seq,
                new_seq,
                message,
            })
        } else {
            Ok(NackOutcome::Rejected {
                seq: entry.seq,
                message: entry.message,
            })
        }
    }

    /// Dead-letter target for a rejected or expired message: the
    /// message-level target wins over the queue-level default.
    pub fn dead_letter_target(&self, message: &Message) -> Option<DeadLetterTarget> {
        if let Some(target) = &message.dead_letter {
            return Some(target.clone());
        }
        self.options
            .dead_letter_exchange
            .as_ref()
            .map(|exchange| DeadLetterTarget {
                exchange: exchange.clone(),
                routing_key: self
                    .options
                    .dead_letter_routing_key
                    .clone()
                    .unwrap_or_else(|| message.routing_key.clone()),
            })
    }
}
