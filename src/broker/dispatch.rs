use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::message::Delivery;
use super::queue::{NackOutcome, Queue};

pub type ConsumerTag = String;

/// A registered consumer: a delivery channel plus its prefetch window
/// and the delivery ids currently outstanding against it.
#[derive(Debug)]
pub struct Consumer {
    pub tag: ConsumerTag,
    pub queue: String,
    /// Max outstanding unacked deliveries. 0 means unlimited.
    pub prefetch: usize,
    pub sender: UnboundedSender<Delivery>,
    pub outstanding: HashSet<u64>,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.outstanding.len() < self.prefetch
    }
}

/// Delivery dispatcher: tracks consumers per queue and pushes ready
/// messages to them round-robin, respecting each consumer's prefetch
/// window. It never polls; the engine calls `pump` on enqueue, on
/// ack/nack, and on consumer registration, and the dispatcher is
/// otherwise idle.
#[derive(Debug, Default)]
pub struct Dispatcher {
    consumers: HashMap<ConsumerTag, Consumer>,
    /// Per-queue rotation order; the front is the next delivery candidate
    /// and a consumer moves to the back after each delivery.
    rotations: HashMap<String, Vec<ConsumerTag>>,
}

impl Dispatcher {
    pub fn register(&mut self, consumer: Consumer) {
        self.rotations
            .entry(consumer.queue.clone())
            .or_default()
            .push(consumer.tag.clone());
        self.consumers.insert(consumer.tag.clone(), consumer);
    }

    /// Removes a consumer and returns it so the engine can requeue its
    /// in-flight deliveries.
    pub fn unregister(&mut self, tag: &str) -> Option<Consumer> {
        let consumer = self.consumers.remove(tag)?;
        if let Some(order) = self.rotations.get_mut(&consumer.queue) {
            order.retain(|t| t != tag);
        }
        Some(consumer)
    }

    /// Drops every consumer of a deleted queue.
    pub fn remove_queue(&mut self, queue: &str) -> Vec<Consumer> {
        let tags = self.rotations.remove(queue).unwrap_or_default();
        tags.iter()
            .filter_map(|tag| self.consumers.remove(tag))
            .collect()
    }

    /// Clears the outstanding slot for a settled (acked or nacked)
    /// delivery, freeing prefetch capacity on whichever consumer held it.
    pub fn settle(&mut self, queue: &str, delivery_id: u64) {
        for consumer in self.consumers.values_mut() {
            if consumer.queue == queue && consumer.outstanding.remove(&delivery_id) {
                return;
            }
        }
    }

    fn next_eligible(&self, queue: &str) -> Option<ConsumerTag> {
        let order = self.rotations.get(queue)?;
        order
            .iter()
            .find(|tag| {
                self.consumers
                    .get(*tag)
                    .is_some_and(|c| c.has_capacity() && !c.sender.is_closed())
            })
            .cloned()
    }

    fn rotate(&mut self, queue: &str, tag: &str) {
        if let Some(order) = self.rotations.get_mut(queue) {
            if let Some(pos) = order.iter().position(|t| t == tag) {
                let tag = order.remove(pos);
                order.push(tag);
            }
        }
    }

    /// Retires every consumer of this queue whose receiver has been
    /// dropped, nacking each delivery it still holds back into the ready
    /// set. Detection happens here rather than on send failure alone, so
    /// a consumer that went away between pumps cannot strand its
    /// unacknowledged deliveries.
    fn retire_closed(&mut self, queue: &mut Queue) -> Vec<NackOutcome> {
        let closed: Vec<ConsumerTag> = self
            .rotations
            .get(queue.name())
            .map(|order| {
                order
                    .iter()
                    .filter(|tag| {
                        self.consumers
                            .get(*tag)
                            .is_some_and(|c| c.sender.is_closed())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut requeued = Vec::new();
        for tag in closed {
            warn!(tag = %tag, "consumer channel closed, requeueing its deliveries");
            if let Some(retired) = self.unregister(&tag) {
                for id in retired.outstanding {
                    match queue.nack(id, true) {
                        Ok(outcome) => requeued.push(outcome),
                        Err(err) => {
                            debug!(tag = %tag, delivery_id = id, %err, "already settled")
                        }
                    }
                }
            }
        }
        requeued
    }

    /// Drains the queue's ready set into consumers with spare prefetch
    /// capacity, fair-share round-robin. Stops when the ready set empties
    /// or every consumer is at its window. Closed-channel consumers are
    /// retired first, every delivery they held nacked back into the ready
    /// set. Returns the nack outcomes so the engine can rewrite
    /// persistence records for requeued messages.
    pub fn pump(&mut self, queue: &mut Queue) -> Vec<NackOutcome> {
        let mut requeued = self.retire_closed(queue);
        while queue.ready_len() > 0 {
            let Some(tag) = self.next_eligible(queue.name()) else {
                break;
            };
            let Some(delivery) = queue.deliver_next() else {
                break;
            };
            let delivery_id = delivery.delivery_id;
            let Some(consumer) = self.consumers.get_mut(&tag) else {
                break;
            };
            if consumer.sender.send(delivery).is_err() {
                // Receiver dropped between the eligibility check and the
                // send: requeue everything this consumer holds, the
                // in-hand delivery included, and retire it.
                warn!(tag = %tag, "consumer channel closed, requeueing its deliveries");
                if let Ok(outcome) = queue.nack(delivery_id, true) {
                    requeued.push(outcome);
                }
                if let Some(retired) = self.unregister(&tag) {
                    for id in retired.outstanding {
                        match queue.nack(id, true) {
                            Ok(outcome) => requeued.push(outcome),
                            Err(err) => {
                                debug!(tag = %tag, delivery_id = id, %err, "already settled")
                            }
                        }
                    }
                }
                continue;
            }
            consumer.outstanding.insert(delivery_id);
            debug!(tag = %tag, delivery_id, queue = queue.name(), "delivered");
            self.rotate(queue.name(), &tag);
        }
        requeued
    }
}
