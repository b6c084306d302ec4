//! Broker engine
//!
//! This module contains the in-memory broker engine responsible for:
//! - naming exchanges and queues and indexing bindings
//! - routing published messages to bound queues (direct, topic, headers)
//! - priority-ordered, acknowledgment-tracked delivery to consumers
//! - TTL-based delayed delivery via dead-letter re-publishing
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (for example `Arc<Mutex<Broker>>`) by the host. Callers should
//!   avoid holding the broker lock across network I/O to prevent
//!   blocking other operations.
//! - Delivery is push-based: consumers register a channel and receive
//!   discrete `Delivery` events. Publishing sends into those channels and
//!   returns; consumers process asynchronously relative to the publisher.
//! - The expiry task is designed to be run as a background task via
//!   [`Broker::start_scheduler`]. It pops expired timers outside the
//!   broker lock and re-publishes with the lock taken fresh.

pub mod dispatch;
pub mod exchange;
pub mod matching;
pub mod message;
pub mod queue;
pub mod scheduler;


use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BrokerSettings, Settings};
use crate::persistence::Persistence;
use crate::utils::error::BrokerError;
use dispatch::{Consumer, ConsumerTag, Dispatcher};
use exchange::{ExchangeRegistry, ExchangeType};
use message::{DeadLetterTarget, Delivery, Headers, Message, PublishProperties};
use queue::{NackOutcome, Queue, QueueOptions};
use scheduler::{ScheduledMessage, Scheduler};

/// The broker engine: a façade composing the exchange registry, queues,
/// delivery dispatcher and dead-letter scheduler.
///
/// Exchange and queue namespaces are process-wide state with explicit
/// lifecycle: created by declaration, torn down only by explicit
/// deletion.
#[derive(Debug)]
pub struct Broker {
    registry: ExchangeRegistry,
    queues: HashMap<String, Queue>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    persistence: Persistence,
    settings: BrokerSettings,
}

impl Default for Broker {
    fn default() -> Self {
        Self::with_persistence(BrokerSettings::default(), default_persistence())
    }
}

// Tests get a throwaway sled directory so engines never share state.
#[cfg(test)]
fn default_persistence() -> Persistence {
    let dir = tempfile::tempdir().expect("temp dir for test persistence");
    Persistence::new(&dir.keep().to_string_lossy(), None, None)
}

#[cfg(not(test))]
fn default_persistence() -> Persistence {
    Persistence::default()
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from loaded settings, opening the persistence
    /// store at the configured path.
    pub fn from_settings(settings: &Settings) -> Self {
        let persistence = Persistence::new(
            &settings.persistence.path,
            settings.persistence.ttl_secs,
            settings.persistence.max_messages_per_queue,
        );
        Self::with_persistence(settings.broker.clone(), persistence)
    }

    pub fn with_persistence(settings: BrokerSettings, persistence: Persistence) -> Self {
        Self {
            registry: ExchangeRegistry::default(),
            queues: HashMap::new(),
            dispatcher: Dispatcher::default(),
            scheduler: Scheduler::default(),
            persistence,
            settings,
        }
    }

    /// Declares an exchange. Idempotent for an identical redeclaration;
    /// changing the type of an existing exchange is a configuration error.
    pub fn declare_exchange(&mut self, name: &str, kind: ExchangeType) -> Result<(), BrokerError> {
        self.registry.declare(name, kind)?;
        info!(exchange = name, kind = kind.as_str(), "declared exchange");
        Ok(())
    }

    /// Deletes an exchange and all its bindings. Returns false if it did
    /// not exist. Messages already scheduled against it are discarded
    /// when their timers fire.
    pub fn delete_exchange(&mut self, name: &str) -> bool {
        self.registry.delete(name)
    }

    /// Declares a queue and returns its name. An empty name requests a
    /// server-generated one (anonymous/exclusive queues). Redeclaring
    /// with different arguments is a configuration error; an identical
    /// redeclaration is idempotent.
    pub fn declare_queue(&mut self, name: &str, options: QueueOptions) -> Result<String, BrokerError> {
        if options.max_priority > self.settings.max_priority_ceiling {
            return Err(BrokerError::Configuration(format!(
                "x-max-priority {} exceeds ceiling {}",
                options.max_priority, self.settings.max_priority_ceiling
            )));
        }
        let name = if name.is_empty() {
            format!("gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };
        if let Some(existing) = self.queues.get(&name) {
            if *existing.options() != options {
                return Err(BrokerError::Configuration(format!(
                    "queue '{name}' already declared with different arguments"
                )));
            }
            return Ok(name);
        }
        info!(queue = %name, "declared queue");
        self.queues.insert(name.clone(), Queue::new(&name, options));
        Ok(name)
    }

    /// Deletes a queue: its messages are dropped, its bindings removed,
    /// its consumers retired. Timers already scheduled for it are
    /// silently discarded when they fire.
    pub fn delete_queue(&mut self, name: &str) -> Result<(), BrokerError> {
        let queue = self
            .queues
            .remove(name)
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))?;
        self.registry.unbind_queue(name);
        let dropped = self.dispatcher.remove_queue(name);
        if queue.options().durable || queue.options().lazy {
            self.persistence.drop_queue(name);
        }
        info!(
            queue = name,
            consumers = dropped.len(),
            ready = queue.ready_len(),
            unacked = queue.unacked_len(),
            "deleted queue"
        );
        Ok(())
    }

    /// Binds a queue to an exchange. `pattern` is the routing key or
    /// topic pattern; `args` carries header-match requirements (with the
    /// `x-match` selector) for header exchanges. A spec the exchange type
    /// cannot interpret fails here, not at publish time.
    pub fn bind(
        &mut self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        args: &Headers,
    ) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        self.registry.bind(exchange, queue, pattern, args)?;
        debug!(exchange, queue, pattern, "bound queue");
        Ok(())
    }

    /// Publishes a message through an exchange. A message matching zero
    /// queues is dropped unless `props.mandatory` is set, in which case
    /// the publisher gets an `Unroutable` error.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        props: PublishProperties,
    ) -> Result<(), BrokerError> {
        let message = Message::from_publish(routing_key, payload, &props);
        self.route(exchange, message, props.mandatory)
    }

    /// Sends a message straight to a named queue, bypassing exchange
    /// resolution (the default-exchange pattern). The queue name doubles
    /// as the routing key. Per-message TTL/priority are honored.
    pub fn send_to_queue(
        &mut self,
        queue: &str,
        payload: Vec<u8>,
        props: PublishProperties,
    ) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let message = Message::from_publish(queue, payload, &props);
        self.place(None, queue, message);
        Ok(())
    }

    /// Resolves target queues and fans the message out. The fanout is not
    /// atomic across queues; each enqueue is independent.
    fn route(&mut self, exchange: &str, message: Message, mandatory: bool) -> Result<(), BrokerError> {
        let targets = self
            .registry
            .resolve(exchange, &message.routing_key, &message.headers)?;
        if targets.is_empty() {
            if mandatory {
                return Err(BrokerError::Unroutable {
                    exchange: exchange.to_string(),
                    routing_key: message.routing_key,
                });
            }
            debug!(exchange, routing_key = %message.routing_key, "message matched no queue, dropped");
            return Ok(());
        }
        for target in &targets {
            self.place(Some(exchange), target, message.clone());
        }
        Ok(())
    }

    /// Places a message into one queue: either into its ready set (and
    /// the persistence hook, for durable/lazy queues) or, when a TTL is
    /// in force, into the scheduler. A TTL'd message is never visible in
    /// the ready set.
    fn place(&mut self, origin_exchange: Option<&str>, queue_name: &str, message: Message) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            warn!(queue = queue_name, "dropping message for missing queue");
            return;
        };
        let mut message = message;
        message.priority = message.priority.min(queue.options().max_priority);

        let ttl = message.ttl_ms.or(queue.options().message_ttl_ms);
        if let Some(ttl_ms) = ttl {
            // Expiry re-publishes through the explicit dead-letter target,
            // falling back to the original exchange and routing key. A
            // direct send with no target just turns visible after the delay.
            let target = queue.dead_letter_target(&message).or_else(|| {
                origin_exchange.map(|exchange| DeadLetterTarget {
                    exchange: exchange.to_string(),
                    routing_key: message.routing_key.clone(),
                })
            });
            self.scheduler.schedule(queue_name, message, ttl_ms, target);
            return;
        }

        let seq = queue.enqueue(message.clone());
        let persist = queue.options().durable || queue.options().lazy;
        if persist {
            self.persistence.store(queue_name, seq, &message);
        }
        let requeued = self.dispatcher.pump(queue);
        Self::rewrite_requeued(&self.persistence, queue_name, persist, requeued);
    }

    /// Rewrites persistence records for messages the dispatcher requeued
    /// while retiring a closed-channel consumer. No-op on non-durable
    /// queues.
    fn rewrite_requeued(
        persistence: &Persistence,
        queue_name: &str,
        persist: bool,
        outcomes: Vec<NackOutcome>,
    ) {
        if !persist {
            return;
        }
        for outcome in outcomes {
            if let NackOutcome::Requeued {
                old_seq,
                new_seq,
                message,
            } = outcome
            {
                persistence.remove(queue_name, old_seq);
                persistence.store(queue_name, new_seq, &message);
            }
        }
    }

    /// Registers a consumer on a queue and returns its tag plus the
    /// channel deliveries arrive on. `prefetch` bounds outstanding
    /// unacked deliveries; `None` uses the configured default, 0 is
    /// unlimited.
    pub fn register_consumer(
        &mut self,
        queue: &str,
        prefetch: Option<usize>,
    ) -> Result<(ConsumerTag, UnboundedReceiver<Delivery>), BrokerError> {
        let Some(queue_ref) = self.queues.get_mut(queue) else {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        };
        let persist = queue_ref.options().durable || queue_ref.options().lazy;
        let tag = format!("consumer-{}", Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatcher.register(Consumer {
            tag: tag.clone(),
            queue: queue.to_string(),
            prefetch: prefetch.unwrap_or(self.settings.default_prefetch),
            sender: tx,
            outstanding: HashSet::new(),
        });
        let requeued = self.dispatcher.pump(queue_ref);
        Self::rewrite_requeued(&self.persistence, queue, persist, requeued);
        info!(queue, tag = %tag, "registered consumer");
        Ok((tag, rx))
    }

    /// Stops future delivery to a consumer. Its in-flight unacknowledged
    /// deliveries are nacked with requeue, never silently dropped.
    pub fn unregister_consumer(&mut self, tag: &str) -> Result<(), BrokerError> {
        let consumer = self
            .dispatcher
            .unregister(tag)
            .ok_or_else(|| BrokerError::UnknownConsumer(tag.to_string()))?;
        if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            let persist = queue.options().durable || queue.options().lazy;
            for delivery_id in consumer.outstanding {
                match queue.nack(delivery_id, true) {
                    Ok(NackOutcome::Requeued {
                        old_seq,
                        new_seq,
                        message,
                    }) => {
                        if persist {
                            self.persistence.remove(&consumer.queue, old_seq);
                            self.persistence.store(&consumer.queue, new_seq, &message);
                        }
                    }
                    Ok(NackOutcome::Rejected { .. }) => {}
                    Err(err) => debug!(tag, delivery_id, %err, "in-flight delivery already settled"),
                }
            }
            let requeued = self.dispatcher.pump(queue);
            Self::rewrite_requeued(&self.persistence, &consumer.queue, persist, requeued);
        }
        info!(tag, "unregistered consumer");
        Ok(())
    }

    /// Acknowledges a delivery, retiring the message permanently. A
    /// second ack on the same id is an `UnknownDeliveryId` error.
    pub fn ack(&mut self, queue_name: &str, delivery_id: u64) -> Result<(), BrokerError> {
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::UnknownQueue(queue_name.to_string()))?;
        let persist = queue.options().durable || queue.options().lazy;
        let seq = queue.ack(delivery_id)?;
        if persist {
            self.persistence.remove(queue_name, seq);
        }
        self.dispatcher.settle(queue_name, delivery_id);
        let requeued = self.dispatcher.pump(queue);
        Self::rewrite_requeued(&self.persistence, queue_name, persist, requeued);
        Ok(())
    }

    /// Rejects a delivery. With `requeue` the message re-enters the ready
    /// set marked redelivered; without, it goes to the queue's
    /// dead-letter target or is dropped.
    pub fn nack(
        &mut self,
        queue_name: &str,
        delivery_id: u64,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::UnknownQueue(queue_name.to_string()))?;
        let persist = queue.options().durable || queue.options().lazy;
        let outcome = queue.nack(delivery_id, requeue)?;
        let reject_target = match &outcome {
            NackOutcome::Rejected { message, .. } => queue.dead_letter_target(message),
            NackOutcome::Requeued { .. } => None,
        };
        self.dispatcher.settle(queue_name, delivery_id);

        match outcome {
            NackOutcome::Requeued {
                old_seq,
                new_seq,
                message,
            } => {
                if persist {
                    self.persistence.remove(queue_name, old_seq);
                    self.persistence.store(queue_name, new_seq, &message);
                }
            }
            NackOutcome::Rejected { seq, message } => {
                if persist {
                    self.persistence.remove(queue_name, seq);
                }
                match reject_target {
                    Some(target) => {
                        let mut message = message;
                        message.ttl_ms = None;
                        message.dead_letter = None;
                        message.routing_key = target.routing_key.clone();
                        if let Err(err) = self.route(&target.exchange, message, false) {
                            warn!(%err, "dead-letter republish failed, message dropped");
                        }
                    }
                    None => {
                        debug!(queue = queue_name, delivery_id, "rejected without requeue, dropped")
                    }
                }
            }
        }

        if let Some(queue) = self.queues.get_mut(queue_name) {
            let requeued = self.dispatcher.pump(queue);
            Self::rewrite_requeued(&self.persistence, queue_name, persist, requeued);
        }
        Ok(())
    }

    /// Ready-set depth of a queue.
    pub fn ready_len(&self, queue: &str) -> Result<usize, BrokerError> {
        self.queues
            .get(queue)
            .map(Queue::ready_len)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))
    }

    /// Outstanding unacknowledged deliveries on a queue.
    pub fn unacked_len(&self, queue: &str) -> Result<usize, BrokerError> {
        self.queues
            .get(queue)
            .map(Queue::unacked_len)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))
    }

    /// Messages currently waiting on expiry timers.
    pub fn scheduled_len(&self) -> usize {
        self.scheduler.len()
    }

    /// Called by the expiry task when a timer fires. A message whose
    /// queue was deleted in the meantime is discarded; otherwise it is
    /// re-published through its target with TTL and dead-letter fields
    /// cleared, or made visible in its own queue when it has no target.
    pub(crate) fn redeliver_expired(&mut self, entry: ScheduledMessage) {
        if !self.queues.contains_key(&entry.queue) {
            warn!(queue = %entry.queue, "discarding expired message, queue was deleted");
            return;
        }
        let mut message = entry.message;
        message.ttl_ms = None;
        message.dead_letter = None;
        match entry.target {
            Some(target) => {
                message.routing_key = target.routing_key.clone();
                debug!(
                    exchange = %target.exchange,
                    routing_key = %message.routing_key,
                    "dead-lettering expired message"
                );
                if let Err(err) = self.route(&target.exchange, message, false) {
                    warn!(%err, "expired message could not be re-published, dropped");
                }
            }
            None => {
                self.place(None, &entry.queue, message);
            }
        }
    }

    /// Runs the dead-letter expiry task. Spawn this once per engine:
    ///
    /// ```ignore
    /// let broker = Arc::new(Mutex::new(Broker::new()));
    /// tokio::spawn(Broker::start_scheduler(broker.clone()));
    /// ```
    ///
    /// The task sleeps until the earliest deadline (or until a new timer
    /// is scheduled), pops everything expired with only the scheduler
    /// lock held, then takes the broker lock to re-publish.
    pub async fn start_scheduler(broker: Arc<Mutex<Broker>>) {
        let scheduler = broker.lock().unwrap().scheduler.clone();
        loop {
            match scheduler.next_deadline() {
                None => scheduler.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        _ = scheduler.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            let expired = scheduler.take_expired(tokio::time::Instant::now());
                            let mut engine = broker.lock().unwrap();
                            for entry in expired {
                                engine.redeliver_expired(entry);
                            }
                        }
                    }
                }
            }
        }
    }
}
