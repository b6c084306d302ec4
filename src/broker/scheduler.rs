use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::message::{DeadLetterTarget, Message};

/// A TTL-delayed message awaiting expiry. While scheduled it is not in
/// any queue's ready set; on expiry it is re-published through `target`,
/// or made visible in `queue` directly when no target is set.
#[derive(Debug)]
pub struct ScheduledMessage {
    pub queue: String,
    pub message: Message,
    pub target: Option<DeadLetterTarget>,
    deadline: Instant,
    seq: u64,
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledMessage {}

#[derive(Debug, Default)]
struct SchedulerState {
    heap: BinaryHeap<Reverse<ScheduledMessage>>,
    seq: u64,
}

/// Dead-letter scheduler: an unbounded min-heap of expiry deadlines with
/// its own lock, shared between the engine and the background expiry
/// task. Firings are ordered by monotonic deadline, ties by scheduling
/// order.
///
/// The expiry task pops expired entries with the heap lock held, then
/// releases it before re-publishing, so a firing never re-enters queue
/// or registry locks from inside the scheduler's critical section.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    notify: Arc<Notify>,
}

impl Scheduler {
    /// Registers an expiry timer for a message headed for `queue`. Wakes
    /// the expiry task so it can re-arm on the new earliest deadline.
    pub fn schedule(
        &self,
        queue: &str,
        message: Message,
        ttl_ms: u64,
        target: Option<DeadLetterTarget>,
    ) {
        let deadline = Instant::now() + Duration::from_millis(ttl_ms);
        {
            let mut state = self.state.lock().unwrap();
            state.seq += 1;
            let seq = state.seq;
            state.heap.push(Reverse(ScheduledMessage {
                queue: queue.to_string(),
                message,
                target,
                deadline,
                seq,
            }));
        }
        debug!(queue, ttl_ms, "scheduled message for delayed delivery");
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .unwrap()
            .heap
            .peek()
            .map(|Reverse(entry)| entry.deadline)
    }

    /// Removes and returns every entry whose deadline has passed, earliest
    /// first.
    pub(crate) fn take_expired(&self, now: Instant) -> Vec<ScheduledMessage> {
        let mut state = self.state.lock().unwrap();
        let mut expired = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now)
        {
            if let Some(Reverse(entry)) = state.heap.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}
