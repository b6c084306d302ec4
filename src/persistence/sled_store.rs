use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::warn;

use crate::broker::message::{Headers, Message};

/// On-disk form of a ready message, keyed in its queue's tree by the
/// big-endian enqueue sequence so iteration returns enqueue order.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub queue: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub priority: u8,
    pub headers: Headers,
    pub stored_at: i64,
}

#[derive(Clone)]
pub struct Persistence {
    db: Db,
    ttl_seconds: Option<i64>,
    max_messages_per_queue: Option<usize>,
}

impl Persistence {
    pub fn new(
        path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_queue: Option<usize>,
    ) -> Self {
        let db = sled::open(path).expect("Failed to open sled DB");
        Self {
            db,
            ttl_seconds,
            max_messages_per_queue,
        }
    }

    /// Records a ready message under its enqueue sequence. Storage errors
    /// are logged, never surfaced: this is a hint layer, not a contract.
    pub fn store(&self, queue: &str, seq: u64, message: &Message) {
        let stored = StoredMessage {
            queue: queue.to_string(),
            routing_key: message.routing_key.clone(),
            payload: message.payload.clone(),
            priority: message.priority,
            headers: message.headers.clone(),
            stored_at: Utc::now().timestamp(),
        };

        let serialized = match serde_json::to_vec(&stored) {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to serialize stored message: {e}");
                return;
            }
        };
        let Ok(tree) = self.db.open_tree(queue) else {
            warn!(queue, "failed to open persistence tree");
            return;
        };
        if let Err(e) = tree.insert(seq.to_be_bytes(), serialized) {
            warn!(queue, seq, "failed to persist message: {e}");
        }
        self.enforce_limit(queue);
    }

    /// Drops the record for an acked (or rejected) message.
    pub fn remove(&self, queue: &str, seq: u64) {
        if let Ok(tree) = self.db.open_tree(queue) {
            let _ = tree.remove(seq.to_be_bytes());
        }
    }

    /// Loads every stored message for a queue in enqueue order.
    pub fn load(&self, queue: &str) -> Vec<StoredMessage> {
        self.cleanup_old_messages(queue);
        let Ok(tree) = self.db.open_tree(queue) else {
            return Vec::new();
        };
        tree.iter()
            .filter_map(|res| res.ok())
            .filter_map(|(_, val)| serde_json::from_slice(&val).ok())
            .collect()
    }

    /// Drops a deleted queue's entire tree.
    pub fn drop_queue(&self, queue: &str) {
        if let Err(e) = self.db.drop_tree(queue) {
            warn!(queue, "failed to drop persistence tree: {e}");
        }
    }

    fn enforce_limit(&self, queue: &str) {
        let Some(max) = self.max_messages_per_queue else {
            return;
        };
        let Ok(tree) = self.db.open_tree(queue) else {
            return;
        };
        while tree.len() > max {
            match tree.pop_min() {
                Ok(Some(_)) => {}
                _ => break,
            }
        }
    }

    fn cleanup_old_messages(&self, queue: &str) {
        if let Some(ttl) = self.ttl_seconds {
            let expiry_time = Utc::now().timestamp() - ttl;

            let Ok(tree) = self.db.open_tree(queue) else {
                return;
            };
            let old_keys: Vec<_> = tree
                .iter()
                .filter_map(|res| res.ok())
                .filter_map(|(key, val)| {
                    let stored: StoredMessage = serde_json::from_slice(&val).ok()?;
                    (stored.stored_at < expiry_time).then_some(key)
                })
                .collect();

            for key in old_keys {
                let _ = tree.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}

impl Default for Persistence {
    fn default() -> Self {
        Self::new("embermq_db", Some(3600), Some(10_000))
    }
}
