use tempfile::tempdir;

use super::Persistence;
use crate::broker::message::{Message, PublishProperties};

fn create_test_persistence(ttl: Option<i64>, max: Option<usize>) -> Persistence {
    let dir = tempdir().unwrap();
    Persistence::new(&dir.keep().to_string_lossy(), ttl, max)
}

fn sample_message(payload: &[u8]) -> Message {
    Message::from_publish("route", payload.to_vec(), &PublishProperties::default())
}

#[test]
fn test_store_and_load_message() {
    let persistence = create_test_persistence(None, None);

    persistence.store("work", 1, &sample_message(b"hello"));
    let messages = persistence.load("work");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, b"hello".to_vec());
    assert_eq!(messages[0].queue, "work");
    assert_eq!(messages[0].routing_key, "route");
}

#[test]
fn test_load_preserves_enqueue_order() {
    let persistence = create_test_persistence(None, None);

    for seq in [3u64, 1, 2] {
        persistence.store("work", seq, &sample_message(format!("msg{seq}").as_bytes()));
    }

    let payloads: Vec<Vec<u8>> = persistence
        .load("work")
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec![b"msg1".to_vec(), b"msg2".to_vec(), b"msg3".to_vec()]);
}

#[test]
fn test_remove_deletes_single_record() {
    let persistence = create_test_persistence(None, None);

    persistence.store("work", 1, &sample_message(b"keep"));
    persistence.store("work", 2, &sample_message(b"drop"));
    persistence.remove("work", 2);

    let messages = persistence.load("work");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, b"keep".to_vec());
}

#[test]
fn test_drop_queue_clears_tree() {
    let persistence = create_test_persistence(None, None);

    persistence.store("work", 1, &sample_message(b"a"));
    persistence.store("other", 1, &sample_message(b"b"));
    persistence.drop_queue("work");

    assert!(persistence.load("work").is_empty());
    assert_eq!(persistence.load("other").len(), 1);
}

#[test]
fn test_max_messages_limit_evicts_oldest() {
    let persistence = create_test_persistence(None, Some(3));

    for seq in 1..=5u64 {
        persistence.store("work", seq, &sample_message(format!("msg{seq}").as_bytes()));
    }

    let payloads: Vec<Vec<u8>> = persistence
        .load("work")
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec![b"msg3".to_vec(), b"msg4".to_vec(), b"msg5".to_vec()]);
}

#[test]
fn test_ttl_removes_old_messages() {
    let persistence = create_test_persistence(Some(1), None);

    persistence.store("ttl_test", 1, &sample_message(b"msg1"));
    std::thread::sleep(std::time::Duration::from_secs(2)); // Wait so the TTL expires
    let messages = persistence.load("ttl_test");

    assert!(messages.is_empty(), "Messages should be expired");
}
