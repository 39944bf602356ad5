//! Tests for the deduplicating bounded queue

use crate::queue::UniqueQueue;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_same_identity_is_enqueued_once() {
    let queue: UniqueQueue<i32, &str> = UniqueQueue::new("test", 10);
    assert!(queue.put(1, "a").await);
    assert!(!queue.put(1, "b").await);
    assert_eq!(queue.pending(), 1);

    let (id, payload) = queue.get().await;
    assert_eq!(id, 1);
    assert_eq!(payload, "a");
    // Still pending: the message is in flight until task_done.
    assert_eq!(queue.pending(), 1);
    assert!(!queue.put(1, "c").await);

    queue.task_done(&1);
    assert_eq!(queue.pending(), 0);
    assert!(queue.put(1, "d").await);
}

#[tokio::test]
async fn test_different_identities_coexist() {
    let queue: UniqueQueue<String, u32> = UniqueQueue::new("test", 10);
    assert!(queue.put("10.0.0.1".to_string(), 1).await);
    assert!(queue.put("10.0.0.2".to_string(), 2).await);
    assert_eq!(queue.pending(), 2);

    let (first, _) = queue.get().await;
    let (second, _) = queue.get().await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_bounded_put_waits_for_capacity() {
    let queue: Arc<UniqueQueue<i32, ()>> = Arc::new(UniqueQueue::new("test", 1));
    assert!(queue.put(1, ()).await);

    // The queue is full; this put can only complete after a get.
    let q = queue.clone();
    let put_task = tokio::spawn(async move { q.put(2, ()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!put_task.is_finished());

    let (id, ()) = queue.get().await;
    assert_eq!(id, 1);
    assert!(put_task.await.unwrap());
    queue.task_done(&1);
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn test_join_waits_for_in_flight_messages() {
    let queue: Arc<UniqueQueue<i32, ()>> = Arc::new(UniqueQueue::new("test", 5));
    queue.put(1, ()).await;
    let (id, ()) = queue.get().await;

    let q = queue.clone();
    let join_task = tokio::spawn(async move { q.join().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!join_task.is_finished());

    queue.task_done(&id);
    tokio::time::timeout(Duration::from_secs(1), join_task)
        .await
        .expect("join should resolve once drained")
        .unwrap();
}

#[tokio::test]
async fn test_join_on_empty_queue_returns_immediately() {
    let queue: UniqueQueue<i32, ()> = UniqueQueue::new("test", 5);
    tokio::time::timeout(Duration::from_millis(100), queue.join())
        .await
        .expect("empty queue joins immediately");
}
