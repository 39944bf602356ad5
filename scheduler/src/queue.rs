//! Deduplicating bounded queue connecting pipeline producers to workers.
//!
//! Messages are identified by a hashable key (task id or node ip). Putting a
//! message whose identity is already enqueued or currently being processed is
//! a no-op, so a producer can blindly re-enumerate candidates on every tick
//! without double-dispatching work. `pending()` counts both queued and
//! in-flight messages, which is what the producers size their batches by.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::Notify;

struct Inner<K, P> {
    queue: VecDeque<(K, P)>,
    /// Identities currently in the queue.
    enqueued: HashSet<K>,
    /// Identities taken by a worker but not yet marked done.
    in_flight: HashSet<K>,
}

pub struct UniqueQueue<K, P> {
    name: String,
    maxsize: usize,
    inner: Mutex<Inner<K, P>>,
    not_empty: Notify,
    not_full: Notify,
    drained: Notify,
}

impl<K: Eq + Hash + Clone, P> UniqueQueue<K, P> {
    pub fn new(name: &str, maxsize: usize) -> Self {
        Self {
            name: name.to_string(),
            maxsize: maxsize.max(1),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                enqueued: HashSet::new(),
                in_flight: HashSet::new(),
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            drained: Notify::new(),
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queued plus in-flight message count.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.queue.len() + inner.in_flight.len()
    }

    /// Insert a message, waiting while the queue is full. Returns false
    /// without waiting when the identity is already pending.
    pub async fn put(&self, id: K, payload: P) -> bool {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.enqueued.contains(&id) || inner.in_flight.contains(&id) {
                    return false;
                }
                if inner.queue.len() < self.maxsize {
                    inner.enqueued.insert(id.clone());
                    inner.queue.push_back((id, payload));
                    drop(inner);
                    self.not_empty.notify_one();
                    return true;
                }
                self.not_full.notified()
            };
            wait.await;
        }
    }

    /// Take the next message, waiting while the queue is empty. The identity
    /// stays pending until `task_done` is called for it.
    pub async fn get(&self) -> (K, P) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some((id, payload)) = inner.queue.pop_front() {
                    inner.enqueued.remove(&id);
                    inner.in_flight.insert(id.clone());
                    drop(inner);
                    self.not_full.notify_one();
                    return (id, payload);
                }
                self.not_empty.notified()
            };
            wait.await;
        }
    }

    /// Mark an in-flight message as processed, releasing its identity.
    pub fn task_done(&self, id: &K) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.in_flight.remove(id);
        if inner.queue.is_empty() && inner.in_flight.is_empty() {
            drop(inner);
            self.drained.notify_waiters();
        }
    }

    /// Wait until the queue is empty and no message is in flight.
    pub async fn join(&self) {
        loop {
            // Register interest before checking the condition, otherwise a
            // notify_waiters between the check and the await is lost.
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().expect("queue lock poisoned");
                if inner.queue.is_empty() && inner.in_flight.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}
