//! Bounded MPMC queues connecting the pipeline stages.
//!
//! `push` never blocks: when a queue is at capacity the oldest element is
//! evicted so the packet path stays live (liveness over completeness).
//! `pop_timeout` suspends until an element arrives or the timeout elapses;
//! the timeout is the shutdown-latency bound for every worker loop.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue an item, evicting the oldest one when full.
    ///
    /// Returns `true` when an eviction happened so the producer can log the
    /// backpressure event.
    pub fn push(&self, item: T) -> bool {
        let dropped = {
            let mut items = self.items.lock().expect("queue mutex poisoned");
            let dropped = if items.len() >= self.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Dequeue one item, suspending while the queue is empty.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            let notified = self.notify.notified();
            // An item may have landed between the failed pop and registering
            // for notification.
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Dequeue one item, or return `None` after `timeout`.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let q: BoundedQueue<u32> = BoundedQueue::new("test", 8);
        assert!(!q.push(1));
        assert!(!q.push(2));
        assert_eq!(q.pop().await, 1);
        assert_eq!(q.pop().await, 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let q: BoundedQueue<u32> = BoundedQueue::new("test", 2);
        assert!(!q.push(1));
        assert!(!q.push(2));
        assert!(q.push(3), "overflow must report the eviction");
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().await, 2, "oldest entry was dropped");
        assert_eq!(q.pop().await, 3);
    }

    #[tokio::test]
    async fn test_pop_timeout_on_empty() {
        let q: BoundedQueue<u32> = BoundedQueue::new("test", 2);
        let got = q.pop_timeout(Duration::from_millis(20)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let q = std::sync::Arc::new(BoundedQueue::<u32>::new("test", 2));
        let q2 = q.clone();
        let consumer = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(99);
        assert_eq!(consumer.await.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_multiple_consumers_drain() {
        let q = std::sync::Arc::new(BoundedQueue::<u32>::new("test", 64));
        for i in 0..10 {
            q.push(i);
        }
        let mut handles = Vec::new();
        for _ in 0..2 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = q.pop_timeout(Duration::from_millis(50)).await {
                    got.push(v);
                }
                got
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }
}
