//! Bounded leaky queue
//!
//! A bounded FIFO that never blocks the producer. When full, it discards a
//! frame according to its [`Leak`] policy:
//!
//! - [`Leak::DropOldest`] evicts the head to make room (ingress side).
//! - [`Leak::DropNewest`] rejects the incoming item (egress side).
//!
//! Either way the surviving items keep their relative order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

/// Which frame to discard when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leak {
    /// Evict the oldest queued item
    DropOldest,
    /// Discard the item being pushed
    DropNewest,
}

impl Leak {
    /// Name of the equivalent GStreamer `queue leaky=` mode
    pub fn gst_name(&self) -> &'static str {
        match self {
            Leak::DropOldest => "downstream",
            Leak::DropNewest => "upstream",
        }
    }
}

/// Result of a push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Item queued without loss
    Queued,
    /// The queue was full; carries the discarded item
    Dropped(T),
    /// Queue is closed; the item is handed back
    Closed(T),
}

impl<T> PushOutcome<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, PushOutcome::Queued)
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded single-consumer queue with a drop policy
pub struct LeakyQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
    leak: Leak,
}

impl<T> LeakyQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize, leak: Leak) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            leak,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push an item without blocking
    pub fn push(&self, item: T) -> PushOutcome<T> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return PushOutcome::Closed(item);
            }

            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                PushOutcome::Queued
            } else {
                match self.leak {
                    Leak::DropOldest => {
                        let evicted = inner.items.pop_front();
                        inner.items.push_back(item);
                        match evicted {
                            Some(old) => PushOutcome::Dropped(old),
                            None => PushOutcome::Queued,
                        }
                    }
                    Leak::DropNewest => return PushOutcome::Dropped(item),
                }
            }
        };

        self.notify.notify_one();
        outcome
    }

    /// Take the head item if one is queued
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items and wake the consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn leak(&self) -> Leak {
        self.leak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn drain<T>(queue: &LeakyQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = LeakyQueue::new(3, Leak::DropOldest);
        for i in 0..3 {
            assert!(queue.push(i).is_queued());
        }

        assert_eq!(queue.push(3), PushOutcome::Dropped(0));
        assert_eq!(drain(&queue), vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_newest_when_full() {
        let queue = LeakyQueue::new(3, Leak::DropNewest);
        for i in 0..3 {
            assert!(queue.push(i).is_queued());
        }

        assert_eq!(queue.push(3), PushOutcome::Dropped(3));
        assert_eq!(drain(&queue), vec![0, 1, 2]);
    }

    #[test]
    fn test_order_preserved_under_sustained_overflow() {
        let queue = LeakyQueue::new(4, Leak::DropOldest);
        for i in 0..100 {
            queue.push(i);
        }

        assert_eq!(drain(&queue), vec![96, 97, 98, 99]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue = LeakyQueue::new(0, Leak::DropNewest);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push("a").is_queued());
        assert_eq!(queue.push("b"), PushOutcome::Dropped("b"));
    }

    #[test]
    fn test_closed_rejects_push() {
        let queue = LeakyQueue::new(2, Leak::DropOldest);
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.push(7), PushOutcome::Closed(7));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_gst_names() {
        assert_eq!(Leak::DropOldest.gst_name(), "downstream");
        assert_eq!(Leak::DropNewest.gst_name(), "upstream");
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(LeakyQueue::new(2, Leak::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42);

        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_pop_drains_then_ends_after_close() {
        let queue = Arc::new(LeakyQueue::new(2, Leak::DropOldest));
        queue.push(1);
        queue.close();

        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue: Arc<LeakyQueue<u8>> = Arc::new(LeakyQueue::new(2, Leak::DropNewest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert_eq!(consumer.await.unwrap(), None);
    }
}
