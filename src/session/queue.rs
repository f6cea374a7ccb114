//! Bounded outbound buffer
//!
//! Single-consumer queue used for both directions of a session. Producers
//! never block: when the buffer is full the oldest element is dropped to make
//! room for the newest one. With capacity 0 nothing is buffered and an
//! element is only accepted when the consumer is already waiting for it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Outcome of [`OverflowQueue::offer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Element buffered
    Enqueued,
    /// Element buffered, the oldest buffered element was dropped for it
    DroppedOldest,
    /// Element dropped (capacity 0 and nobody waiting)
    Dropped,
    /// Queue closed, element dropped
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    /// Consumer is parked in `pop`
    waiting: bool,
    closed: bool,
    dropped: u64,
}

pub struct OverflowQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> OverflowQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                waiting: false,
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Add an element without blocking
    pub fn offer(&self, item: T) -> Offer {
        let mut state = self.state.lock();
        if state.closed {
            state.dropped += 1;
            return Offer::Closed;
        }

        let outcome = if self.capacity == 0 {
            // Hand-off slot: only when the consumer is parked and nothing is pending
            if !state.waiting || !state.items.is_empty() {
                state.dropped += 1;
                return Offer::Dropped;
            }
            state.items.push_back(item);
            Offer::Enqueued
        } else if state.items.len() >= self.capacity {
            state.items.pop_front();
            state.items.push_back(item);
            state.dropped += 1;
            Offer::DroppedOldest
        } else {
            state.items.push_back(item);
            Offer::Enqueued
        };

        state.waiting = false;
        drop(state);
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next element; None once closed and drained
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    state.waiting = false;
                    return Some(item);
                }
                if state.closed {
                    state.waiting = false;
                    return None;
                }
                state.waiting = true;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next element if one is buffered
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Stop accepting elements; buffered elements can still be popped
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Total number of elements lost to overflow or closure
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn drain<T>(queue: &OverflowQueue<T>) -> Vec<T> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn test_offer_within_capacity() {
        let queue = OverflowQueue::new(3);
        assert_eq!(queue.offer(1), Offer::Enqueued);
        assert_eq!(queue.offer(2), Offer::Enqueued);
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&queue), vec![1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = OverflowQueue::new(3);
        for i in 1..=5 {
            queue.offer(i);
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(drain(&queue), vec![3, 4, 5]);
    }

    #[test]
    fn test_capacity_one_keeps_latest() {
        let queue = OverflowQueue::new(1);
        assert_eq!(queue.offer("a"), Offer::Enqueued);
        assert_eq!(queue.offer("b"), Offer::DroppedOldest);
        assert_eq!(drain(&queue), vec!["b"]);
    }

    #[test]
    fn test_capacity_zero_without_consumer_drops() {
        let queue = OverflowQueue::new(0);
        assert_eq!(queue.offer(1), Offer::Dropped);
        assert!(queue.is_empty());
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_capacity_zero_hands_off_to_waiting_consumer() {
        let queue = Arc::new(OverflowQueue::new(0));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        // Wait until the consumer is parked
        for _ in 0..100 {
            if queue.state.lock().waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(queue.offer(7), Offer::Enqueued);
        assert_eq!(queue.offer(8), Offer::Dropped);
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue = OverflowQueue::new(2);
        queue.offer(1);
        queue.close();
        assert_eq!(queue.offer(2), Offer::Closed);
        assert!(queue.is_closed());
        assert_eq!(drain(&queue), vec![1]);
    }

    #[tokio::test]
    async fn test_pop_drains_then_ends_after_close() {
        let queue = OverflowQueue::new(4);
        queue.offer("x");
        queue.close();
        assert_eq!(queue.pop().await, Some("x"));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_offer() {
        let queue = Arc::new(OverflowQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.offer(42);
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(42));
    }

    proptest! {
        #[test]
        fn prop_keeps_most_recent(capacity in 1usize..32, extra in 1usize..32) {
            let queue = OverflowQueue::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                queue.offer(i);
            }
            let expected: Vec<usize> = (extra..total).collect();
            prop_assert_eq!(drain(&queue), expected);
            prop_assert_eq!(queue.dropped(), extra as u64);
        }
    }
}
