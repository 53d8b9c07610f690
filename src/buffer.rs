//! Single-consumer queue with an explicit overflow policy.
//!
//! [`OverflowBuffer`] sits at the boundaries where a fast producer meets a
//! consumer it must never wait for: each event bus subscription and the
//! receiving strategy's dispatch backlog. Pushing never blocks; when the
//! buffer is full the [`Overflow`] policy decides what is discarded.
//!
//! ```text
//! Policy      | Full buffer, new item arrives
//! ------------|------------------------------------------
//! DropOldest  | oldest buffered item is discarded
//! DropNewest  | incoming item is discarded
//! Latest      | whole backlog discarded, incoming kept
//! ```

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// What to discard when a bounded buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    DropOldest,
    DropNewest,
    Latest,
}

impl Overflow {
    /// Parse a policy name as used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "drop_oldest" => Some(Self::DropOldest),
            "drop_newest" => Some(Self::DropNewest),
            "latest" => Some(Self::Latest),
            _ => None,
        }
    }
}

/// Capacity and overflow behaviour of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    capacity: Option<usize>,
    overflow: Overflow,
}

impl BufferPolicy {
    /// Buffer everything.
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: Overflow::DropOldest,
        }
    }

    /// Hold at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize, overflow: Overflow) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }

    /// Bounded buffer where the most recent item always survives.
    pub fn latest(capacity: usize) -> Self {
        Self::bounded(capacity, Overflow::Latest)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Item queued without loss.
    Accepted,
    /// Item queued after discarding this many buffered items.
    Displaced(usize),
    /// Item discarded because the buffer was full.
    Rejected,
    /// Buffer closed; item discarded.
    Closed,
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// A queue read by exactly one consumer.
pub struct OverflowBuffer<T> {
    state: Mutex<State<T>>,
    ready: Notify,
    policy: BufferPolicy,
}

impl<T> OverflowBuffer<T> {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            ready: Notify::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Nothing panics while the lock is held, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an item, applying the overflow policy if the buffer is full.
    pub fn push(&self, item: T) -> Push {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Push::Closed;
            }

            let outcome = match self.policy.capacity {
                Some(capacity) if state.queue.len() >= capacity => match self.policy.overflow {
                    Overflow::DropOldest => {
                        state.queue.pop_front();
                        state.queue.push_back(item);
                        Push::Displaced(1)
                    }
                    Overflow::DropNewest => Push::Rejected,
                    Overflow::Latest => {
                        let discarded = state.queue.len();
                        state.queue.clear();
                        state.queue.push_back(item);
                        Push::Displaced(discarded)
                    }
                },
                _ => {
                    state.queue.push_back(item);
                    Push::Accepted
                }
            };

            match outcome {
                Push::Displaced(n) => state.dropped += n as u64,
                Push::Rejected => state.dropped += 1,
                _ => {}
            }
            outcome
        };

        if outcome != Push::Rejected {
            self.ready.notify_one();
        }
        outcome
    }

    /// Wait for the next item. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    /// Take the next item if one is buffered.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().queue.pop_front()
    }

    /// Stop accepting items. Buffered items are still delivered.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items discarded by the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }
}

impl<T: Send + 'static> OverflowBuffer<T> {
    /// Drain the buffer as a stream that ends when it is closed.
    pub fn into_stream(self: Arc<Self>) -> BoxStream<'static, T> {
        stream::unfold(self, |buffer| async move {
            let item = buffer.pop().await?;
            Some((item, buffer))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_unbounded_keeps_everything() {
        let buffer = OverflowBuffer::new(BufferPolicy::unbounded());
        for i in 0..1000 {
            assert_eq!(buffer.push(i), Push::Accepted);
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_drop_oldest() {
        let buffer = OverflowBuffer::new(BufferPolicy::bounded(2, Overflow::DropOldest));
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.push(3), Push::Displaced(1));

        assert_eq!(buffer.try_pop(), Some(2));
        assert_eq!(buffer.try_pop(), Some(3));
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn test_drop_newest() {
        let buffer = OverflowBuffer::new(BufferPolicy::bounded(2, Overflow::DropNewest));
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.push(3), Push::Rejected);

        assert_eq!(buffer.try_pop(), Some(1));
        assert_eq!(buffer.try_pop(), Some(2));
        assert_eq!(buffer.try_pop(), None);
    }

    #[test]
    fn test_latest_keeps_only_most_recent_on_overflow() {
        let buffer = OverflowBuffer::new(BufferPolicy::latest(1));
        assert_eq!(buffer.push("a"), Push::Accepted);
        assert_eq!(buffer.push("b"), Push::Displaced(1));
        assert_eq!(buffer.push("c"), Push::Displaced(1));

        assert_eq!(buffer.try_pop(), Some("c"));
        assert_eq!(buffer.try_pop(), None);
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn test_zero_capacity_treated_as_one() {
        let policy = BufferPolicy::bounded(0, Overflow::DropNewest);
        assert_eq!(policy.capacity(), Some(1));
    }

    #[test]
    fn test_push_after_close_is_discarded() {
        let buffer = OverflowBuffer::new(BufferPolicy::unbounded());
        buffer.close();
        assert_eq!(buffer.push(1), Push::Closed);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_pop_drains_then_ends_after_close() {
        let buffer = OverflowBuffer::new(BufferPolicy::unbounded());
        buffer.push(1);
        buffer.push(2);
        buffer.close();

        assert_eq!(buffer.pop().await, Some(1));
        assert_eq!(buffer.pop().await, Some(2));
        assert_eq!(buffer.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let buffer = Arc::new(OverflowBuffer::new(BufferPolicy::unbounded()));

        let producer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(42);
        });

        let item = timeout(Duration::from_millis(500), buffer.pop())
            .await
            .expect("timeout");
        assert_eq!(item, Some(42));
    }

    #[tokio::test]
    async fn test_into_stream_preserves_order() {
        let buffer = Arc::new(OverflowBuffer::new(BufferPolicy::unbounded()));
        for i in 0..5 {
            buffer.push(i);
        }
        buffer.close();

        let items: Vec<i32> = Arc::clone(&buffer).into_stream().collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_from_name() {
        assert_eq!(Overflow::from_name("latest"), Some(Overflow::Latest));
        assert_eq!(Overflow::from_name("drop_oldest"), Some(Overflow::DropOldest));
        assert_eq!(Overflow::from_name("drop_newest"), Some(Overflow::DropNewest));
        assert_eq!(Overflow::from_name("block"), None);
    }
}
