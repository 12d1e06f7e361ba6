//! Bounded blocking queue connecting pipeline stages
//!
//! A full queue blocks its producer, which is how a slow renderer paces
//! the decoder and the demuxer behind it. Closing wakes every blocked
//! caller; consumers still drain what was queued before seeing the end.
//! Items are never dropped or duplicated.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Error;

/// Why a push did not take the item; the item is handed back
pub enum PushError<T> {
    /// Queue at capacity (non-blocking push only)
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> From<PushError<T>> for Error {
    fn from(e: PushError<T>) -> Self {
        match e {
            PushError::Full(_) => Error::Backpressure,
            PushError::Closed(_) => Error::InvalidState("queue closed".into()),
        }
    }
}

/// Outcome of a non-blocking or timed pop
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    Item(T),
    /// Nothing available yet
    Empty,
    /// Closed and fully drained
    Closed,
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub total_pushed: u64,
    pub total_popped: u64,
    /// Highest buffered count ever observed
    pub peak: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    total_pushed: u64,
    total_popped: u64,
    peak: usize,
}

struct Inner<T> {
    name: String,
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Fixed-capacity multi-producer multi-consumer queue. Clones share the
/// same buffer.
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        Self::with_name(format!("queue-{}", capacity), capacity)
    }

    pub fn with_name(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                capacity,
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity.min(1024)),
                    closed: false,
                    total_pushed: 0,
                    total_popped: 0,
                    peak: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Push, blocking while the queue is full
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.inner.state.lock();
        while !state.closed && state.items.len() >= self.inner.capacity {
            self.inner.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(PushError::Closed(item));
        }
        self.enqueue(&mut state, item);
        Ok(())
    }

    /// Push without blocking
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.inner.capacity {
            return Err(PushError::Full(item));
        }
        self.enqueue(&mut state, item);
        Ok(())
    }

    fn enqueue(&self, state: &mut State<T>, item: T) {
        state.items.push_back(item);
        state.total_pushed += 1;
        state.peak = state.peak.max(state.items.len());
        self.inner.not_empty.notify_one();
    }

    /// Pop, blocking until an item arrives. `None` once the queue is closed
    /// and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = self.dequeue(&mut state) {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.inner.not_empty.wait(&mut state);
        }
    }

    /// Pop, waiting at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = self.dequeue(&mut state) {
                return PopResult::Item(item);
            }
            if state.closed {
                return PopResult::Closed;
            }
            if self
                .inner
                .not_empty
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match self.dequeue(&mut state) {
                    Some(item) => PopResult::Item(item),
                    None if state.closed => PopResult::Closed,
                    None => PopResult::Empty,
                };
            }
        }
    }

    pub fn try_pop(&self) -> PopResult<T> {
        let mut state = self.inner.state.lock();
        match self.dequeue(&mut state) {
            Some(item) => PopResult::Item(item),
            None if state.closed => PopResult::Closed,
            None => PopResult::Empty,
        }
    }

    fn dequeue(&self, state: &mut State<T>) -> Option<T> {
        let item = state.items.pop_front()?;
        state.total_popped += 1;
        self.inner.not_full.notify_one();
        Some(item)
    }

    /// Discard everything buffered (after a seek). Returns the count.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let n = state.items.len();
        state.items.clear();
        state.total_popped += n as u64;
        self.inner.not_full.notify_all();
        n
    }

    /// Refuse further pushes and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            state.closed = true;
            tracing::trace!(queue = %self.inner.name, pending = state.items.len(), "Queue closed");
        }
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            len: state.items.len(),
            capacity: self.inner.capacity,
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            peak: state.peak,
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 4);
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_try_push_backpressure_returns_item() {
        let q = BoundedQueue::new(1);
        q.try_push("a").unwrap();
        match q.try_push("b") {
            Err(PushError::Full(item)) => assert_eq!(item, "b"),
            other => panic!("expected Full, got {:?}", other),
        }
        let err: Error = q.try_push("c").unwrap_err().into();
        assert!(matches!(err, Error::Backpressure));
    }

    #[test]
    fn test_close_drains_then_ends() {
        let q = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.close();

        let err = q.push(3).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.into_inner(), 3);

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.try_pop(), PopResult::Item(2));
        assert_eq!(q.pop(), None);
        assert_eq!(q.try_pop(), PopResult::Closed);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let q: BoundedQueue<u32> = BoundedQueue::new(2);
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let q = BoundedQueue::new(1);
        q.push(0).unwrap();
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push(1))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.into_inner(), 1);
        assert_eq!(q.stats().total_pushed, 1);
    }

    #[test]
    fn test_pop_timeout() {
        let q: BoundedQueue<u8> = BoundedQueue::new(1);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), PopResult::Empty);
        q.push(7).unwrap();
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), PopResult::Item(7));
    }

    #[test]
    fn test_peak_never_exceeds_capacity() {
        let q = BoundedQueue::new(8);
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    q.push(i).unwrap();
                }
                q.close();
            })
        };

        let mut expected = 0;
        while let Some(item) = q.pop() {
            assert_eq!(item, expected);
            expected += 1;
            if expected % 1000 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        producer.join().unwrap();

        let stats = q.stats();
        assert_eq!(expected, 10_000);
        assert_eq!(stats.total_pushed, 10_000);
        assert_eq!(stats.total_popped, 10_000);
        assert!(stats.peak <= stats.capacity);
        assert!(stats.peak > 0);
    }

    #[test]
    fn test_clear() {
        let q = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), PopResult::Empty);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let q = BoundedQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.try_push(()).unwrap();
        assert!(q.try_push(()).is_err());
    }
}
