//! Blocking mailbox shared by the in-memory transports

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::RecvError;

/// Default mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// Bounded multi-producer queue with a timed blocking pop
///
/// Producers never block: when full, the oldest item is discarded.
#[derive(Debug)]
pub struct Mailbox<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue an item. Returns false if the mailbox is closed.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
        }
        inner.items.push_back(item);
        drop(inner);
        self.ready.notify_one();
        true
    }

    /// Dequeue an item, waiting up to `timeout`. A zero timeout never blocks.
    pub fn pop(&self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            if inner.closed {
                return Err(RecvError::Closed);
            }
            if timeout.is_zero() || self.ready.wait_until(&mut inner, deadline).timed_out() {
                return inner.items.pop_front().ok_or(RecvError::Timeout);
            }
        }
    }

    /// Close the mailbox and wake every waiter. Queued items stay readable.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}
