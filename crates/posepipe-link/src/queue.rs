use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// What happened to an item offered to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the oldest item was discarded to make room.
    ReplacedOldest,
    /// Queue is closed; the item was discarded.
    Closed,
}

struct QueueState {
    items: VecDeque<Bytes>,
    closed: bool,
}

/// Bounded FIFO between the tick thread and the writer thread.
///
/// Producers never wait: a full queue sheds its oldest entry, since a newer
/// device update supersedes it anyway. The consumer blocks on the condvar
/// until an item arrives or the queue is closed.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, item: Bytes) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.items.len() >= self.capacity {
                state.items.pop_front();
                PushOutcome::ReplacedOldest
            } else {
                PushOutcome::Queued
            };
            state.items.push_back(item);
            outcome
        };
        self.ready.notify_one();
        outcome
    }

    /// Block until an item is available. Returns `None` once closed.
    pub fn pop(&self) -> Option<Bytes> {
        let guard = self.lock();
        let mut state = self
            .ready
            .wait_while(guard, |s| s.items.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Drop everything queued. Returns how many items were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let n = state.items.len();
        state.items.clear();
        n
    }

    /// Close the queue and wake the consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Re-open a closed queue (for a transport that is initialised again).
    pub fn reopen(&self) {
        let mut state = self.lock();
        state.closed = false;
        state.items.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
