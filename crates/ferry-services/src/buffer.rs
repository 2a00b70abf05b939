//! Message buffer — pending messages between broker and flush cycle.
//!
//! The subscription callback appends; the flush scheduler drains. Both take
//! the same lock, and the lock is only ever held for a push or a swap, so a
//! slow HTTP send never stalls the broker's dispatch path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ferry_core::config::OverflowPolicy;
use ferry_core::Message;

/// Result of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    /// Accepted after evicting the oldest buffered message.
    DroppedOldest,
    /// Buffer full, the new message was discarded.
    Rejected,
}

/// Bounded, ordered, shared message buffer.
#[derive(Clone)]
pub struct MessageBuffer {
    inner: Arc<Mutex<VecDeque<Message>>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl MessageBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add a message at the tail.
    pub fn append(&self, msg: Message) -> AppendOutcome {
        let outcome = {
            let mut queue = self.lock();
            if queue.len() < self.capacity {
                queue.push_back(msg);
                AppendOutcome::Accepted
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(msg);
                        AppendOutcome::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => AppendOutcome::Rejected,
                }
            }
        };
        if outcome != AppendOutcome::Accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Take everything buffered so far, leaving the buffer empty.
    ///
    /// Messages appended after the swap belong to the next drain.
    pub fn drain_all(&self) -> Vec<Message> {
        let taken = std::mem::take(&mut *self.lock());
        Vec::from(taken)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Messages lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // Poisoning is ignored: every critical section leaves the deque whole.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
