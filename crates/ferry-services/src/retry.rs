//! Retry queue — batches whose delivery failed, waiting for the next tick.
//!
//! Bounded by batch count. When full, the oldest batch is evicted and its
//! messages are lost; the eviction is logged by the caller.

use std::collections::VecDeque;

use ferry_core::Message;

pub struct RetryQueue {
    batches: VecDeque<Vec<Message>>,
    max_batches: usize,
}

impl RetryQueue {
    pub fn new(max_batches: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            max_batches,
        }
    }

    /// Park a failed batch. Returns the batch evicted to make room, if any.
    /// With a bound of zero the batch itself is handed straight back.
    pub fn push(&mut self, batch: Vec<Message>) -> Option<Vec<Message>> {
        if batch.is_empty() {
            return None;
        }
        if self.max_batches == 0 {
            return Some(batch);
        }
        let evicted = if self.batches.len() >= self.max_batches {
            self.batches.pop_front()
        } else {
            None
        };
        self.batches.push_back(batch);
        evicted
    }

    /// Take every parked batch, oldest first.
    pub fn take_all(&mut self) -> Vec<Vec<Message>> {
        self.batches.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total messages across parked batches.
    pub fn message_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}
