//! Frame-scoped deferred-resume queue
//!
//! Async completions detected during a world update are never resumed in
//! place. They are enqueued here and drained once per tick, snapshot-then-clear,
//! so continuations enqueued while draining land in the next tick.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::continuation::Continuation;

/// Shared FIFO of continuations. Cloning yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct DeferredQueue {
    inner: Arc<Mutex<VecDeque<Continuation>>>,
}

impl DeferredQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a continuation for the next drain
    pub fn enqueue(&self, continuation: Continuation) {
        tracing::trace!(key = %continuation.key(), "continuation enqueued");
        self.inner.lock().push_back(continuation);
    }

    /// Take every queued continuation in FIFO order, leaving the queue empty
    pub fn drain_all(&self) -> Vec<Continuation> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    /// Discard all queued continuations without invoking them
    pub fn clear(&self) {
        let dropped = {
            let mut queue = self.inner.lock();
            let count = queue.len();
            queue.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(dropped, "deferred queue cleared");
        }
    }

    /// Number of queued continuations
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of the queued continuations, oldest first
    pub fn pending(&self) -> Vec<Continuation> {
        self.inner.lock().iter().cloned().collect()
    }
}
