//! Work queue
//!
//! Bounded FIFO of units for one group. Workers acknowledge every item they
//! dequeue so the driver can block until the queue is drained.

use crossbeam_channel::{Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::units::Inputs;

/// One queued unit
#[derive(Clone, Debug)]
pub struct WorkItem {
    /// Position in enqueue order, used to order the group's records
    pub seq: usize,
    pub unit_id: String,
    pub inputs: Inputs,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("work queue for group '{0}' is closed")]
pub struct QueueClosed(pub String);

/// Thread-safe FIFO shared between the driver and a worker pool
pub struct WorkQueue {
    group: String,
    sender: Mutex<Option<Sender<WorkItem>>>,
    receiver: Receiver<WorkItem>,
    pending: Mutex<usize>,
    drained: Condvar,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` items at once
    pub fn new(group: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            group: group.into(),
            sender: Mutex::new(Some(sender)),
            receiver,
            pending: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Add an item, blocking while the queue is full
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueClosed> {
        let sender = lock(&self.sender)
            .clone()
            .ok_or_else(|| QueueClosed(self.group.clone()))?;

        *lock(&self.pending) += 1;
        if sender.send(item).is_err() {
            self.acknowledge();
            return Err(QueueClosed(self.group.clone()));
        }
        Ok(())
    }

    /// Take the next item, blocking until one is available. Returns `None`
    /// once the queue is closed and empty.
    pub fn dequeue(&self) -> Option<WorkItem> {
        self.receiver.recv().ok()
    }

    /// Mark one dequeued item as fully processed
    pub fn acknowledge(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Stop accepting items; workers exit once the remaining items are taken
    pub fn close(&self) {
        lock(&self.sender).take();
    }

    /// Items enqueued but not yet acknowledged
    pub fn pending(&self) -> usize {
        *lock(&self.pending)
    }

    /// Items waiting to be dequeued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Block until every enqueued item has been acknowledged
    pub fn join(&self) {
        let mut pending = lock(&self.pending);
        while *pending > 0 {
            pending = self
                .drained
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`join`](Self::join) with an upper bound; returns false on timeout
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = lock(&self.pending);
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .drained
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn item(seq: usize) -> WorkItem {
        WorkItem {
            seq,
            unit_id: format!("u{seq}"),
            inputs: Inputs::new(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new("G", 3);
        for seq in 0..3 {
            queue.enqueue(item(seq)).unwrap();
        }
        queue.close();

        let ids: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|i| i.unit_id)
            .collect();
        assert_eq!(ids, vec!["u0", "u1", "u2"]);
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let queue = WorkQueue::new("G", 1);
        queue.close();
        assert_eq!(queue.enqueue(item(0)), Err(QueueClosed("G".to_string())));
        assert_eq!(queue.pending(), 0);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_join_waits_for_acknowledgements() {
        let queue = WorkQueue::new("G", 2);
        queue.enqueue(item(0)).unwrap();
        queue.enqueue(item(1)).unwrap();
        queue.close();

        assert!(!queue.join_timeout(Duration::from_millis(20)));

        let _ = queue.dequeue();
        queue.acknowledge();
        assert_eq!(queue.pending(), 1);

        let _ = queue.dequeue();
        queue.acknowledge();
        assert!(queue.join_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_concurrent_consumers_drain_queue() {
        let queue = Arc::new(WorkQueue::new("G", 100));
        for seq in 0..100 {
            queue.enqueue(item(seq)).unwrap();
        }
        queue.close();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut taken = 0;
                    while queue.dequeue().is_some() {
                        taken += 1;
                        queue.acknowledge();
                    }
                    taken
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert!(queue.join_timeout(Duration::from_secs(5)));
        assert!(queue.is_empty());
    }
}
