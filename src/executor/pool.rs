//! Worker pool
//!
//! Named OS threads consuming one group's work queue.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use super::boundary::panic_message;
use super::queue::{WorkItem, WorkQueue};

/// Fixed set of workers for one group
pub struct WorkerPool {
    group: String,
    handles: Vec<JoinHandle<usize>>,
}

impl WorkerPool {
    /// Start `threads` workers. Each loops dequeue, handle, acknowledge until
    /// the queue is closed and empty.
    ///
    /// If a thread cannot be spawned the pool keeps the workers that did
    /// start; it only fails when none could.
    pub fn start<F>(threads: usize, queue: Arc<WorkQueue>, handler: F) -> io::Result<Self>
    where
        F: Fn(WorkItem) + Send + Sync + 'static,
    {
        let group = queue.group().to_string();
        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(threads);
        let mut last_error = None;

        for idx in 0..threads.max(1) {
            let queue = queue.clone();
            let handler = handler.clone();
            let spawned = thread::Builder::new()
                .name(format!("{group}-w{idx}"))
                .spawn(move || worker_loop(&queue, handler.as_ref()));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to start worker {} for group {}: {}", idx, group, e);
                    last_error = Some(e);
                }
            }
        }

        match (handles.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => {
                debug!("Started {} worker(s) for group {}", handles.len(), group);
                Ok(Self { group, handles })
            }
        }
    }

    /// Join every worker; the queue must be closed first. Returns the number
    /// of items each worker handled.
    pub fn shutdown(self) -> Vec<usize> {
        let group = self.group;
        self.handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    error!("Worker of group {} terminated abnormally", group);
                    0
                })
            })
            .collect()
    }
}

fn worker_loop<F: Fn(WorkItem)>(queue: &WorkQueue, handler: &F) -> usize {
    let mut handled = 0;
    while let Some(item) = queue.dequeue() {
        let unit_id = item.unit_id.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(item))) {
            error!(
                "Worker failed while handling unit {}: {}",
                unit_id,
                panic_message(payload.as_ref())
            );
        }
        queue.acknowledge();
        handled += 1;
    }
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Inputs;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fill(queue: &WorkQueue, count: usize) {
        for seq in 0..count {
            queue
                .enqueue(WorkItem {
                    seq,
                    unit_id: seq.to_string(),
                    inputs: Inputs::new(),
                })
                .unwrap();
        }
        queue.close();
    }

    #[test]
    fn test_pool_processes_all_items() {
        let queue = Arc::new(WorkQueue::new("G", 10));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let pool = WorkerPool::start(3, queue.clone(), move |item| {
            sink.lock().unwrap().push(item.seq);
        })
        .unwrap();
        fill(&queue, 10);

        assert!(queue.join_timeout(Duration::from_secs(5)));
        let counts = pool.shutdown();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.iter().sum::<usize>(), 10);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_workers_are_named_after_group() {
        let queue = Arc::new(WorkQueue::new("backup", 4));
        let names = Arc::new(Mutex::new(HashSet::new()));
        let sink = names.clone();

        let pool = WorkerPool::start(2, queue.clone(), move |_| {
            let name = thread::current().name().unwrap_or_default().to_string();
            sink.lock().unwrap().insert(name);
            thread::sleep(Duration::from_millis(20));
        })
        .unwrap();
        fill(&queue, 4);
        queue.join();
        pool.shutdown();

        for name in names.lock().unwrap().iter() {
            assert!(name == "backup-w0" || name == "backup-w1", "{name}");
        }
    }

    #[test]
    fn test_panicking_handler_still_acknowledges() {
        let queue = Arc::new(WorkQueue::new("G", 3));
        let pool = WorkerPool::start(1, queue.clone(), |item| {
            if item.seq == 1 {
                panic!("handler bug");
            }
        })
        .unwrap();
        fill(&queue, 3);

        assert!(queue.join_timeout(Duration::from_secs(5)));
        assert_eq!(pool.shutdown(), vec![3]);
    }
}
