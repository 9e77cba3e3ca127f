//! Bounded worker pool driving subscriber and timer callbacks.
//!
//! Classic mutex + condvar queue: `enqueue` never blocks, workers pop and
//! run tasks to completion, `stop` lets the queue drain before joining.
//! The queue is a fixed-capacity `heapless::Deque`; saturation is an error
//! at the enqueue side, never a stall.

use crate::error::{NodeError, NodeResult};
use axon::consts::TASK_QUEUE_DEPTH;
use heapless::Deque;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::debug;

/// A unit of work handed to a pool worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Mutex<Deque<Task, TASK_QUEUE_DEPTH>>,
    available: Condvar,
    stop: AtomicBool,
}

/// Fixed-size worker pool with a bounded task queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `workers` worker threads.
    pub fn new(workers: usize) -> NodeResult<Self> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(Deque::new()),
            available: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("axon-worker-{}", i))
                .spawn(move || worker_loop(&shared))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Submit a task. Never blocks: a saturated queue is `QueueFull` and a
    /// stopped pool is `PoolStopped`, both left to the caller to handle.
    pub fn enqueue(&self, task: Task) -> NodeResult<()> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(NodeError::PoolStopped);
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.push_back(task).is_err() {
                return Err(NodeError::QueueFull {
                    capacity: TASK_QUEUE_DEPTH,
                });
            }
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Tasks currently waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Drain the queue and join every worker. Tasks already enqueued still
    /// run; idempotent.
    pub fn stop(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.notify_all();

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("executor pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_on_workers() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_stop_drains_enqueued_tasks() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // One slow task holds the single worker while the rest queue up.
        {
            let counter = Arc::clone(&counter);
            pool.enqueue(Box::new(move || {
                std::thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        // Nothing already enqueued may be lost.
        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_enqueue_after_stop_fails() {
        let pool = ThreadPool::new(1).unwrap();
        pool.stop();
        assert!(matches!(
            pool.enqueue(Box::new(|| {})),
            Err(NodeError::PoolStopped)
        ));
    }

    #[test]
    fn test_queue_saturation_is_an_error() {
        let pool = ThreadPool::new(1).unwrap();
        let gate = Arc::new(AtomicBool::new(false));

        // Park the worker so the queue can actually fill.
        {
            let gate = Arc::clone(&gate);
            pool.enqueue(Box::new(move || {
                while !gate.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }))
            .unwrap();
        }

        let mut saturated = false;
        for _ in 0..TASK_QUEUE_DEPTH + 8 {
            if matches!(
                pool.enqueue(Box::new(|| {})),
                Err(NodeError::QueueFull { .. })
            ) {
                saturated = true;
                break;
            }
        }
        assert!(saturated);

        gate.store(true, Ordering::Release);
        pool.stop();
    }
}
