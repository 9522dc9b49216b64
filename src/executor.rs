//! Ordered task execution.
//!
//! The executor is a strand: tasks submitted to it run exactly once and
//! never concurrently with one another, regardless of which thread
//! submitted them. It is the sole gate through which the registry and
//! tracked peer state are mutated, collapsing multi-threaded access
//! into a single logical sequence.
//!
//! A single drain task on the loop thread pulls closures off an
//! unbounded channel one at a time. The channel is unbounded so
//! submission never blocks the caller.

use tokio::sync::mpsc;

use crate::event_loop::EventLoop;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialization primitive guarding shared connection state.
#[derive(Clone)]
pub struct OrderedExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

impl OrderedExecutor {
    /// Start the drain task on the given loop.
    pub fn start(event_loop: &EventLoop) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        event_loop.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            tracing::trace!("ordered executor drained");
        });

        Self { tx }
    }

    /// Submit a task for serialized execution.
    ///
    /// Tasks submitted from a single thread run in submission order;
    /// tasks from different threads are mutually exclusive but carry no
    /// cross-thread ordering guarantee. Returns `false` if the loop is
    /// gone, in which case the task is dropped.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_tasks_never_overlap() {
        let event_loop = EventLoop::start().unwrap();
        let executor = OrderedExecutor::start(&event_loop);

        let in_task = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));

        let mut threads = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            let in_task = in_task.clone();
            let count = count.clone();
            threads.push(thread::spawn(move || {
                for _ in 0..50 {
                    let in_task = in_task.clone();
                    let count = count.clone();
                    assert!(executor.submit(move || {
                        assert!(!in_task.swap(true, Ordering::SeqCst), "tasks overlapped");
                        // Unsynchronized read-modify-write; only safe if
                        // tasks are mutually exclusive.
                        let value = count.load(Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        count.store(value + 1, Ordering::SeqCst);
                        in_task.store(false, Ordering::SeqCst);
                    }));
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        executor.submit(move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 8 * 50);
    }

    #[test]
    fn test_single_thread_submissions_run_in_order() {
        let event_loop = EventLoop::start().unwrap();
        let executor = OrderedExecutor::start(&event_loop);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100usize {
            let order = order.clone();
            executor.submit(move || {
                order.lock().unwrap().push(i);
            });
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        executor.submit(move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let order = order.lock().unwrap();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_loop_shutdown_is_rejected() {
        let mut event_loop = EventLoop::start().unwrap();
        let executor = OrderedExecutor::start(&event_loop);
        event_loop.shutdown();

        // The drain task is gone; submission degrades to a no-op.
        assert!(!executor.submit(|| panic!("must not run")));
    }
}
