//! Fixed-size worker pool draining a bounded task queue.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker pool errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("backlog multiplier must be at least 1")]
    NoBacklog,

    #[error("worker pool already started")]
    AlreadyStarted,
}

/// Processes tasks taken from the pool's queue
#[async_trait]
pub trait TaskHandler<T>: Send + Sync + 'static {
    /// Handle one task. `cancel` is the token the pool was started with.
    async fn handle(&self, task: T, cancel: &CancellationToken);
}

/// Bounded worker pool.
///
/// `workers` tasks share one queue of capacity `workers * backlog_multiplier`.
/// Submission never blocks: a full queue rejects the task.
pub struct WorkerPool<T> {
    workers: usize,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    handler: Arc<dyn TaskHandler<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a new worker pool
    pub fn new(
        workers: usize,
        backlog_multiplier: usize,
        handler: Arc<dyn TaskHandler<T>>,
    ) -> Result<Self, PoolError> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        if backlog_multiplier == 0 {
            return Err(PoolError::NoBacklog);
        }

        let capacity = workers.saturating_mul(backlog_multiplier);
        let (tx, rx) = mpsc::channel(capacity);

        Ok(Self {
            workers,
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            handler,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Maximum number of queued tasks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks waiting in the queue
    pub fn queued(&self) -> usize {
        match self.sender.lock().as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    /// Spawn the workers.
    ///
    /// Each worker exits as soon as `cancel` fires, or once the queue is
    /// closed by [`stop`](Self::stop) and empty.
    pub fn start(&self, cancel: CancellationToken) -> Result<(), PoolError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyStarted);
        }

        let mut handles = self.handles.lock();
        for worker_id in 0..self.workers {
            handles.push(tokio::spawn(Self::worker_loop(
                worker_id,
                self.receiver.clone(),
                self.handler.clone(),
                cancel.clone(),
            )));
        }

        info!(workers = self.workers, capacity = self.capacity, "Worker pool started");
        Ok(())
    }

    /// Enqueue a task without blocking.
    ///
    /// Returns `false` when the queue is full or the pool is stopped; the
    /// task is dropped.
    pub fn submit(&self, task: T) -> bool {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return false;
        };

        match tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(capacity = self.capacity, "Task queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and wait for every worker to exit.
    ///
    /// Unless the pool was cancelled, workers drain the queued tasks first.
    pub async fn stop(&self) {
        self.sender.lock().take();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task failed");
            }
        }

        debug!("Worker pool stopped");
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
        handler: Arc<dyn TaskHandler<T>>,
        cancel: CancellationToken,
    ) {
        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(worker_id, "Worker cancelled");
                    break;
                }
                task = async { receiver.lock().await.recv().await } => task,
            };

            let Some(task) = task else {
                debug!(worker_id, "Task queue closed");
                break;
            };

            let outcome = AssertUnwindSafe(handler.handle(task, &cancel))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                error!(worker_id, panic = panic_message(&panic), "Task panicked");
            }
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records every task it handles
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl TaskHandler<u32> for Recorder {
        async fn handle(&self, task: u32, _cancel: &CancellationToken) {
            self.seen.lock().push(task);
        }
    }

    /// Blocks every task until released
    struct Gate {
        release: Notify,
        entered: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler<u32> for Gate {
        async fn handle(&self, _task: u32, cancel: &CancellationToken) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = self.release.notified() => {}
                _ = cancel.cancelled() => return,
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let handler: Arc<dyn TaskHandler<u32>> = Arc::new(Recorder::default());
        assert_eq!(
            WorkerPool::<u32>::new(0, 4, handler.clone()).err(),
            Some(PoolError::NoWorkers)
        );
        assert_eq!(
            WorkerPool::<u32>::new(2, 0, handler).err(),
            Some(PoolError::NoBacklog)
        );
    }

    #[tokio::test]
    async fn test_single_worker_is_fifo() {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::<u32>::new(1, 64, recorder.clone()).unwrap();

        for task in 0..50 {
            assert!(pool.submit(task));
        }
        pool.start(CancellationToken::new()).unwrap();
        pool.stop().await;

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_overflow_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::<u32>::new(2, 3, recorder.clone()).unwrap();
        assert_eq!(pool.capacity(), 6);

        // Not started: nothing drains the queue
        let total = 10;
        let accepted = (0..total).filter(|&t| pool.submit(t)).count();
        let rejected = total as usize - accepted;

        assert_eq!(accepted, 6);
        assert_eq!(rejected, 4);
        assert_eq!(accepted + rejected, total as usize);
        assert_eq!(pool.queued(), 6);

        pool.start(CancellationToken::new()).unwrap();
        pool.stop().await;
        assert_eq!(recorder.seen.lock().len(), accepted);
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let recorder = Arc::new(Recorder::default());
        let pool = WorkerPool::<u32>::new(4, 8, recorder.clone()).unwrap();
        pool.start(CancellationToken::new()).unwrap();

        for task in 0..20 {
            assert!(pool.submit(task));
        }
        pool.stop().await;

        let mut seen = recorder.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let pool = WorkerPool::<u32>::new(1, 1, Arc::new(Recorder::default())).unwrap();
        pool.start(CancellationToken::new()).unwrap();
        pool.stop().await;

        assert!(!pool.submit(1));
        // Stopping twice is harmless
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let pool = WorkerPool::<u32>::new(1, 1, Arc::new(Recorder::default())).unwrap();
        let cancel = CancellationToken::new();
        pool.start(cancel.clone()).unwrap();
        assert_eq!(pool.start(cancel), Err(PoolError::AlreadyStarted));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_workers_promptly() {
        let gate = Arc::new(Gate {
            release: Notify::new(),
            entered: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        });
        let pool = WorkerPool::<u32>::new(2, 4, gate.clone()).unwrap();
        let cancel = CancellationToken::new();
        pool.start(cancel.clone()).unwrap();

        for task in 0..8 {
            pool.submit(task);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.entered.load(Ordering::SeqCst), 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), pool.stop())
            .await
            .expect("workers did not exit after cancellation");

        // Blocked tasks were abandoned and queued ones never started
        assert_eq!(gate.finished.load(Ordering::SeqCst), 0);
        assert_eq!(gate.entered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        struct Flaky {
            seen: Mutex<Vec<u32>>,
        }

        #[async_trait]
        impl TaskHandler<u32> for Flaky {
            async fn handle(&self, task: u32, _cancel: &CancellationToken) {
                if task == 0 {
                    panic!("boom");
                }
                self.seen.lock().push(task);
            }
        }

        let flaky = Arc::new(Flaky {
            seen: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::<u32>::new(1, 4, flaky.clone()).unwrap();
        pool.start(CancellationToken::new()).unwrap();

        assert!(pool.submit(0));
        assert!(pool.submit(1));
        assert!(pool.submit(2));
        pool.stop().await;

        assert_eq!(*flaky.seen.lock(), vec![1, 2]);
    }
}
