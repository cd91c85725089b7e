use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A background flush job.
pub(crate) type Job = BoxFuture<'static, ()>;

/// A shared pool of background workers that offload serialization/flush
/// work from the caller's task.
///
/// Each worker drains its own queue sequentially, so every job submitted
/// through one [`ExecutorLane`] runs in FIFO order — the property that keeps
/// a topic's asynchronous flushes ordered. Different lanes land on
/// different workers round-robin and run fully in parallel.
#[derive(Debug)]
pub(crate) struct ExecutorPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

#[derive(Debug)]
struct Worker {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorPool {
    /// Spawns `workers` background tasks. Zero workers yields an empty pool:
    /// every lane request returns `None` and flushing degrades to
    /// synchronous.
    pub(crate) fn start(workers: usize) -> Self {
        let workers = (0..workers)
            .map(|index| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                let handle = tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        job.await;
                    }
                    info!(worker = index, "executor worker drained");
                });
                Worker {
                    tx: Mutex::new(Some(tx)),
                    handle: Mutex::new(Some(handle)),
                }
            })
            .collect();
        ExecutorPool {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Assigns the next worker round-robin. `None` when the pool has no
    /// workers or has been shut down.
    pub(crate) fn lane(&self) -> Option<ExecutorLane> {
        if self.workers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.workers.len();
        let tx = self.workers[index]
            .tx
            .lock()
            .expect("executor lock poisoned")
            .clone()?;
        Some(ExecutorLane { tx })
    }

    /// Closes every queue and waits for the workers to drain in-flight
    /// jobs. Idempotent.
    pub(crate) async fn shutdown(&self) {
        for worker in &self.workers {
            worker.tx.lock().expect("executor lock poisoned").take();
        }
        for worker in &self.workers {
            let handle = worker.handle.lock().expect("executor lock poisoned").take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(error = %e, "executor worker terminated abnormally");
                }
            }
        }
    }
}

/// A handle onto one pool worker. All jobs submitted through one lane are
/// executed in submission order.
#[derive(Debug, Clone)]
pub(crate) struct ExecutorLane {
    tx: mpsc::UnboundedSender<Job>,
}

impl ExecutorLane {
    /// Enqueues a job; `false` when the pool has shut down.
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }
}
