//! Bounded worker pool with per-chat affinity.
//!
//! Jobs are routed by hash(`instance_id|chat_id`) mod N, so every chat
//! lands on one worker and keeps FIFO order while unrelated chats run
//! in parallel. Dispatch never blocks: a full worker queue rejects the
//! job and the caller maps that to back-pressure.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use charla_core::CharlaError;

use crate::error::{PoolError, Result};

type JobFuture = Pin<Box<dyn Future<Output = std::result::Result<(), CharlaError>> + Send>>;

/// One unit of work, pinned to a `(instance, chat)` pair.
pub struct Job {
    pub instance_id: String,
    pub chat_id: String,
    pub handler: JobFuture,
}

impl Job {
    pub fn new<F>(instance_id: impl Into<String>, chat_id: impl Into<String>, handler: F) -> Self
    where
        F: Future<Output = std::result::Result<(), CharlaError>> + Send + 'static,
    {
        Self {
            instance_id: instance_id.into(),
            chat_id: chat_id.into(),
            handler: Box::pin(handler),
        }
    }

    fn affinity_key(&self) -> String {
        format!("{}|{}", self.instance_id, self.chat_id)
    }
}

struct WorkerShared {
    queue_depth: AtomicUsize,
    jobs_processed: AtomicU64,
    is_processing: AtomicBool,
}

struct PoolShared {
    name: String,
    queue_size: usize,
    workers: Vec<WorkerShared>,
    total_dispatched: AtomicU64,
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    total_dropped: AtomicU64,
    /// Live chat pins: affinity key -> (worker id, outstanding jobs).
    active_chats: DashMap<String, (usize, usize)>,
}

/// Fixed-size pool of workers, each with a bounded queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    senders: Vec<mpsc::Sender<Job>>,
    handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, num_workers: usize, queue_size: usize) -> Self {
        let name = name.into();
        let num_workers = num_workers.max(1);
        let queue_size = queue_size.max(1);

        let workers = (0..num_workers)
            .map(|_| WorkerShared {
                queue_depth: AtomicUsize::new(0),
                jobs_processed: AtomicU64::new(0),
                is_processing: AtomicBool::new(false),
            })
            .collect();

        let shared = Arc::new(PoolShared {
            name: name.clone(),
            queue_size,
            workers,
            total_dispatched: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            active_chats: DashMap::new(),
        });

        let cancel = CancellationToken::new();
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel::<Job>(queue_size);
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                shared.clone(),
                cancel.clone(),
            )));
        }

        info!(pool = %name, num_workers, queue_size, "worker pool started");
        Self {
            shared,
            senders,
            handles: std::sync::Mutex::new(handles),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Worker index a given chat is pinned to.
    pub fn worker_for(&self, instance_id: &str, chat_id: &str) -> usize {
        let key = format!("{instance_id}|{chat_id}");
        (fnv1a(key.as_bytes()) as usize) % self.senders.len()
    }

    /// Enqueue without blocking. Returns `QueueFull` when the pinned
    /// worker's queue is at capacity — no job is enqueued in that case.
    pub fn try_dispatch(&self, job: Job) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShutDown {
                pool: self.shared.name.clone(),
            });
        }

        let worker_id = self.worker_for(&job.instance_id, &job.chat_id);
        let key = job.affinity_key();

        // Depth and pin are recorded before the send so the worker can
        // never observe a job it has not been accounted for.
        self.shared.workers[worker_id]
            .queue_depth
            .fetch_add(1, Ordering::Relaxed);
        self.shared
            .active_chats
            .entry(key.clone())
            .and_modify(|(_, count)| *count += 1)
            .or_insert((worker_id, 1));

        match self.senders[worker_id].try_send(job) {
            Ok(()) => {
                self.shared.total_dispatched.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.shared.workers[worker_id]
                    .queue_depth
                    .fetch_sub(1, Ordering::Relaxed);
                self.shared
                    .active_chats
                    .remove_if_mut(&key, |_, (_, count)| {
                        *count -= 1;
                        *count == 0
                    });
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            pool = %self.shared.name,
                            worker_id, "queue full, job rejected"
                        );
                        Err(PoolError::QueueFull {
                            pool: self.shared.name.clone(),
                            worker_id,
                        })
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(PoolError::ShutDown {
                        pool: self.shared.name.clone(),
                    }),
                }
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let worker_stats: Vec<WorkerStats> = shared
            .workers
            .iter()
            .enumerate()
            .map(|(worker_id, w)| WorkerStats {
                worker_id,
                queue_depth: w.queue_depth.load(Ordering::Relaxed),
                jobs_processed: w.jobs_processed.load(Ordering::Relaxed),
                is_processing: w.is_processing.load(Ordering::Relaxed),
            })
            .collect();

        PoolStats {
            num_workers: shared.workers.len(),
            active_workers: worker_stats.iter().filter(|w| w.is_processing).count(),
            queue_size: shared.queue_size,
            total_dispatched: shared.total_dispatched.load(Ordering::Relaxed),
            total_processed: shared.total_processed.load(Ordering::Relaxed),
            total_errors: shared.total_errors.load(Ordering::Relaxed),
            total_dropped: shared.total_dropped.load(Ordering::Relaxed),
            active_chats: shared
                .active_chats
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().0))
                .collect(),
            worker_stats,
        }
    }

    /// Stop admitting new jobs and wait for workers to exit. Queued but
    /// unstarted jobs are discarded.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(pool = %self.shared.name, "worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<Job>,
    shared: Arc<PoolShared>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let me = &shared.workers[worker_id];
        me.queue_depth.fetch_sub(1, Ordering::Relaxed);
        me.is_processing.store(true, Ordering::Relaxed);

        let key = job.affinity_key();
        // Handler panics must not take the worker down; they count as
        // errors like any failed job.
        let outcome = std::panic::AssertUnwindSafe(job.handler)
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(CharlaError::Cancelled)) => {}
            Ok(Err(e)) => {
                shared.total_errors.fetch_add(1, Ordering::Relaxed);
                error!(pool = %shared.name, worker_id, chat = %key, error = %e, "job failed");
            }
            Err(_) => {
                shared.total_errors.fetch_add(1, Ordering::Relaxed);
                error!(pool = %shared.name, worker_id, chat = %key, "job handler panicked");
            }
        }

        me.jobs_processed.fetch_add(1, Ordering::Relaxed);
        me.is_processing.store(false, Ordering::Relaxed);
        shared.total_processed.fetch_add(1, Ordering::Relaxed);

        // Unpin the chat once its last outstanding job finishes.
        shared
            .active_chats
            .remove_if_mut(&key, |_, (_, count)| {
                *count -= 1;
                *count == 0
            });
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub queue_depth: usize,
    pub jobs_processed: u64,
    pub is_processing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub queue_size: usize,
    pub total_dispatched: u64,
    pub total_processed: u64,
    pub total_errors: u64,
    pub total_dropped: u64,
    pub worker_stats: Vec<WorkerStats>,
    /// `"instance|chat"` -> pinned worker id.
    pub active_chats: std::collections::HashMap<String, usize>,
}
