//! Rate-limited request queue for outbound reads
//!
//! Serializes every read call system-wide behind a single in-flight slot
//! with a minimum spacing between dispatches. This trades latency for never
//! tripping remote rate limits. Writes do not go through this queue.

use crate::error::{EngineError, Result};
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Dispatch priority; ties within a tier preserve arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Opportunistic reads, e.g. prefetching
    Background = 0,
    /// Regular derived-state reads
    Normal = 1,
    /// Reads a pending user interaction is blocked on
    High = 2,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueueItem {
    seq: u64,
    priority: Priority,
    job: Job,
}

struct QueueState {
    items: Vec<QueueItem>,
    /// Guards against starting two drain loops
    draining: bool,
    next_seq: u64,
    last_dispatch: Option<Instant>,
}

/// Queue throughput counters
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub failed: u64,
}

struct Inner {
    state: Mutex<QueueState>,
    min_interval: Duration,
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Rate-limited, priority-ordered dispatcher with one in-flight slot
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<Inner>,
}

impl RateLimitedQueue {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    items: Vec::new(),
                    draining: false,
                    next_seq: 0,
                    last_dispatch: None,
                }),
                min_interval,
                enqueued: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a read task. The returned future resolves with the task's own
    /// result once the queue has dispatched it; one task's failure never
    /// blocks the tasks behind it.
    ///
    /// The item is enqueued synchronously, so the dispatch order of a batch
    /// of `enqueue` calls is fixed before any of the returned futures are
    /// awaited.
    pub fn enqueue<T, Fut>(&self, priority: Priority, task: Fut) -> impl Future<Output = Result<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let failed = Arc::clone(&self.inner);

        let job: Job = Box::pin(async move {
            let result = task.await;
            if result.is_err() {
                failed.failed.fetch_add(1, Ordering::SeqCst);
            }
            // Receiver may have gone away; nothing to do then
            let _ = tx.send(result);
        });

        let start_drain = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.push(QueueItem { seq, priority, job });
            self.inner.enqueued.fetch_add(1, Ordering::SeqCst);
            trace!("Enqueued read task seq={} priority={:?}", seq, priority);

            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        if start_drain {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(Self::drain(inner));
        }

        async move {
            rx.await
                .map_err(|_| EngineError::Internal("queued task dropped before completion".into()))?
        }
    }

    /// Dispatch loop: picks highest priority (FIFO within a tier), enforces
    /// minimum spacing, runs the job to completion, repeats until empty.
    async fn drain(inner: Arc<Inner>) {
        loop {
            let job = {
                let mut state = inner.state.lock().expect("queue lock poisoned");
                match Self::take_next(&mut state.items) {
                    Some(job) => job,
                    None => {
                        state.draining = false;
                        debug!("Request queue drained");
                        return;
                    }
                }
            };

            let wait = {
                let state = inner.state.lock().expect("queue lock poisoned");
                state
                    .last_dispatch
                    .and_then(|last| inner.min_interval.checked_sub(last.elapsed()))
                    .unwrap_or(Duration::ZERO)
            };
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }

            {
                let mut state = inner.state.lock().expect("queue lock poisoned");
                state.last_dispatch = Some(Instant::now());
            }

            job.await;
            inner.dispatched.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn take_next(items: &mut Vec<QueueItem>) -> Option<Job> {
        let idx = items
            .iter()
            .enumerate()
            .max_by_key(|(_, item)| (item.priority, Reverse(item.seq)))
            .map(|(idx, _)| idx)?;
        Some(items.remove(idx).job)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.inner.enqueued.load(Ordering::SeqCst),
            dispatched: self.inner.dispatched.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().expect("queue lock poisoned").items.len()
    }
}
