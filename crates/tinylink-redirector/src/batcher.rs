use crate::error::{RedirectorError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tinylink_core::{ClickRecorder, ReadRepository, ShortCode, UrlRecord};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use typed_builder::TypedBuilder;

type Resolution = Result<Option<UrlRecord>>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct BatcherSettings {
    /// Requests per lookup; a full batch is flushed without waiting.
    #[builder(default = 10)]
    pub batch_size: usize,
    /// Longest time the first request of a batch waits for company.
    #[builder(default = Duration::from_secs(2))]
    pub max_wait: Duration,
    /// Pending requests beyond which new lookups are rejected.
    #[builder(default = 5_000)]
    pub max_queue_size: usize,
    /// Increment the click counter of every served redirect.
    #[builder(default = true)]
    pub record_clicks: bool,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Observable queue state.
///
/// A queue that is ready to flush starts draining right away, so that
/// state is never observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Idle,
    Accumulating,
    Draining,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatcherStats {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub batches_processed: u64,
    pub failed_batches: u64,
    pub avg_batch_size: f64,
    pub avg_wait_ms: f64,
    pub queue_size: usize,
    pub state: QueueState,
}

struct BatchRequest {
    code: ShortCode,
    responder: oneshot::Sender<Resolution>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<BatchRequest>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is armed or disarmed; a timer only acts if
    /// the cycle it was armed for is still current.
    cycle: u64,
    draining: bool,
    shutting_down: bool,
}

impl Queue {
    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.cycle += 1;
    }

    fn state(&self) -> QueueState {
        if self.shutting_down {
            QueueState::ShuttingDown
        } else if self.draining {
            QueueState::Draining
        } else if !self.pending.is_empty() {
            QueueState::Accumulating
        } else {
            QueueState::Idle
        }
    }
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
    batched_requests: AtomicU64,
    wait_micros: AtomicU64,
}

struct Inner<R> {
    store: Arc<R>,
    settings: BatcherSettings,
    queue: Mutex<Queue>,
    /// Signalled whenever a drain loop finishes.
    idle: Notify,
    counters: Counters,
}

/// Coalesces concurrent redirect lookups into batched `get_many` reads.
///
/// The pending list sits behind a synchronous mutex that is never held
/// across an `.await`: the lookup of one batch runs unlocked while the next
/// batch accumulates. At most one drain loop runs at a time, and it keeps
/// flushing until the queue is empty.
///
/// Must be used from within a tokio runtime; timers and drains are spawned
/// tasks.
pub struct RedirectBatcher<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for RedirectBatcher<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> RedirectBatcher<R>
where
    R: ReadRepository + ClickRecorder,
{
    pub fn new(store: Arc<R>, settings: BatcherSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                queue: Mutex::new(Queue::default()),
                idle: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn settings(&self) -> &BatcherSettings {
        &self.inner.settings
    }

    /// Queues a lookup of `code` and returns a handle resolving to its record.
    ///
    /// Never suspends. Fails with [`RedirectorError::QueueSaturated`] when
    /// `max_queue_size` requests are already waiting, and with
    /// [`RedirectorError::QueueClosed`] once shutdown has begun.
    pub fn enqueue(&self, code: ShortCode) -> Result<PendingResolution> {
        let inner = &self.inner;
        let (responder, receiver) = oneshot::channel();

        let mut queue = inner.queue.lock();

        if queue.shutting_down {
            inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RedirectorError::QueueClosed);
        }

        let pending = queue.pending.len();
        if pending >= inner.settings.max_queue_size {
            inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                pending,
                capacity = inner.settings.max_queue_size,
                "redirect queue saturated"
            );
            return Err(RedirectorError::QueueSaturated {
                pending,
                capacity: inner.settings.max_queue_size,
            });
        }

        trace!(code = %code, pending = pending + 1, "queued redirect lookup");
        queue.pending.push_back(BatchRequest {
            code,
            responder,
            enqueued_at: Instant::now(),
        });
        inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        // A running drain loop picks new requests up on its own.
        if !queue.draining {
            if queue.pending.len() >= inner.settings.batch_size {
                queue.disarm_timer();
                queue.draining = true;
                drop(queue);
                Inner::spawn_drain(inner);
            } else if queue.timer.is_none() {
                Inner::arm_timer(inner, &mut queue);
            }
        }

        Ok(PendingResolution { receiver })
    }

    /// Flushes the queue now instead of waiting for the batch to fill or
    /// the timer to expire.
    ///
    /// Does nothing if a drain is already running or nothing is queued.
    pub async fn flush(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.draining || queue.pending.is_empty() {
                return;
            }
            queue.disarm_timer();
            queue.draining = true;
        }

        Inner::spawn_drain(&self.inner).await;
    }

    /// Rejects new lookups and resolves everything still queued.
    pub async fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if !queue.shutting_down {
                debug!(pending = queue.pending.len(), "shutting down redirect queue");
                queue.shutting_down = true;
                queue.disarm_timer();
            }
        }

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (done, drain_here) = {
                let mut queue = self.inner.queue.lock();
                if queue.draining {
                    (false, false)
                } else if queue.pending.is_empty() {
                    (true, false)
                } else {
                    queue.draining = true;
                    (false, true)
                }
            };

            if done {
                return;
            }
            if drain_here {
                Inner::spawn_drain(&self.inner).await;
            } else {
                notified.await;
            }
        }
    }

    pub fn state(&self) -> QueueState {
        self.inner.queue.lock().state()
    }

    pub fn stats(&self) -> BatcherStats {
        let (queue_size, state) = {
            let queue = self.inner.queue.lock();
            (queue.pending.len(), queue.state())
        };

        let counters = &self.inner.counters;
        let batches = counters.batches.load(Ordering::Relaxed);
        let batched = counters.batched_requests.load(Ordering::Relaxed);
        let wait_micros = counters.wait_micros.load(Ordering::Relaxed);

        let (avg_batch_size, avg_wait_ms) = if batches == 0 || batched == 0 {
            (0.0, 0.0)
        } else {
            (
                batched as f64 / batches as f64,
                wait_micros as f64 / batched as f64 / 1_000.0,
            )
        };

        BatcherStats {
            total_requests: counters.enqueued.load(Ordering::Relaxed),
            rejected_requests: counters.rejected.load(Ordering::Relaxed),
            batches_processed: batches,
            failed_batches: counters.failed_batches.load(Ordering::Relaxed),
            avg_batch_size,
            avg_wait_ms,
            queue_size,
            state,
        }
    }
}

impl<R> Inner<R>
where
    R: ReadRepository + ClickRecorder,
{
    fn arm_timer(inner: &Arc<Self>, queue: &mut Queue) {
        queue.cycle += 1;
        let cycle = queue.cycle;
        let max_wait = inner.settings.max_wait;
        let inner = Arc::clone(inner);

        queue.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(max_wait).await;

            {
                let mut queue = inner.queue.lock();
                if queue.cycle != cycle {
                    return;
                }
                queue.timer = None;
                if queue.draining || queue.pending.is_empty() {
                    return;
                }
                queue.draining = true;
            }

            trace!("batch wait expired");
            Self::spawn_drain(&inner);
        }));
    }

    /// Runs the drain loop on its own task, so that a caller giving up on
    /// the returned handle cannot leave `draining` set.
    fn spawn_drain(inner: &Arc<Self>) -> DrainHandle {
        DrainHandle(tokio::spawn(Self::drain(Arc::clone(inner))))
    }

    /// Flushes batches until the queue is empty. The caller must have set
    /// `draining` before calling.
    async fn drain(inner: Arc<Self>) {
        loop {
            let batch: Vec<BatchRequest> = {
                let mut queue = inner.queue.lock();
                if queue.pending.is_empty() {
                    queue.draining = false;
                    break;
                }
                let take = inner.settings.batch_size.max(1).min(queue.pending.len());
                queue.pending.drain(..take).collect()
            };

            inner.process(batch).await;
        }

        inner.idle.notify_waiters();
    }

    async fn process(&self, batch: Vec<BatchRequest>) {
        let now = Instant::now();
        let size = batch.len();
        let codes: Vec<ShortCode> = batch.iter().map(|request| request.code.clone()).collect();

        let waited: Duration = batch
            .iter()
            .map(|request| now.duration_since(request.enqueued_at))
            .sum();
        let counters = &self.counters;
        counters.batches.fetch_add(1, Ordering::Relaxed);
        counters
            .batched_requests
            .fetch_add(size as u64, Ordering::Relaxed);
        counters
            .wait_micros
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);

        debug!(batch_size = size, "flushing redirect batch");

        match self.store.get_many(&codes).await {
            Ok(found) => {
                for request in batch {
                    let record = found.get(&request.code).cloned();
                    let served = record.is_some();
                    // A dropped handle is not an error.
                    if request.responder.send(Ok(record)).is_ok()
                        && served
                        && self.settings.record_clicks
                    {
                        self.spawn_click(request.code);
                    }
                }
            }
            Err(e) => {
                counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                error!(batch_size = size, error = %e, "batched lookup failed");
                for request in batch {
                    let _ = request
                        .responder
                        .send(Err(RedirectorError::BatchLookupFailed(e.clone())));
                }
            }
        }
    }

    fn spawn_click(&self, code: ShortCode) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.record_click(&code).await {
                Ok(true) => trace!(code = %code, "recorded click"),
                Ok(false) => debug!(code = %code, "click for unknown code"),
                Err(e) => warn!(code = %code, error = %e, "failed to record click"),
            }
        });
    }
}

/// Completion of a spawned drain loop. Dropping it leaves the loop running.
struct DrainHandle(JoinHandle<()>);

impl Future for DrainHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|joined| {
            if let Err(e) = joined {
                error!(error = %e, "redirect drain task failed");
            }
        })
    }
}

/// Handle for one queued lookup; resolves once its batch is processed.
///
/// Dropping it abandons the request; the batch still runs.
#[derive(Debug)]
pub struct PendingResolution {
    receiver: oneshot::Receiver<Resolution>,
}

impl Future for PendingResolution {
    type Output = Resolution;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| match received {
            Ok(resolution) => resolution,
            Err(_) => Err(RedirectorError::QueueClosed),
        })
    }
}
