//! Pending-request queue with bounded retries and exponential backoff.
//!
//! Every submitted operation becomes a [`PendingRequest`] that moves through
//! `Queued -> Attempting -> (done | Queued again | exhausted)`. An entry is
//! attempted at once when the tracker reports the server reachable, after
//! its backoff delay when an attempt fails, and by the periodic sweep once
//! connectivity returns. Every caller attached to an entry is settled
//! exactly once with the same outcome.

use crate::client::config::ClientConfig;
use crate::client::retry::{RetryConfig, RetryDecision, RetryState};
use crate::client::utils::{sleep, spawn_task};
use crate::connectivity::ConnectivityTracker;
use crate::error::{Result, TransportError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Chat,
    Transcription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Queued,
    Attempting,
}

/// Passed to the operation on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub request_id: RequestId,
    /// Failed attempts so far; zero on the first try.
    pub attempt: u32,
}

impl AttemptContext {
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub kind: RequestKind,
    /// Attempt budget; the queue default when `None`.
    pub max_retries: Option<u32>,
    /// Requests sharing a hash and kind are merged into one entry.
    pub content_hash: Option<String>,
    /// Try right away when connected instead of waiting for the sweep.
    pub immediate: bool,
}

impl SubmitOptions {
    pub fn new(kind: RequestKind) -> Self {
        SubmitOptions {
            kind,
            max_retries: None,
            content_hash: None,
            immediate: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn deferred(mut self) -> Self {
        self.immediate = false;
        self
    }
}

/// Read-only view of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSnapshot {
    pub id: RequestId,
    pub kind: RequestKind,
    pub attempt: u32,
    pub max_attempts: u32,
    pub state: EntryState,
    pub content_hash: Option<String>,
    pub waiters: usize,
}

type ErasedValue = Arc<dyn Any + Send + Sync>;
type Operation =
    Arc<dyn Fn(AttemptContext) -> BoxFuture<'static, Result<ErasedValue>> + Send + Sync>;
type Waiter = Box<dyn FnOnce(Result<ErasedValue>) + Send>;

struct PendingRequest {
    id: RequestId,
    operation: Operation,
    waiters: Vec<Waiter>,
    created_at: Instant,
    last_try_at: Option<Instant>,
    retry: RetryState,
    kind: RequestKind,
    content_hash: Option<String>,
    state: EntryState,
}

impl PendingRequest {
    fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            id: self.id,
            kind: self.kind,
            attempt: self.retry.attempts,
            max_attempts: self.retry.max_retries(),
            state: self.state,
            content_hash: self.content_hash.clone(),
            waiters: self.waiters.len(),
        }
    }

    fn ready_for_sweep(&self, now: Instant) -> bool {
        self.state == EntryState::Queued
            && now.duration_since(self.last_try_at.unwrap_or(self.created_at))
                >= self.retry.current_delay()
    }
}

enum Next {
    RetryAfter(Duration, u32),
    Settle(Vec<Waiter>, TransportError),
}

struct QueueShared {
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
    next_id: AtomicU64,
    tracker: Arc<ConnectivityTracker>,
    retry: RetryConfig,
    chat_timeout: Duration,
    transcription_timeout: Duration,
    sweep_interval: Duration,
    sweep_throttle: Duration,
    destroyed: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.get_mut().take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    pub fn new(tracker: Arc<ConnectivityTracker>, config: &ClientConfig) -> Self {
        RequestQueue {
            shared: Arc::new(QueueShared {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tracker,
                retry: config.retry.clone(),
                chat_timeout: config.chat_request_timeout,
                transcription_timeout: config.transcription_request_timeout,
                sweep_interval: config.queue_sweep_interval,
                sweep_throttle: config.sweep_throttle,
                destroyed: AtomicBool::new(false),
                sweep_task: Mutex::new(None),
            }),
        }
    }

    pub fn tracker(&self) -> &Arc<ConnectivityTracker> {
        &self.shared.tracker
    }

    /// Run `operation` with retries and resolve once it succeeds or gives up.
    pub async fn submit<T, F, Fut>(&self, operation: F, options: SubmitOptions) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(AttemptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(TransportError::QueueDestroyed);
        }

        let (tx, rx) = oneshot::channel::<Result<T>>();
        let waiter: Waiter = Box::new(move |outcome| {
            let _ = tx.send(downcast::<T>(outcome));
        });
        let operation: Operation = Arc::new(move |ctx: AttemptContext| {
            let attempt = operation(ctx);
            async move { attempt.await.map(|v| Arc::new(v) as ErasedValue) }.boxed()
        });

        if let Some(id) = self.attach_or_insert(operation, waiter, options) {
            self.dispatch(id, 0);
        }

        rx.await.unwrap_or(Err(TransportError::QueueDestroyed))
    }

    /// Returns the id to dispatch right away, if any.
    fn attach_or_insert(
        &self,
        operation: Operation,
        waiter: Waiter,
        options: SubmitOptions,
    ) -> Option<RequestId> {
        let mut entries = self.shared.entries.lock();

        if let Some(hash) = options.content_hash.as_deref() {
            let existing = entries
                .values_mut()
                .find(|e| e.kind == options.kind && e.content_hash.as_deref() == Some(hash));
            if let Some(existing) = existing {
                debug!(
                    "[Queue] Duplicate request for hash {}, joining request {}",
                    hash, existing.id
                );
                existing.waiters.push(waiter);
                return None;
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let max_retries = options.max_retries.unwrap_or(self.shared.retry.max_retries);
        let retry = RetryState::new(self.shared.retry.clone().with_max_retries(max_retries));
        entries.insert(
            id,
            PendingRequest {
                id,
                operation,
                waiters: vec![waiter],
                created_at: Instant::now(),
                last_try_at: None,
                retry,
                kind: options.kind,
                content_hash: options.content_hash,
                state: EntryState::Queued,
            },
        );

        if options.immediate && self.shared.tracker.is_connected() {
            Some(id)
        } else {
            debug!("[Queue] Request {} queued until the server is reachable", id);
            None
        }
    }

    /// Start attempt `expected_attempt + 1` of `id` unless it is already
    /// running or has moved past that attempt.
    fn dispatch(&self, id: RequestId, expected_attempt: u32) -> bool {
        let (operation, ctx, kind) = {
            let mut entries = self.shared.entries.lock();
            let Some(entry) = entries.get_mut(&id) else {
                return false;
            };
            if entry.state == EntryState::Attempting || entry.retry.attempts != expected_attempt {
                return false;
            }
            entry.state = EntryState::Attempting;
            (
                Arc::clone(&entry.operation),
                AttemptContext {
                    request_id: id,
                    attempt: entry.retry.attempts,
                },
                entry.kind,
            )
        };

        let queue = self.clone();
        spawn_task(async move {
            queue.run_attempt(operation, ctx, kind).await;
        });
        true
    }

    async fn run_attempt(&self, operation: Operation, ctx: AttemptContext, kind: RequestKind) {
        let id = ctx.request_id;
        debug!("[Queue] Executing request {} (attempt {})", id, ctx.attempt + 1);

        let timeout = self.timeout_for(kind);
        let guard = self.shared.tracker.begin_request();
        let outcome = match tokio::time::timeout(timeout, operation(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        drop(guard);

        match outcome {
            Ok(value) => {
                self.shared.tracker.record_success();
                let entry = self.shared.entries.lock().remove(&id);
                if let Some(entry) = entry {
                    debug!(
                        "[Queue] Request {} succeeded, settling {} callers",
                        id,
                        entry.waiters.len()
                    );
                    for waiter in entry.waiters {
                        waiter(Ok(Arc::clone(&value)));
                    }
                }
            }
            Err(err) => self.handle_failure(id, err),
        }
    }

    fn handle_failure(&self, id: RequestId, err: TransportError) {
        warn!("[Queue] Request {} failed: {}", id, err);
        if err.is_connectivity() {
            self.shared.tracker.record_connectivity_failure();
        }

        let next = {
            let mut entries = self.shared.entries.lock();
            let Some(entry) = entries.get_mut(&id) else {
                return;
            };
            entry.last_try_at = Some(Instant::now());
            let decision = if err.is_retryable() {
                entry.retry.record_failure()
            } else {
                RetryDecision::DontRetry
            };
            match decision {
                RetryDecision::Retry(delay) => {
                    entry.state = EntryState::Queued;
                    Next::RetryAfter(delay, entry.retry.attempts)
                }
                RetryDecision::DontRetry => {
                    let attempts = entry.retry.attempts;
                    let waiters = entries.remove(&id).map(|e| e.waiters).unwrap_or_default();
                    let terminal = if err.is_retryable() {
                        TransportError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    Next::Settle(waiters, terminal)
                }
            }
        };

        match next {
            Next::RetryAfter(delay, attempts) => {
                debug!("[Queue] Retrying request {} in {:?}", id, delay);
                let queue = self.clone();
                spawn_task(async move {
                    sleep(delay).await;
                    queue.dispatch(id, attempts);
                });
            }
            Next::Settle(waiters, terminal) => {
                error!("[Queue] Giving up on request {}: {}", id, terminal);
                for waiter in waiters {
                    waiter(Err(terminal.clone()));
                }
            }
        }
    }

    fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Chat => self.shared.chat_timeout,
            RequestKind::Transcription => self.shared.transcription_timeout,
        }
    }

    /// Start the periodic sweep that retries queued entries once the server
    /// is reachable.
    pub fn start(&self) {
        let mut task = self.shared.sweep_task.lock();
        if task.is_some() || self.is_destroyed() {
            return;
        }
        let weak: Weak<QueueShared> = Arc::downgrade(&self.shared);
        let period = self.shared.sweep_interval;
        *task = Some(spawn_task(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                RequestQueue { shared }.sweep().await;
            }
        }));
    }

    /// Dispatch every queued entry whose backoff has elapsed.
    pub async fn sweep(&self) {
        if !self.shared.tracker.is_connected() {
            return;
        }

        let now = Instant::now();
        let mut ready: Vec<(RequestId, u32)> = self
            .shared
            .entries
            .lock()
            .values()
            .filter(|e| e.ready_for_sweep(now))
            .map(|e| (e.id, e.retry.attempts))
            .collect();
        if ready.is_empty() {
            return;
        }
        ready.sort_unstable();
        info!("[Queue] Sweep found {} requests ready to run", ready.len());

        for (id, attempts) in ready {
            if self.dispatch(id, attempts) {
                sleep(self.shared.sweep_throttle).await;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn entries(&self) -> Vec<PendingSnapshot> {
        let mut out: Vec<PendingSnapshot> = self
            .shared
            .entries
            .lock()
            .values()
            .map(PendingRequest::snapshot)
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Reject everything outstanding and stop the sweep. Attempts already on
    /// the wire are left to finish; their results are discarded.
    pub fn destroy(&self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.sweep_task.lock().take() {
            handle.abort();
        }
        let drained: Vec<PendingRequest> = self
            .shared
            .entries
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        if !drained.is_empty() {
            info!("[Queue] Destroyed with {} outstanding requests", drained.len());
        }
        for entry in drained {
            for waiter in entry.waiters {
                waiter(Err(TransportError::QueueDestroyed));
            }
        }
    }
}

fn downcast<T: Clone + 'static>(outcome: Result<ErasedValue>) -> Result<T> {
    outcome.and_then(|value| {
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            TransportError::Decode("shared request produced a different result type".into())
        })
    })
}
