//! Worker Pool - fixed-size pool of isolated rule workers
//!
//! Owns every `WorkerHandle`, admits jobs through a bounded FIFO queue and
//! supervises each running job:
//! - admission is synchronous: a full queue rejects with `PoolSaturated`
//! - one supervisor task per running job awaits the worker's reply or the deadline
//! - a worker that panics or misses its deadline is replaced before the next
//!   queued job is served; the job itself is never retried

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::RuleId;
use crate::dispatch::JobSink;
use crate::error::{Result, RuleError};
use crate::job::{Job, JobId, JobReply, JobResult};
use crate::registry::RuleRegistry;
use crate::types::{check_wire_depth, MetaData, RuleData, WireMeta};
use crate::worker::{execute_payload, spawn_worker, JobRunner, WorkerMessage};

/// Default grace period for draining jobs at shutdown
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Pool sizing and timing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads (fixed for the pool's lifetime)
    pub pool_size: usize,
    /// Jobs allowed to wait for a worker
    pub queue_depth: usize,
    /// Deadline for a job once a worker starts it
    pub job_timeout: Duration,
    /// How long shutdown waits for outstanding jobs
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            queue_depth: 64,
            job_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

/// Lifecycle state of a pooled worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Dead,
}

/// Point-in-time view of one worker slot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub worker_id: u64,
    pub state: WorkerState,
    pub current_job_id: Option<JobId>,
}

/// Pool counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub faulted: u64,
    pub timed_out: u64,
    pub saturated: u64,
    pub replaced: u64,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub dead_workers: usize,
    pub queued: usize,
}

struct WorkerHandle {
    worker_id: u64,
    state: WorkerState,
    current_job: Option<JobId>,
    sender: Option<mpsc::Sender<WorkerMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn(worker_id: u64, runner: JobRunner) -> Result<Self> {
        let (sender, thread) = spawn_worker(worker_id, runner)
            .map_err(|e| RuleError::WorkerSpawn(format!("worker {}: {}", worker_id, e)))?;
        Ok(Self {
            worker_id,
            state: WorkerState::Idle,
            current_job: None,
            sender: Some(sender),
            thread: Some(thread),
        })
    }
}

struct QueuedJob {
    job: Job,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<JobResult>>,
}

struct PoolState {
    workers: Vec<WorkerHandle>,
    queue: VecDeque<QueuedJob>,
    accepting: bool,
}

impl PoolState {
    fn idle_slot(&self) -> Option<usize> {
        self.workers
            .iter()
            .position(|w| w.state == WorkerState::Idle)
    }

    /// Whether any slot still has a worker thread to send to
    fn has_live_worker(&self) -> bool {
        self.workers.iter().any(|w| w.sender.is_some())
    }

    fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.workers.iter().all(|w| w.state != WorkerState::Busy)
    }
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    faulted: AtomicU64,
    timed_out: AtomicU64,
    saturated: AtomicU64,
    replaced: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct PoolInner {
    registry: Arc<RuleRegistry>,
    config: PoolConfig,
    runner: JobRunner,
    state: Mutex<PoolState>,
    /// Signalled whenever a worker frees up or the queue shrinks
    capacity: Notify,
    next_job_id: AtomicU64,
    next_worker_id: AtomicU64,
    counters: PoolCounters,
}

/// Handle to a submitted job
pub struct JobTicket {
    job_id: JobId,
    rx: oneshot::Receiver<Result<JobResult>>,
}

impl JobTicket {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the worker's result
    pub async fn wait(self) -> Result<JobResult> {
        self.rx.await.unwrap_or(Err(RuleError::PoolClosed))
    }
}

/// Fixed-size pool of rule workers
///
/// Must be started and used from within a tokio runtime.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start `pool_size` workers running the standard executor
    pub fn start(registry: Arc<RuleRegistry>, config: PoolConfig) -> Result<Self> {
        Self::start_with_runner(registry, config, execute_payload)
    }

    /// Start with a custom job executor
    pub fn start_with_runner(
        registry: Arc<RuleRegistry>,
        config: PoolConfig,
        runner: JobRunner,
    ) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(RuleError::Config("pool_size must be at least 1".to_string()));
        }

        let workers = (0..config.pool_size as u64)
            .map(|id| WorkerHandle::spawn(id, runner))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Worker pool started: {} workers, queue depth {}, job timeout {}ms",
            config.pool_size,
            config.queue_depth,
            config.job_timeout.as_millis()
        );

        let inner = PoolInner {
            registry,
            next_worker_id: AtomicU64::new(config.pool_size as u64),
            config,
            runner,
            state: Mutex::new(PoolState {
                workers,
                queue: VecDeque::new(),
                accepting: true,
            }),
            capacity: Notify::new(),
            next_job_id: AtomicU64::new(1),
            counters: PoolCounters::default(),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Admit a job, returning a ticket for its result
    ///
    /// Rejections (unknown or non-threadable rule, non-transferable metadata or
    /// input, full queue, closed pool, no live workers) are reported immediately.
    pub fn enqueue(
        &self,
        rule_id: RuleId,
        input_data: RuleData,
        input_meta_data: &MetaData,
    ) -> Result<JobTicket> {
        let inner = &self.inner;

        let entry = inner.registry.get(rule_id)?;
        if !entry.threadable {
            return Err(RuleError::NotThreadable(rule_id));
        }
        let closure = inner.registry.closure_ids(rule_id)?;
        let wire_meta = WireMeta::try_from(input_meta_data)?;
        check_wire_depth(&input_data, "input")?;

        let job = Job {
            job_id: JobId(inner.next_job_id.fetch_add(1, Ordering::Relaxed)),
            rule_id,
            input_data,
            input_meta_data: wire_meta,
            submitted_at: Utc::now(),
        };
        let payload = job.encode(closure)?;
        let job_id = job.job_id;
        let (reply, rx) = oneshot::channel();
        let queued = QueuedJob {
            job,
            payload,
            reply,
        };

        let mut state = inner.state.lock();
        if !state.accepting {
            return Err(RuleError::PoolClosed);
        }
        inner.revive_dead(&mut state);
        if !state.has_live_worker() {
            error!("{} ({}) rejected: no live workers", job_id, rule_id);
            return Err(no_live_workers());
        }

        if let Some(slot) = state.idle_slot() {
            inner.dispatch(&mut state, slot, queued);
        } else if state.queue.len() < inner.config.queue_depth {
            debug!("{} ({}) queued at position {}", job_id, rule_id, state.queue.len());
            state.queue.push_back(queued);
        } else {
            bump(&inner.counters.saturated);
            debug!("{} ({}) rejected: pool saturated", job_id, rule_id);
            return Err(RuleError::PoolSaturated {
                queue_depth: inner.config.queue_depth,
            });
        }

        bump(&inner.counters.submitted);
        Ok(JobTicket { job_id, rx })
    }

    /// Submit a job and wait for its result
    pub async fn submit(
        &self,
        rule_id: RuleId,
        input_data: RuleData,
        input_meta_data: &MetaData,
    ) -> Result<JobResult> {
        self.enqueue(rule_id, input_data, input_meta_data)?
            .wait()
            .await
    }

    /// Whether a new job would be admitted right now
    pub fn has_capacity(&self) -> bool {
        let state = self.inner.state.lock();
        state.accepting
            && (state.idle_slot().is_some() || state.queue.len() < self.inner.config.queue_depth)
    }

    /// Wait up to `budget` for capacity to appear
    pub async fn wait_for_capacity(&self, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let notified = self.inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has_capacity() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_capacity();
            }
        }
    }

    /// Stop admission, drain outstanding jobs within the grace period, then stop workers
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if !state.accepting {
                return;
            }
            state.accepting = false;
        }

        let grace = inner.config.shutdown_grace;
        info!("Shutting down worker pool (grace {}ms)", grace.as_millis());

        let deadline = Instant::now() + grace;
        loop {
            let notified = inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if inner.state.lock().is_drained() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Shutdown grace period elapsed with jobs outstanding");
                break;
            }
        }

        let (rejected, threads) = {
            let mut state = inner.state.lock();
            let rejected: Vec<QueuedJob> = state.queue.drain(..).collect();
            let mut threads = Vec::new();
            for worker in state.workers.iter_mut() {
                if let Some(sender) = worker.sender.take() {
                    let _ = sender.send(WorkerMessage::Shutdown);
                }
                // Busy threads are detached; they exit once their job returns
                if worker.state == WorkerState::Idle {
                    threads.extend(worker.thread.take());
                }
                worker.state = WorkerState::Dead;
            }
            (rejected, threads)
        };

        for queued in rejected {
            debug!("{} rejected: pool shut down", queued.job.job_id);
            let _ = queued.reply.send(Err(RuleError::PoolClosed));
        }

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Worker join task failed: {}", e);
        }

        inner.capacity.notify_waiters();
        info!("Worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        let state = self.inner.state.lock();
        let count = |s: WorkerState| state.workers.iter().filter(|w| w.state == s).count();

        PoolStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            faulted: counters.faulted.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            saturated: counters.saturated.load(Ordering::Relaxed),
            replaced: counters.replaced.load(Ordering::Relaxed),
            idle_workers: count(WorkerState::Idle),
            busy_workers: count(WorkerState::Busy),
            dead_workers: count(WorkerState::Dead),
            queued: state.queue.len(),
        }
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.inner
            .state
            .lock()
            .workers
            .iter()
            .map(|w| WorkerSnapshot {
                worker_id: w.worker_id,
                state: w.state,
                current_job_id: w.current_job,
            })
            .collect()
    }
}

impl PoolInner {
    /// Hand a job to the worker in `slot` and start supervising it
    fn dispatch(self: &Arc<Self>, state: &mut PoolState, slot: usize, queued: QueuedJob) {
        let QueuedJob {
            job,
            payload,
            reply,
        } = queued;
        let (worker_tx, worker_rx) = oneshot::channel();
        let message = WorkerMessage::Run {
            payload,
            reply: worker_tx,
        };

        let message = match self.try_send(&state.workers[slot], message) {
            Ok(()) => None,
            Err(returned) => Some(returned),
        };
        if let Some(message) = message {
            // Thread already gone; give the job to a fresh worker in the same slot
            warn!(
                "Worker {} unreachable, replacing before {}",
                state.workers[slot].worker_id, job.job_id
            );
            self.replace_worker(state, slot);
            if self.try_send(&state.workers[slot], message).is_err() {
                bump(&self.counters.faulted);
                let _ = reply.send(Err(RuleError::WorkerFault {
                    job_id: job.job_id.0,
                    worker_id: state.workers[slot].worker_id,
                    message: "no worker available".to_string(),
                }));
                return;
            }
        }

        let worker = &mut state.workers[slot];
        worker.state = WorkerState::Busy;
        worker.current_job = Some(job.job_id);
        let worker_id = worker.worker_id;

        let queued_ms = (Utc::now() - job.submitted_at).num_milliseconds();
        debug!(
            "{} ({}) dispatched to worker {} after {}ms in queue",
            job.job_id, job.rule_id, worker_id, queued_ms
        );

        let deadline = Instant::now() + self.config.job_timeout;
        tokio::spawn(Arc::clone(self).supervise(worker_id, job, worker_rx, reply, deadline));
    }

    fn try_send(
        &self,
        worker: &WorkerHandle,
        message: WorkerMessage,
    ) -> std::result::Result<(), WorkerMessage> {
        match worker.sender.as_ref() {
            Some(sender) => sender.send(message).map_err(|e| e.0),
            None => Err(message),
        }
    }

    /// Await one job's reply or deadline, then settle the worker
    async fn supervise(
        self: Arc<Self>,
        worker_id: u64,
        job: Job,
        worker_rx: oneshot::Receiver<Vec<u8>>,
        reply: oneshot::Sender<Result<JobResult>>,
        deadline: Instant,
    ) {
        let job_id = job.job_id;
        let (result, healthy) = match tokio::time::timeout_at(deadline, worker_rx).await {
            Ok(Ok(bytes)) => match JobReply::decode(&bytes) {
                Ok(answer) => {
                    let result = answer.into_result(job.rule_id).map(|value| JobResult {
                        job_id,
                        worker_id,
                        value,
                    });
                    (result, true)
                },
                Err(e) => (
                    Err(RuleError::WorkerFault {
                        job_id: job_id.0,
                        worker_id,
                        message: format!("undecodable reply: {}", e),
                    }),
                    false,
                ),
            },
            Ok(Err(_)) => (
                Err(RuleError::WorkerFault {
                    job_id: job_id.0,
                    worker_id,
                    message: "worker exited while running the job".to_string(),
                }),
                false,
            ),
            Err(_) => (
                Err(RuleError::JobTimeout {
                    job_id: job_id.0,
                    timeout_ms: self.config.job_timeout.as_millis() as u64,
                }),
                false,
            ),
        };

        match &result {
            Ok(_) => {
                bump(&self.counters.completed);
                debug!("{} ({}) completed on worker {}", job_id, job.rule_id, worker_id);
            },
            Err(RuleError::JobTimeout { .. }) => {
                bump(&self.counters.timed_out);
                warn!("{} ({}) timed out on worker {}", job_id, job.rule_id, worker_id);
            },
            Err(e @ RuleError::WorkerFault { .. }) => {
                bump(&self.counters.faulted);
                error!("{} ({}): {}", job_id, job.rule_id, e);
            },
            Err(e) => {
                bump(&self.counters.failed);
                debug!("{} ({}) failed: {}", job_id, job.rule_id, e);
            },
        }

        self.finish(worker_id, healthy);
        let _ = reply.send(result);
    }

    /// Return a worker to service (or replace it) and serve the queue
    fn finish(self: &Arc<Self>, worker_id: u64, healthy: bool) {
        {
            let mut state = self.state.lock();
            if let Some(slot) = state.workers.iter().position(|w| w.worker_id == worker_id) {
                let worker = &mut state.workers[slot];
                worker.current_job = None;
                // Shutdown takes the channel of every worker it stops
                let stopped = worker.sender.is_none();

                if stopped {
                    worker.state = WorkerState::Dead;
                } else if healthy {
                    worker.state = WorkerState::Idle;
                } else {
                    self.replace_worker(&mut state, slot);
                }
            }
            self.pump(&mut state);
            if !state.has_live_worker() {
                self.reject_queued(&mut state);
            }
        }
        self.capacity.notify_waiters();
    }

    /// Dispatch queued jobs to idle workers, oldest first
    fn pump(self: &Arc<Self>, state: &mut PoolState) {
        while !state.queue.is_empty() {
            let Some(slot) = state.idle_slot() else {
                break;
            };
            if let Some(next) = state.queue.pop_front() {
                self.dispatch(state, slot, next);
            }
        }
    }

    /// Fail every queued job; nothing is left to serve them
    fn reject_queued(&self, state: &mut PoolState) {
        for queued in state.queue.drain(..) {
            bump(&self.counters.failed);
            error!("{} ({}) rejected: no live workers", queued.job.job_id, queued.job.rule_id);
            let _ = queued.reply.send(Err(no_live_workers()));
        }
    }

    /// Retire the worker in `slot` and spawn a fresh one in its place
    ///
    /// The old thread cannot be interrupted; dropping its channel makes it exit
    /// as soon as its current computation returns.
    fn replace_worker(&self, state: &mut PoolState, slot: usize) {
        let old = &mut state.workers[slot];
        let old_id = old.worker_id;
        old.state = WorkerState::Dead;
        old.current_job = None;
        old.sender = None;
        if let Some(thread) = old.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            }
        }

        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        match WorkerHandle::spawn(worker_id, self.runner) {
            Ok(handle) => {
                state.workers[slot] = handle;
                bump(&self.counters.replaced);
                warn!("Worker {} replaced by worker {}", old_id, worker_id);
            },
            Err(e) => error!("Failed to replace worker {}: {}", old_id, e),
        }
    }

    fn revive_dead(&self, state: &mut PoolState) {
        for slot in 0..state.workers.len() {
            if state.workers[slot].state == WorkerState::Dead {
                self.replace_worker(state, slot);
            }
        }
    }
}

fn no_live_workers() -> RuleError {
    RuleError::WorkerSpawn("no live workers in the pool".to_string())
}

#[async_trait]
impl JobSink for WorkerPool {
    fn has_capacity(&self) -> bool {
        WorkerPool::has_capacity(self)
    }

    async fn wait_for_capacity(&self, budget: Duration) -> bool {
        WorkerPool::wait_for_capacity(self, budget).await
    }

    async fn submit_job(
        &self,
        rule_id: RuleId,
        input_data: RuleData,
        input_meta_data: &MetaData,
    ) -> Result<RuleData> {
        Ok(self.submit(rule_id, input_data, input_meta_data).await?.value)
    }
}
