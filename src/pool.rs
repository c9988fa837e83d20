use crate::{
    config::Config,
    error::TaskError,
    progress::ProgressTracker,
    report::ProcessingResult,
    sampler::{ResourceSampler, ResourceSnapshot},
    task::{Task, TaskRef},
    util::{elapsed_ms, now_rfc3339},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-task work executed on a blocking thread. Implementations report every
/// outcome through the returned result; panics are caught by the pool.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: &Task, cancel: &CancellationToken) -> ProcessingResult;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub memory_threshold: f64,
    pub cpu_threshold: f64,
    pub hysteresis_margin: f64,
    pub check_interval: Duration,
    /// 0 means unbounded.
    pub queue_capacity: usize,
    /// Worker-count samples kept for the batch report.
    pub history_len: usize,
}

impl PoolSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let w = &cfg.workers;
        Self {
            min_workers: w.min_workers,
            max_workers: cfg.effective_max_workers(),
            memory_threshold: w.memory_threshold,
            cpu_threshold: w.cpu_threshold,
            hysteresis_margin: w.hysteresis_margin,
            check_interval: Duration::from_millis(w.check_interval_ms),
            queue_capacity: w.queue_capacity,
            history_len: w.history_len,
        }
    }

    /// Single worker, no scaling headroom.
    pub fn sequential(self) -> Self {
        Self {
            min_workers: 1,
            max_workers: 1,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub current_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub pending_count: usize,
    pub in_flight_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub min_workers: usize,
    pub max_workers: usize,
    pub peak_workers: usize,
    pub final_workers: usize,
    pub scale_ups: u32,
    pub scale_downs: u32,
    pub crashes: u32,
}

/// Worker count and load at one scaling check. `decision` is `None` for the
/// reading taken when the pool starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSample {
    pub timestamp: String,
    pub current_workers: usize,
    pub pending_count: usize,
    pub in_flight_count: usize,
    pub cpu_fraction: f64,
    pub memory_fraction: f64,
    pub stale: bool,
    pub decision: Option<ScalingDecision>,
}

/// Returned by [`AdaptiveWorkerPool::try_submit`] with the rejected task.
#[derive(Debug)]
pub struct Rejected {
    pub task: Task,
    pub error: TaskError,
}

struct Inner {
    state: PoolState,
    queue: VecDeque<Task>,
    accepting: bool,
    results: Vec<ProcessingResult>,
    stats: PoolStats,
    history: VecDeque<WorkerSample>,
}

impl Inner {
    fn record(&mut self, s: &ResourceSnapshot, decision: Option<ScalingDecision>, cap: usize) {
        if cap == 0 {
            return;
        }
        while self.history.len() >= cap {
            self.history.pop_front();
        }
        self.history.push_back(WorkerSample {
            timestamp: now_rfc3339(),
            current_workers: self.state.current_workers,
            pending_count: self.state.pending_count,
            in_flight_count: self.state.in_flight_count,
            cpu_fraction: s.cpu_fraction,
            memory_fraction: s.memory_fraction,
            stale: s.stale,
            decision,
        });
    }
}

enum Take {
    Run(Task),
    Park,
    Exit,
}

struct Shared {
    settings: PoolSettings,
    inner: Mutex<Inner>,
    notify: Notify,
    runner: Arc<dyn TaskRunner>,
    progress: Option<Arc<ProgressTracker>>,
    cancel: CancellationToken,
}

/// Bounded set of workers draining one shared queue. Starts at
/// `max_workers`; worker slot `i` only takes tasks while
/// `i < current_workers`, so scaling never interrupts a running task.
pub struct AdaptiveWorkerPool {
    shared: Arc<Shared>,
    sampler: Arc<ResourceSampler>,
    workers: Vec<JoinHandle<()>>,
    scaler: Option<JoinHandle<()>>,
    stop_scaler: CancellationToken,
}

impl AdaptiveWorkerPool {
    /// Spawns the workers and the periodic scaling loop. Must be called from
    /// within a tokio runtime.
    pub fn start(
        settings: PoolSettings,
        sampler: Arc<ResourceSampler>,
        runner: Arc<dyn TaskRunner>,
        progress: Option<Arc<ProgressTracker>>,
        cancel: CancellationToken,
    ) -> Self {
        let min = settings.min_workers.max(1);
        let max = settings.max_workers.max(min);
        let settings = PoolSettings {
            min_workers: min,
            max_workers: max,
            ..settings
        };

        let shared = Arc::new(Shared {
            settings,
            inner: Mutex::new(Inner {
                state: PoolState {
                    current_workers: max,
                    min_workers: min,
                    max_workers: max,
                    pending_count: 0,
                    in_flight_count: 0,
                },
                queue: VecDeque::new(),
                accepting: true,
                results: Vec::new(),
                stats: PoolStats {
                    min_workers: min,
                    max_workers: max,
                    peak_workers: max,
                    final_workers: max,
                    ..Default::default()
                },
                history: VecDeque::new(),
            }),
            notify: Notify::new(),
            runner,
            progress,
            cancel,
        });

        shared
            .inner
            .lock()
            .record(&sampler.latest(), None, settings.history_len);

        let workers = (0..max)
            .map(|slot| tokio::spawn(worker_loop(slot, shared.clone())))
            .collect();

        let mut pool = Self {
            shared,
            sampler,
            workers,
            scaler: None,
            stop_scaler: CancellationToken::new(),
        };
        if max > min {
            pool.scaler = Some(pool.spawn_scaler());
        }
        info!(min_workers = min, max_workers = max, "worker pool started");
        pool
    }

    fn spawn_scaler(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let sampler = self.sampler.clone();
        let stop = self.stop_scaler.clone();
        let period = shared.settings.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.cancelled() => break,
                    _ = shared.cancel.cancelled() => break,
                }
                let sampler = sampler.clone();
                let snapshot = match tokio::task::spawn_blocking(move || sampler.sample()).await {
                    Ok(s) => s,
                    Err(err) => {
                        warn!("resource sampling task failed: {err}");
                        continue;
                    }
                };
                shared.apply_scaling(&snapshot);
            }
            debug!("scaling loop stopped");
        })
    }

    /// Enqueues without waiting. Rejected when the bounded queue is full or
    /// the batch has been cancelled.
    pub fn try_submit(&self, task: Task) -> Result<(), Rejected> {
        {
            let mut inner = self.shared.inner.lock();
            if self.shared.cancel.is_cancelled() || !inner.accepting {
                return Err(Rejected {
                    task,
                    error: TaskError::Cancelled,
                });
            }
            let capacity = self.shared.settings.queue_capacity;
            if capacity > 0 && inner.queue.len() >= capacity {
                return Err(Rejected {
                    task,
                    error: TaskError::QueueSaturated { capacity },
                });
            }
            inner.queue.push_back(task);
            inner.state.pending_count += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Enqueues, waiting while the queue is saturated. A task that cannot be
    /// queued because of cancellation is recorded as cancelled.
    pub async fn submit(&self, task: Task) -> Result<(), TaskError> {
        let mut task = task;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_submit(task) {
                Ok(()) => return Ok(()),
                Err(Rejected {
                    task: back,
                    error: TaskError::QueueSaturated { .. },
                }) => {
                    task = back;
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = self.shared.cancel.cancelled() => {}
                    }
                }
                Err(Rejected { task, error }) => {
                    self.shared.finish_cancelled(task);
                    return Err(error);
                }
            }
        }
    }

    /// Samples resources and applies at most one scaling step.
    pub fn scale_check(&self) -> ScalingDecision {
        let snapshot = self.sampler.sample();
        self.shared.apply_scaling(&snapshot)
    }

    pub fn apply_scaling(&self, snapshot: &ResourceSnapshot) -> ScalingDecision {
        self.shared.apply_scaling(snapshot)
    }

    pub fn state(&self) -> PoolState {
        self.shared.inner.lock().state
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.inner.lock().stats
    }

    /// Oldest first, at most `history_len` entries.
    pub fn worker_history(&self) -> Vec<WorkerSample> {
        self.shared.inner.lock().history.iter().cloned().collect()
    }

    /// Stops accepting tasks, waits for queued and in-flight tasks, and hands
    /// back every result collected so far.
    pub async fn drain_and_shutdown(&mut self) -> Vec<ProcessingResult> {
        self.shared.inner.lock().accepting = false;
        self.shared.notify.notify_waiters();

        for handle in self.workers.drain(..) {
            if let Err(err) = handle.await {
                warn!("worker loop ended abnormally: {err}");
            }
        }
        self.stop_scaler.cancel();
        if let Some(handle) = self.scaler.take() {
            if let Err(err) = handle.await {
                warn!("scaling loop ended abnormally: {err}");
            }
        }

        let leftover: Vec<Task> = self.shared.inner.lock().queue.drain(..).collect();
        for task in leftover {
            self.shared.finish_cancelled(task);
        }

        let mut inner = self.shared.inner.lock();
        inner.stats.final_workers = inner.state.current_workers;
        info!(
            results = inner.results.len(),
            peak_workers = inner.stats.peak_workers,
            "worker pool drained"
        );
        std::mem::take(&mut inner.results)
    }
}

impl Shared {
    fn apply_scaling(&self, s: &ResourceSnapshot) -> ScalingDecision {
        if s.stale {
            debug!("stale resource snapshot; holding worker count");
            self.inner
                .lock()
                .record(s, Some(ScalingDecision::Hold), self.settings.history_len);
            return ScalingDecision::Hold;
        }
        let cfg = &self.settings;
        let over = s.memory_fraction > cfg.memory_threshold || s.cpu_fraction > cfg.cpu_threshold;
        let comfortable = s.memory_fraction < cfg.memory_threshold - cfg.hysteresis_margin
            && s.cpu_fraction < cfg.cpu_threshold - cfg.hysteresis_margin;

        let decision = {
            let mut inner = self.inner.lock();
            let st = &mut inner.state;
            let decision = if over && st.current_workers > st.min_workers {
                st.current_workers -= 1;
                ScalingDecision::ScaleDown
            } else if !over
                && comfortable
                && st.pending_count > 0
                && st.current_workers < st.max_workers
            {
                st.current_workers += 1;
                ScalingDecision::ScaleUp
            } else {
                ScalingDecision::Hold
            };
            let current = st.current_workers;
            match decision {
                ScalingDecision::ScaleUp => inner.stats.scale_ups += 1,
                ScalingDecision::ScaleDown => inner.stats.scale_downs += 1,
                ScalingDecision::Hold => {}
            }
            inner.stats.peak_workers = inner.stats.peak_workers.max(current);
            inner.record(s, Some(decision), cfg.history_len);
            if decision != ScalingDecision::Hold {
                info!(
                    workers = current,
                    cpu = s.cpu_fraction,
                    memory = s.memory_fraction,
                    "worker count {}",
                    if decision == ScalingDecision::ScaleUp { "raised" } else { "lowered" }
                );
            }
            decision
        };

        if decision == ScalingDecision::ScaleUp {
            self.notify.notify_waiters();
        }
        decision
    }

    fn take(&self, slot: usize) -> Take {
        let mut inner = self.inner.lock();
        if self.cancel.is_cancelled() {
            let queued: Vec<Task> = inner.queue.drain(..).collect();
            inner.state.pending_count = 0;
            for task in queued {
                let result = cancelled_result(&task);
                inner.results.push(result.clone());
                if let Some(progress) = &self.progress {
                    progress.on_result(&result);
                }
            }
            return Take::Exit;
        }
        if slot >= inner.state.current_workers {
            return if inner.accepting || !inner.queue.is_empty() {
                Take::Park
            } else {
                Take::Exit
            };
        }
        let popped = inner.queue.pop_front();
        match popped {
            Some(task) => {
                inner.state.pending_count -= 1;
                inner.state.in_flight_count += 1;
                drop(inner);
                // A queue slot opened up for blocked submitters.
                self.notify.notify_waiters();
                Take::Run(task)
            }
            None if inner.accepting => Take::Park,
            None => Take::Exit,
        }
    }

    async fn execute(&self, slot: usize, task: Task) {
        let task_ref = task.task_ref();
        let limit = task.timeout;
        let token = self.cancel.child_token();
        let job_token = token.clone();
        let runner = self.runner.clone();
        let started = Instant::now();
        debug!(slot, task = task_ref.id, path = %task_ref.path, "task started");

        let handle = tokio::task::spawn_blocking(move || runner.run(&task, &job_token));
        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined_result(joined, &task_ref, started),
                Err(_) => {
                    token.cancel();
                    warn!(
                        task = task_ref.id,
                        timeout_secs = limit.as_secs_f64(),
                        "task timed out; releasing worker slot"
                    );
                    ProcessingResult::failed(
                        task_ref.clone(),
                        &TaskError::crash(format!("timed out after {:.1}s", limit.as_secs_f64())),
                        elapsed_ms(started),
                    )
                }
            },
            None => joined_result(handle.await, &task_ref, started),
        };

        self.complete(result);
    }

    fn complete(&self, result: ProcessingResult) {
        let crashed = result
            .error
            .as_ref()
            .is_some_and(|e| e.kind == crate::error::FailureKind::WorkerCrash);
        if let Some(progress) = &self.progress {
            progress.on_result(&result);
        }
        {
            let mut inner = self.inner.lock();
            inner.state.in_flight_count -= 1;
            if crashed {
                inner.stats.crashes += 1;
            }
            inner.results.push(result);
        }
        self.notify.notify_waiters();
    }

    fn finish_cancelled(&self, task: Task) {
        let result = cancelled_result(&task);
        if let Some(progress) = &self.progress {
            progress.on_result(&result);
        }
        self.inner.lock().results.push(result);
    }
}

async fn worker_loop(slot: usize, shared: Arc<Shared>) {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.take(slot) {
            Take::Run(task) => shared.execute(slot, task).await,
            Take::Exit => break,
            Take::Park => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = shared.cancel.cancelled() => {}
                }
            }
        }
    }
    debug!(slot, "worker exited");
}

fn cancelled_result(task: &Task) -> ProcessingResult {
    ProcessingResult::failed(task.task_ref(), &TaskError::Cancelled, 0)
}

fn joined_result(
    joined: Result<ProcessingResult, JoinError>,
    task_ref: &TaskRef,
    started: Instant,
) -> ProcessingResult {
    match joined {
        Ok(result) => result,
        Err(err) => {
            let message = if err.is_panic() {
                panic_message(err.into_panic())
            } else {
                err.to_string()
            };
            warn!(task = task_ref.id, "worker crashed: {message}");
            ProcessingResult::failed(
                task_ref.clone(),
                &TaskError::crash(message),
                elapsed_ms(started),
            )
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
