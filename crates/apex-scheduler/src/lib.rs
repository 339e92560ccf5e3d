//! Six-level priority scheduler: a single cooperative controller loop
//! that dispatches queued tasks as forked fibers, enforces per-priority
//! and global concurrency caps, relieves starvation of lower-priority
//! work, and applies back-pressure on bounded per-priority buffers.
//!
//! The controller is the only mutator of queue/active-count state
//! (§5 "single-threaded cooperative" model); callers reach it only
//! through [`Scheduler::offer`], which is safe to call concurrently
//! from any number of tasks.

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod cancellation;
mod metrics;

pub use cancellation::CancellationToken;
pub use metrics::{BackPressureStats, LatencyPercentiles, PriorityMetrics, RequestTypeBreakdown, SchedulerMetrics};

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How long a single priority scan may run before the controller yields
/// and restarts, fixed per the core specification (§4.5 "per scan pass
/// (fixed, 5)").
const YIELD_BUDGET_MS: u64 = 5;
/// How often the controller emits a structured state summary.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

/// Strictly ordered priority levels, highest first. `Critical` is
/// internal: it never appears in public metrics snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Priority {
    /// Internal-only, highest priority.
    Critical = 0,
    /// `hover`/`completion`/`signatureHelp`-class requests.
    Immediate = 1,
    /// `definition`/`typeDefinition`-class requests and symbol-table ingestion.
    High = 2,
    /// `documentSymbol`/`foldingRange`-class requests.
    Normal = 3,
    /// `references`/`workspaceSymbol`-class requests.
    Low = 4,
    /// Batch/validator work with no deadline.
    Background = 5,
}

impl Priority {
    /// Every level, `Critical` first.
    pub const ALL: [Priority; 6] =
        [Priority::Critical, Priority::Immediate, Priority::High, Priority::Normal, Priority::Low, Priority::Background];

    /// Levels exposed in public metrics (`Critical` excluded).
    pub const PUBLIC: [Priority; 5] =
        [Priority::Immediate, Priority::High, Priority::Normal, Priority::Low, Priority::Background];

    /// Array index matching declaration order.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name, used as the metrics map key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Immediate => "immediate",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }

    /// Whether this priority is admitted past the global concurrency cap
    /// to prevent priority inversion (§4.5 step 3d).
    #[inline]
    pub const fn bypasses_total_cap(self) -> bool {
        matches!(self, Priority::Critical | Priority::Immediate | Priority::High)
    }
}

/// Errors raised by scheduler operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// A task's bounded queue stayed full through every retry.
    #[error("bounded queue for priority {0:?} is full")]
    BoundedBufferFull(Priority),
    /// A task's handler-supplied timeout elapsed before completion.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
    /// The task's cancellation token was set before or during execution.
    #[error("task was cancelled")]
    Cancelled,
    /// The controller has already been shut down.
    #[error("scheduler has been shut down")]
    ShutDown,
}

/// Configuration knobs for one [`Scheduler`] (§4.5 Configuration).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Per-priority bounded buffer size, indexed by [`Priority::index`].
    pub queue_capacity: [usize; 6],
    /// Per-priority maximum active tasks; `None` means unbounded.
    pub max_concurrency: [Option<usize>; 6],
    /// Global cap across all priorities; `None` means unbounded.
    pub max_total_concurrency: Option<usize>,
    /// Consecutive non-`{Normal,Low,Background}` dispatches that trigger
    /// starvation relief.
    pub max_high_priority_streak: u32,
    /// Sleep duration when a full scan finds nothing dispatchable.
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: [200; 6],
            max_concurrency: [None; 6],
            max_total_concurrency: None,
            max_high_priority_streak: 50,
            idle_sleep_ms: 1,
        }
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier assigned to every submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A task's output: the handler's payload, or a scheduler-level failure.
pub type TaskOutput = Result<serde_json::Value, SchedulerError>;
/// A task's suspendable computation.
pub type TaskEffect = Pin<Box<dyn Future<Output = TaskOutput> + Send>>;

struct Task {
    #[allow(dead_code)]
    id: TaskId,
    request_type: String,
    effect: TaskEffect,
    fiber_deferred: oneshot::Sender<TaskOutput>,
    cancellation: CancellationToken,
    timeout: Option<Duration>,
    #[allow(dead_code)]
    submitted_at: Instant,
}

/// Handle returned by [`Scheduler::offer`]; await [`TaskHandle::join`] to
/// observe the dispatched fiber's completion.
pub struct TaskHandle {
    id: TaskId,
    receiver: oneshot::Receiver<TaskOutput>,
}

impl TaskHandle {
    /// This task's assigned id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Await the task's completion.
    pub async fn join(self) -> TaskOutput {
        self.receiver.await.unwrap_or(Err(SchedulerError::Cancelled))
    }
}

type TypeKey = (Priority, String);

struct SchedulerState {
    queues: [VecDeque<Task>; 6],
    active_by_priority: [usize; 6],
    queued_by_type: HashMap<TypeKey, usize>,
    active_by_type: HashMap<TypeKey, usize>,
    completed_by_type: HashMap<TypeKey, usize>,
    tasks_started: u64,
    tasks_completed: u64,
    tasks_dropped: u64,
    back_pressure_events: [u64; 6],
    back_pressure_wait_ms: [u64; 6],
    enqueue_retries: [u64; 6],
    streak: u32,
    last_summary: Instant,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            queues: Default::default(),
            active_by_priority: [0; 6],
            queued_by_type: HashMap::new(),
            active_by_type: HashMap::new(),
            completed_by_type: HashMap::new(),
            tasks_started: 0,
            tasks_completed: 0,
            tasks_dropped: 0,
            back_pressure_events: [0; 6],
            back_pressure_wait_ms: [0; 6],
            enqueue_retries: [0; 6],
            streak: 0,
            last_summary: Instant::now(),
        }
    }

    fn bump(map: &mut HashMap<TypeKey, usize>, key: &TypeKey, delta: i64) {
        let entry = map.entry(key.clone()).or_insert(0);
        *entry = if delta < 0 { entry.saturating_sub((-delta) as usize) } else { *entry + delta as usize };
    }
}

/// A cooperative, priority-ordered task scheduler.
///
/// Created via [`Scheduler::new`] and driven by a single controller
/// spawned with [`Scheduler::spawn_controller`]. Every other method is
/// safe to call from any number of concurrent tasks.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    config: SchedulerConfig,
    /// Live overrides of `config.max_concurrency`, applied by settings
    /// change notifications (§4.8) without requiring a fresh scheduler.
    live_max_concurrency: Mutex<[Option<usize>; 6]>,
    shutdown_signal: AtomicBool,
    metrics_callback: Mutex<Option<Box<dyn Fn(&SchedulerMetrics, &SchedulerMetrics) + Send + Sync>>>,
    last_metrics: Mutex<Option<SchedulerMetrics>>,
    /// Fed a dispatched task's priority and running time on completion;
    /// installed by `apex-observability` to drive its percentile tracker.
    latency_callback: Mutex<Option<Box<dyn Fn(Priority, Duration) + Send + Sync>>>,
    /// Consulted by the 30s structured summary line for per-priority
    /// latency percentiles (§4.9).
    latency_summary_provider: Mutex<Option<Box<dyn Fn() -> HashMap<Priority, LatencyPercentiles> + Send + Sync>>>,
}

impl Scheduler {
    /// Build a scheduler, not yet driven by any controller.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let live_max_concurrency = Mutex::new(config.max_concurrency);
        Arc::new(Self {
            state: Mutex::new(SchedulerState::new()),
            config,
            live_max_concurrency,
            shutdown_signal: AtomicBool::new(false),
            metrics_callback: Mutex::new(None),
            last_metrics: Mutex::new(None),
            latency_callback: Mutex::new(None),
            latency_summary_provider: Mutex::new(None),
        })
    }

    /// Apply a live settings change to one priority's concurrency cap
    /// (§4.8 "Subscribers ... may reject disallowed live changes"). If
    /// `limit` is already below the priority's current active count the
    /// change is accepted and logged, not rejected — it simply takes
    /// effect the next time the controller considers dispatching that
    /// priority, which will naturally stay saturated until enough
    /// in-flight tasks complete to fall under the new cap.
    pub fn update_max_concurrency(&self, priority: Priority, limit: Option<usize>) {
        let idx = priority.index();
        let active = self.state.lock().active_by_priority[idx];
        if let Some(new_limit) = limit {
            if active > new_limit {
                warn!(
                    ?priority,
                    active,
                    new_limit,
                    "reducing max concurrency below current active count; enforced on next dispatch"
                );
            }
        }
        self.live_max_concurrency.lock()[idx] = limit;
    }

    fn max_concurrency_for(&self, idx: usize) -> Option<usize> {
        self.live_max_concurrency.lock()[idx]
    }

    /// Register the change-driven metrics callback (§4.9).
    pub fn set_metrics_callback<F>(&self, callback: F)
    where
        F: Fn(&SchedulerMetrics, &SchedulerMetrics) + Send + Sync + 'static,
    {
        *self.metrics_callback.lock() = Some(Box::new(callback));
    }

    /// Register a callback invoked with a dispatched task's priority and
    /// its running duration every time that task completes (§4.9).
    pub fn set_latency_callback<F>(&self, callback: F)
    where
        F: Fn(Priority, Duration) + Send + Sync + 'static,
    {
        *self.latency_callback.lock() = Some(Box::new(callback));
    }

    /// Register a provider the controller consults for per-priority
    /// latency percentiles in the 30s structured summary line (§4.9).
    pub fn set_latency_summary_provider<F>(&self, provider: F)
    where
        F: Fn() -> HashMap<Priority, LatencyPercentiles> + Send + Sync + 'static,
    {
        *self.latency_summary_provider.lock() = Some(Box::new(provider));
    }

    /// Spawn the single controller loop. The returned handle completes
    /// once [`Scheduler::shutdown`] has been called and the loop notices.
    pub fn spawn_controller(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(this.controller_loop())
    }

    /// Signal the controller to exit on its next iteration. In-flight
    /// fibers are allowed to complete; nothing is force-interrupted.
    pub fn shutdown(&self) {
        self.shutdown_signal.store(true, Ordering::SeqCst);
    }

    /// Reset all queue and counter state so the scheduler may be reused
    /// after [`Scheduler::shutdown`].
    pub fn reset(&self) {
        *self.state.lock() = SchedulerState::new();
        *self.live_max_concurrency.lock() = self.config.max_concurrency;
        self.shutdown_signal.store(false, Ordering::SeqCst);
    }

    /// Whether a shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_signal.load(Ordering::SeqCst)
    }

    /// Enqueue a task at `priority`. Retries with a 1 ms sleep while the
    /// bounded buffer is full, recording a back-pressure event on the
    /// first failed attempt and accumulating wait time and retry count
    /// (§4.5 Enqueue).
    pub async fn offer(
        self: &Arc<Self>,
        priority: Priority,
        request_type: impl Into<String>,
        timeout: Option<Duration>,
        cancellation: CancellationToken,
        effect: TaskEffect,
    ) -> Result<TaskHandle, SchedulerError> {
        if self.is_shutting_down() {
            return Err(SchedulerError::ShutDown);
        }

        let request_type = request_type.into();
        let (tx, rx) = oneshot::channel();
        let id = TaskId::next();
        let task = Task {
            id,
            request_type: request_type.clone(),
            effect,
            fiber_deferred: tx,
            cancellation,
            timeout,
            submitted_at: Instant::now(),
        };

        let idx = priority.index();
        let capacity = self.config.queue_capacity[idx];
        let key: TypeKey = (priority, request_type.clone());
        let mut retries: u64 = 0;
        let mut wait_ms: u64 = 0;

        loop {
            {
                let mut state = self.state.lock();
                if state.queues[idx].len() < capacity {
                    state.queues[idx].push_back(task);
                    SchedulerState::bump(&mut state.queued_by_type, &key, 1);
                    if wait_ms > 0 {
                        state.back_pressure_wait_ms[idx] += wait_ms;
                    }
                    drop(state);
                    debug!(?priority, request_type = %request_type, "task enqueued");
                    self.emit_metrics_if_changed();
                    return Ok(TaskHandle { id, receiver: rx });
                }

                if retries == 0 {
                    state.back_pressure_events[idx] += 1;
                    warn!(?priority, "queue at capacity, entering back-pressure retry");
                }
                state.enqueue_retries[idx] += 1;
                retries += 1;
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
            wait_ms += 1;
        }
    }

    fn maybe_emit_summary(&self) {
        let mut state = self.state.lock();
        if state.last_summary.elapsed() < SUMMARY_INTERVAL {
            return;
        }
        state.last_summary = Instant::now();
        let queue_sizes: Vec<usize> = state.queues.iter().map(VecDeque::len).collect();
        let active: Vec<usize> = state.active_by_priority.to_vec();
        let started = state.tasks_started;
        let completed = state.tasks_completed;
        drop(state);

        let latency: Option<HashMap<&'static str, LatencyPercentiles>> =
            self.latency_summary_provider.lock().as_ref().map(|provider| {
                provider().into_iter().map(|(priority, percentiles)| (priority.as_str(), percentiles)).collect()
            });
        debug!(?queue_sizes, ?active, started, completed, ?latency, "scheduler summary");
    }

    fn warn_on_queue_pressure(priority: Priority, queue_size: usize, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let utilization = queue_size as f64 / capacity as f64;
        if utilization >= 0.9 {
            warn!(?priority, queue_size, capacity, "queue above 90% capacity");
        } else if utilization >= 0.75 {
            warn!(?priority, queue_size, capacity, "queue above 75% capacity");
        }
    }

    /// Try to dispatch one task at `priority`, honoring concurrency
    /// limits. Returns `true` if a task was dispatched (cancelled tasks
    /// popped along the way are resolved and skipped, not counted).
    fn dispatch_one_if_eligible(self: &Arc<Self>, priority: Priority) -> bool {
        let idx = priority.index();

        {
            let state = self.state.lock();
            Self::warn_on_queue_pressure(priority, state.queues[idx].len(), self.config.queue_capacity[idx]);

            if let Some(limit) = self.max_concurrency_for(idx) {
                if state.active_by_priority[idx] >= limit {
                    return false;
                }
            }

            let total_active: usize = state.active_by_priority.iter().sum();
            if let Some(total_limit) = self.config.max_total_concurrency {
                if total_active >= total_limit && !priority.bypasses_total_cap() {
                    return false;
                }
            }
        }

        loop {
            let task = {
                let mut state = self.state.lock();
                let task = state.queues[idx].pop_front();
                if let Some(t) = &task {
                    let key: TypeKey = (priority, t.request_type.clone());
                    SchedulerState::bump(&mut state.queued_by_type, &key, -1);
                }
                task
            };
            let Some(task) = task else { return false };

            if task.cancellation.is_cancelled() {
                debug!(?priority, request_type = %task.request_type, "skipping cancelled queued task");
                let _ = task.fiber_deferred.send(Err(SchedulerError::Cancelled));
                continue;
            }

            {
                let mut state = self.state.lock();
                state.streak += 1;
            }
            self.dispatch(priority, task);
            return true;
        }
    }

    fn dispatch(self: &Arc<Self>, priority: Priority, task: Task) {
        let idx = priority.index();
        let key: TypeKey = (priority, task.request_type.clone());
        {
            let mut state = self.state.lock();
            SchedulerState::bump(&mut state.active_by_type, &key, 1);
            state.active_by_priority[idx] += 1;
            state.tasks_started += 1;
        }
        self.emit_metrics_if_changed();

        let this = Arc::clone(self);
        let request_type = task.request_type;
        let cancellation = task.cancellation;
        let timeout_dur = task.timeout;
        let fiber_deferred = task.fiber_deferred;
        let effect = task.effect;
        let dispatch_start = Instant::now();

        tokio::spawn(async move {
            let outcome = match timeout_dur {
                Some(d) => match tokio::time::timeout(d, Self::run_with_cancellation(effect, cancellation)).await {
                    Ok(result) => result,
                    Err(_) => Err(SchedulerError::Timeout(d)),
                },
                None => Self::run_with_cancellation(effect, cancellation).await,
            };

            this.complete_task(priority, &request_type, &outcome, dispatch_start.elapsed());
            let _ = fiber_deferred.send(outcome);
        });
    }

    async fn run_with_cancellation(effect: TaskEffect, cancellation: CancellationToken) -> TaskOutput {
        if cancellation.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        effect.await
    }

    fn complete_task(self: &Arc<Self>, priority: Priority, request_type: &str, outcome: &TaskOutput, elapsed: Duration) {
        if let Err(e) = outcome {
            warn!(?priority, request_type, error = %e, "task completed with error");
        }
        let idx = priority.index();
        let key: TypeKey = (priority, request_type.to_string());
        {
            let mut state = self.state.lock();
            state.active_by_priority[idx] = state.active_by_priority[idx].saturating_sub(1);
            SchedulerState::bump(&mut state.active_by_type, &key, -1);
            SchedulerState::bump(&mut state.completed_by_type, &key, 1);
            state.tasks_completed += 1;
        }
        self.emit_metrics_if_changed();
        if let Some(cb) = self.latency_callback.lock().as_ref() {
            cb(priority, elapsed);
        }
    }

    /// Drain a bounded batch of lower-priority work when a long streak of
    /// higher-priority dispatches has starved `{Normal, Low, Background}`
    /// (§4.5 step 5, §8 property 9 / scenario E4).
    async fn maybe_relieve_starvation(self: &Arc<Self>) {
        let streak = self.state.lock().streak;
        if streak <= self.config.max_high_priority_streak {
            return;
        }

        const LOWER: [Priority; 3] = [Priority::Background, Priority::Low, Priority::Normal];
        let lower_total: usize = {
            let state = self.state.lock();
            LOWER.iter().map(|p| state.queues[p.index()].len()).sum()
        };

        if lower_total == 0 {
            self.state.lock().streak = 0;
            return;
        }

        let by_ratio = ((lower_total as f64 * 0.1).ceil() as usize).min(10);
        let relief_batch = by_ratio.max(lower_total.min(5));
        debug!(relief_batch, lower_total, streak, "starvation relief triggered");

        let mut drained = 0usize;
        'outer: for &priority in &LOWER {
            while drained < relief_batch {
                let task = {
                    let mut state = self.state.lock();
                    let task = state.queues[priority.index()].pop_front();
                    if let Some(t) = &task {
                        let key: TypeKey = (priority, t.request_type.clone());
                        SchedulerState::bump(&mut state.queued_by_type, &key, -1);
                    }
                    task
                };
                let Some(task) = task else { break };
                self.dispatch(priority, task);
                drained += 1;
            }
            if drained >= relief_batch {
                break 'outer;
            }
        }

        self.state.lock().streak = 0;
    }

    async fn controller_loop(self: Arc<Self>) {
        loop {
            if self.is_shutting_down() {
                debug!("scheduler controller loop exiting on shutdown signal");
                return;
            }
            self.maybe_emit_summary();

            let scan_start = Instant::now();
            let mut executed = false;

            for &priority in &Priority::ALL {
                if scan_start.elapsed() >= Duration::from_millis(YIELD_BUDGET_MS) {
                    break;
                }
                if self.dispatch_one_if_eligible(priority) {
                    executed = true;
                    tokio::task::yield_now().await;
                    break;
                }
            }

            if !executed {
                self.state.lock().streak = 0;
                tokio::task::yield_now().await;
                tokio::time::sleep(Duration::from_millis(self.config.idle_sleep_ms)).await;
            }

            self.maybe_relieve_starvation().await;
        }
    }

    /// Snapshot metrics for public priorities (`Critical` excluded).
    pub fn metrics(&self) -> SchedulerMetrics {
        let state = self.state.lock();
        let mut per_priority = HashMap::new();

        for &priority in &Priority::PUBLIC {
            let idx = priority.index();
            let capacity = self.config.queue_capacity[idx];
            let queue_size = state.queues[idx].len();
            let mut breakdown: HashMap<String, RequestTypeBreakdown> = HashMap::new();

            for ((p, rt), &count) in &state.queued_by_type {
                if *p == priority {
                    breakdown.entry(rt.clone()).or_default().queued = count;
                }
            }
            for ((p, rt), &count) in &state.active_by_type {
                if *p == priority {
                    breakdown.entry(rt.clone()).or_default().active = count;
                }
            }
            for ((p, rt), &count) in &state.completed_by_type {
                if *p == priority {
                    breakdown.entry(rt.clone()).or_default().completed = count;
                }
            }

            let retries = state.enqueue_retries[idx];
            per_priority.insert(
                priority.as_str().to_string(),
                PriorityMetrics {
                    queue_size,
                    capacity,
                    utilization: if capacity > 0 { queue_size as f64 / capacity as f64 } else { 0.0 },
                    active_count: state.active_by_priority[idx],
                    request_type_breakdown: breakdown,
                    back_pressure: BackPressureStats {
                        events: state.back_pressure_events[idx],
                        avg_wait_ms: if retries > 0 {
                            state.back_pressure_wait_ms[idx] as f64 / retries as f64
                        } else {
                            0.0
                        },
                    },
                },
            );
        }

        SchedulerMetrics {
            per_priority,
            tasks_started: state.tasks_started,
            tasks_completed: state.tasks_completed,
            tasks_dropped: state.tasks_dropped,
        }
    }

    fn emit_metrics_if_changed(&self) {
        let curr = self.metrics();
        let mut last = self.last_metrics.lock();
        let changed = last.as_ref().is_none_or(|prev| prev.materially_differs(&curr));
        if changed {
            if let Some(cb) = self.metrics_callback.lock().as_ref() {
                let prev = last.clone().unwrap_or_default();
                cb(&prev, &curr);
            }
            *last = Some(curr);
        }
    }
}
