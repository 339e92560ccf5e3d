//! A thin adapter between LSP-style request handlers and [`apex_scheduler::Scheduler`]:
//! handlers are registered once by request type, then `submit_request` builds a
//! task, offers it at the handler's configured priority, and retries transient
//! failures with exponential backoff (§4.6 of the core specification).

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

use apex_scheduler::{CancellationToken, Priority, Scheduler, SchedulerError, TaskEffect, TaskOutput};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The cancellation token and any other ambient state a handler's `process`
/// closure receives alongside its params.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Wired so the handler can check for cancellation mid-computation.
    pub cancellation: CancellationToken,
}

/// A handler's effect: given the request params and a caller-supplied
/// context value (e.g. a handle onto the symbol graph), produce the task's
/// suspendable computation.
pub type ProcessFn<Ctx> = Arc<dyn Fn(serde_json::Value, Ctx, RequestContext) -> TaskEffect + Send + Sync>;

/// One registered handler: a request type bound to a priority, a default
/// timeout, a retry budget, and the computation itself.
pub struct HandlerSpec<Ctx> {
    /// The request type this handler answers, e.g. `"textDocument/hover"`.
    pub request_type: String,
    /// Scheduler priority this handler's tasks are offered at by default.
    pub priority: Priority,
    /// Per-task timeout, `None` for no deadline.
    pub timeout: Option<Duration>,
    /// Maximum retry attempts after the initial try.
    pub max_retries: u32,
    /// The handler's computation.
    pub process: ProcessFn<Ctx>,
}

// Hand-written rather than `#[derive(Clone)]`: the derive macro would add a
// spurious `Ctx: Clone` bound even though `Ctx` only ever appears behind the
// already-`Clone` `Arc<dyn Fn(..)>` in `process`.
impl<Ctx> Clone for HandlerSpec<Ctx> {
    fn clone(&self) -> Self {
        Self {
            request_type: self.request_type.clone(),
            priority: self.priority,
            timeout: self.timeout,
            max_retries: self.max_retries,
            process: Arc::clone(&self.process),
        }
    }
}

/// Errors raised while registering or submitting requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestQueueError {
    /// `submit_request` was called for a request type with no registered handler.
    #[error("no handler registered for request type {0:?}")]
    HandlerNotRegistered(String),
    /// The underlying scheduler reported a failure that exhausted retries.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the handler's configured priority for this one submission.
    pub priority: Option<Priority>,
    /// Overrides the handler's configured timeout for this one submission.
    pub timeout: Option<Duration>,
    /// Cancellation token to wire into the task; a fresh one is used if omitted.
    pub cancellation: Option<CancellationToken>,
}

/// Submission statistics (§4.6 "Statistics").
#[derive(Debug, Clone, Default)]
pub struct RequestQueueStats {
    /// Requests that completed successfully.
    pub total_processed: u64,
    /// Requests that failed after exhausting retries.
    pub total_failed: u64,
    /// Running mean processing time across all completed requests, in milliseconds.
    pub average_processing_time_ms: f64,
    /// Requests currently awaiting a result (including retries in flight).
    pub active_workers: u64,
    /// Current queue length for each priority, read from the scheduler.
    pub per_priority_queue_sizes: HashMap<String, usize>,
}

struct StatsInner {
    total_processed: u64,
    total_failed: u64,
    total_processing_time_ms: f64,
    active_workers: u64,
}

impl StatsInner {
    fn new() -> Self {
        Self { total_processed: 0, total_failed: 0, total_processing_time_ms: 0.0, active_workers: 0 }
    }
}

/// The 100/200/400 ms exponential backoff, capped at 2 s, used between retries.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let ms = 100u64.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(ms.min(2_000))
}

/// Registry of request handlers, backed by a single [`Scheduler`].
pub struct RequestQueue<Ctx> {
    scheduler: Arc<Scheduler>,
    handlers: RwLock<HashMap<String, HandlerSpec<Ctx>>>,
    stats: Mutex<StatsInner>,
}

impl<Ctx: Clone + Send + Sync + 'static> RequestQueue<Ctx> {
    /// Build a request queue over an existing scheduler.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler, handlers: RwLock::new(HashMap::new()), stats: Mutex::new(StatsInner::new()) }
    }

    /// Register (or replace) a handler for its request type.
    pub fn register(&self, handler: HandlerSpec<Ctx>) {
        self.handlers.write().insert(handler.request_type.clone(), handler);
    }

    /// Submit a request, awaiting its result. Transient failures (timeouts)
    /// are retried up to the handler's `max_retries` with exponential
    /// backoff; a cancelled task is returned immediately without retrying.
    pub async fn submit_request(
        &self,
        request_type: &str,
        params: serde_json::Value,
        ctx: Ctx,
        opts: SubmitOptions,
    ) -> Result<serde_json::Value, RequestQueueError> {
        let handler = self
            .handlers
            .read()
            .get(request_type)
            .cloned()
            .ok_or_else(|| RequestQueueError::HandlerNotRegistered(request_type.to_string()))?;

        let priority = opts.priority.unwrap_or(handler.priority);
        let timeout = opts.timeout.or(handler.timeout);
        let cancellation = opts.cancellation.unwrap_or_default();

        self.stats.lock().active_workers += 1;
        let started = Instant::now();
        let outcome = self.run_with_retries(&handler, params, ctx, priority, timeout, cancellation).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut stats = self.stats.lock();
        stats.active_workers = stats.active_workers.saturating_sub(1);
        match &outcome {
            Ok(_) => {
                stats.total_processed += 1;
                stats.total_processing_time_ms += elapsed_ms;
            }
            Err(_) => stats.total_failed += 1,
        }
        drop(stats);

        outcome
    }

    async fn run_with_retries(
        &self,
        handler: &HandlerSpec<Ctx>,
        params: serde_json::Value,
        ctx: Ctx,
        priority: Priority,
        timeout: Option<Duration>,
        cancellation: CancellationToken,
    ) -> Result<serde_json::Value, RequestQueueError> {
        let mut attempt = 0u32;
        loop {
            let effect = build_effect(handler.process.clone(), params.clone(), ctx.clone(), cancellation.clone());
            let handle = self
                .scheduler
                .offer(priority, handler.request_type.clone(), timeout, cancellation.clone(), effect)
                .await?;

            let result: TaskOutput = handle.join().await;
            match result {
                Ok(value) => return Ok(value),
                Err(SchedulerError::Cancelled) => return Err(RequestQueueError::Scheduler(SchedulerError::Cancelled)),
                Err(e @ SchedulerError::Timeout(_)) | Err(e @ SchedulerError::BoundedBufferFull(_)) => {
                    if attempt >= handler.max_retries {
                        warn!(request_type = %handler.request_type, attempt, error = %e, "retries exhausted");
                        return Err(RequestQueueError::Scheduler(e));
                    }
                    let delay = backoff_for_attempt(attempt);
                    debug!(request_type = %handler.request_type, attempt, ?delay, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(RequestQueueError::Scheduler(e)),
            }
        }
    }

    /// Current submission statistics.
    pub fn stats(&self) -> RequestQueueStats {
        let stats = self.stats.lock();
        let metrics = self.scheduler.metrics();
        let per_priority_queue_sizes =
            metrics.per_priority.iter().map(|(k, v)| (k.clone(), v.queue_size)).collect();

        RequestQueueStats {
            total_processed: stats.total_processed,
            total_failed: stats.total_failed,
            average_processing_time_ms: if stats.total_processed > 0 {
                stats.total_processing_time_ms / stats.total_processed as f64
            } else {
                0.0
            },
            active_workers: stats.active_workers,
            per_priority_queue_sizes,
        }
    }
}

fn build_effect<Ctx: Send + Sync + 'static>(
    process: ProcessFn<Ctx>,
    params: serde_json::Value,
    ctx: Ctx,
    cancellation: CancellationToken,
) -> TaskEffect {
    process(params, ctx, RequestContext { cancellation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_scheduler::SchedulerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handler_always_ok(request_type: &str, priority: Priority) -> HandlerSpec<()> {
        HandlerSpec {
            request_type: request_type.to_string(),
            priority,
            timeout: None,
            max_retries: 0,
            process: Arc::new(|params, _ctx, _rc| Box::pin(async move { Ok(params) })),
        }
    }

    #[tokio::test]
    async fn unregistered_request_type_is_rejected() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let queue: RequestQueue<()> = RequestQueue::new(scheduler);

        let result = queue.submit_request("textDocument/hover", serde_json::Value::Null, (), SubmitOptions::default()).await;
        assert!(matches!(result, Err(RequestQueueError::HandlerNotRegistered(_))));
    }

    #[tokio::test]
    async fn registered_handler_echoes_params_and_updates_stats() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let queue: RequestQueue<()> = RequestQueue::new(scheduler);
        queue.register(handler_always_ok("textDocument/hover", Priority::Immediate));

        let result = queue
            .submit_request("textDocument/hover", serde_json::json!({"line": 1}), (), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"line": 1}));
        assert_eq!(queue.stats().total_processed, 1);
        assert_eq!(queue.stats().active_workers, 0);
    }

    #[tokio::test]
    async fn timeout_is_retried_up_to_max_retries_then_fails() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let queue: RequestQueue<()> = RequestQueue::new(scheduler);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_closure = Arc::clone(&calls);
        let handler = HandlerSpec {
            request_type: "textDocument/references".to_string(),
            priority: Priority::Low,
            timeout: Some(Duration::from_millis(5)),
            max_retries: 2,
            process: Arc::new(move |_params, _ctx, _rc| {
                calls_in_closure.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(serde_json::Value::Null)
                })
            }),
        };
        queue.register(handler);

        let result = queue
            .submit_request("textDocument/references", serde_json::Value::Null, (), SubmitOptions::default())
            .await;
        assert!(matches!(result, Err(RequestQueueError::Scheduler(SchedulerError::Timeout(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.stats().total_failed, 1);
    }

    #[tokio::test]
    async fn cancelled_submission_is_not_retried() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let queue: RequestQueue<()> = RequestQueue::new(scheduler);
        queue.register(handler_always_ok("textDocument/hover", Priority::Immediate));

        let token = CancellationToken::new();
        token.cancel();
        let opts = SubmitOptions { cancellation: Some(token), ..Default::default() };

        let result = queue.submit_request("textDocument/hover", serde_json::Value::Null, (), opts).await;
        assert!(matches!(result, Err(RequestQueueError::Scheduler(SchedulerError::Cancelled))));
    }
}
