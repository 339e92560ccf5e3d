//! Change-driven metrics logging and periodic summary sampling for
//! [`apex_scheduler::Scheduler`] (§4.9 of the core specification).
//!
//! The scheduler already computes whether two snapshots "materially
//! differ" ([`apex_scheduler::SchedulerMetrics::materially_differs`]);
//! this crate is the thin client-facing layer on top: a structured-log
//! subscriber wired through `set_metrics_callback`, and an optional
//! background poller modeled on the teacher's `SloTracker` sampling
//! loop (`crates/perl-workspace-index/src/workspace/slo.rs`), adapted
//! from explicit per-call timing to periodic snapshot polling since the
//! scheduler already tracks its own counters.
//!
//! [`install_percentile_tracking`] closes the loop on the other half of
//! that `SloTracker` lineage: it feeds a [`PercentileTracker`] from the
//! scheduler's real dispatch completions and hands the scheduler a
//! summary provider so its 30s structured line carries per-priority
//! P50/P95/P99, not just queue and count totals.

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod percentile;

pub use percentile::{Operation, PercentileSummary, PercentileTracker};

use apex_scheduler::{LatencyPercentiles, Priority, Scheduler, SchedulerMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Install a metrics-changed subscriber that logs a structured summary
/// line on every material change (§4.9's "client-facing notification
/// hook", realised here as a `tracing::info!` emission rather than an
/// LSP notification, which is the wire layer's job and out of scope).
pub fn install_logging_callback(scheduler: &Arc<Scheduler>) {
    scheduler.set_metrics_callback(|_prev, curr| {
        log_metrics_summary(curr);
    });
}

/// Wire a [`PercentileTracker`] into `scheduler`'s real dispatch path:
/// every completed task feeds the tracker under the [`Operation`] its
/// priority maps to, and the scheduler's 30s structured summary line
/// pulls P50/P95/P99 per priority from it (§4.9's supplement).
pub fn install_percentile_tracking(scheduler: &Arc<Scheduler>, tracker: &Arc<PercentileTracker>) {
    let recording_tracker = Arc::clone(tracker);
    scheduler.set_latency_callback(move |priority, elapsed| {
        recording_tracker.record_duration(Operation::from_priority(priority), elapsed);
    });

    let summary_tracker = Arc::clone(tracker);
    scheduler.set_latency_summary_provider(move || {
        Priority::PUBLIC
            .iter()
            .map(|&priority| {
                let summary = summary_tracker.summary(Operation::from_priority(priority));
                (
                    priority,
                    LatencyPercentiles {
                        p50_ms: summary.p50_ms,
                        p95_ms: summary.p95_ms,
                        p99_ms: summary.p99_ms,
                        sample_count: summary.sample_count,
                    },
                )
            })
            .collect()
    });
}

fn log_metrics_summary(metrics: &SchedulerMetrics) {
    for (priority, snapshot) in &metrics.per_priority {
        info!(
            priority,
            queue_size = snapshot.queue_size,
            capacity = snapshot.capacity,
            utilization = snapshot.utilization,
            active_count = snapshot.active_count,
            back_pressure_events = snapshot.back_pressure.events,
            "scheduler metrics changed"
        );
    }
    info!(
        tasks_started = metrics.tasks_started,
        tasks_completed = metrics.tasks_completed,
        tasks_dropped = metrics.tasks_dropped,
        "scheduler totals"
    );
}

/// Periodic sampler: every `interval`, reads `scheduler.metrics()` and
/// invokes the scheduler's own change-driven callback path by re-running
/// its comparison against the last sample this poller observed (§4.9
/// "Optional periodic notifier ... samples metrics() every intervalMs
/// and invokes the callback on change"). This exists alongside the
/// scheduler's own inline change detection because that one only fires
/// on offer/dispatch/completion — a client that wants a heartbeat even
/// during total idleness (confirming liveness, not just change) wants
/// this poller instead.
pub struct PeriodicNotifier {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    callback: Box<dyn Fn(&SchedulerMetrics, &SchedulerMetrics) + Send + Sync>,
}

impl PeriodicNotifier {
    /// Build a notifier that samples `scheduler` every `interval` and
    /// calls `callback` whenever the sampled snapshot materially
    /// differs from the previous one.
    pub fn new<F>(scheduler: Arc<Scheduler>, interval: Duration, callback: F) -> Self
    where
        F: Fn(&SchedulerMetrics, &SchedulerMetrics) + Send + Sync + 'static,
    {
        Self { scheduler, interval, callback: Box::new(callback) }
    }

    /// Spawn the polling loop at `Background` priority semantics: it
    /// runs for the life of the process (or until the scheduler shuts
    /// down), never competing with the scheduler's own dispatch loop
    /// for anything but a periodic snapshot read.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut last: Option<SchedulerMetrics> = None;
            loop {
                tokio::time::sleep(self.interval).await;
                if self.scheduler.is_shutting_down() {
                    return;
                }
                let curr = self.scheduler.metrics();
                let changed = last.as_ref().is_none_or(|prev| prev.materially_differs(&curr));
                if changed {
                    let prev = last.clone().unwrap_or_default();
                    (self.callback)(&prev, &curr);
                }
                last = Some(curr);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_scheduler::{CancellationToken, SchedulerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn periodic_notifier_fires_once_for_one_state_change() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();

        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_in_closure = Arc::clone(&call_count);
        let notifier = PeriodicNotifier::new(Arc::clone(&scheduler), Duration::from_millis(10), move |_, _| {
            call_count_in_closure.fetch_add(1, Ordering::SeqCst);
        });
        notifier.spawn();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        scheduler
            .offer(
                Priority::Background,
                "workspace/batch-load",
                None,
                CancellationToken::new(),
                Box::pin(async { Ok(serde_json::Value::Null) }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(call_count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn logging_callback_installs_without_panicking() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        install_logging_callback(&scheduler);
    }

    #[tokio::test]
    async fn percentile_tracking_records_real_dispatch_latency() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let tracker = Arc::new(PercentileTracker::new(100));
        install_percentile_tracking(&scheduler, &tracker);
        scheduler.spawn_controller();

        let handle = scheduler
            .offer(Priority::Normal, "documentSymbol", None, CancellationToken::new(), {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(serde_json::Value::Null)
                })
            })
            .await
            .unwrap();
        handle.join().await.unwrap();

        let summary = tracker.summary(Operation::from_priority(Priority::Normal));
        assert_eq!(summary.sample_count, 1);
        assert!(summary.p50_ms >= 5);
    }
}
