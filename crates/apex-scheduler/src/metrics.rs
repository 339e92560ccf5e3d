//! Snapshot types returned by [`crate::Scheduler::metrics`], and the
//! change detection used to drive the observability callback (§4.9
//! "emit only when metrics materially differ from the last snapshot").

use serde::Serialize;
use std::collections::HashMap;

/// Queued/active/completed counts for one request type within a
/// priority level.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct RequestTypeBreakdown {
    /// Tasks of this type currently queued.
    pub queued: usize,
    /// Tasks of this type currently running.
    pub active: usize,
    /// Tasks of this type that have finished (success or failure).
    pub completed: usize,
}

/// Back-pressure counters for one priority level.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct BackPressureStats {
    /// Number of times an `offer` found the bounded buffer full.
    pub events: u64,
    /// Mean time spent retrying, in milliseconds, across all retried offers.
    pub avg_wait_ms: f64,
}

/// A snapshot of one priority level's queue and activity state.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PriorityMetrics {
    /// Current queue length.
    pub queue_size: usize,
    /// Configured bounded buffer capacity.
    pub capacity: usize,
    /// `queue_size / capacity`, `0.0` when capacity is `0`.
    pub utilization: f64,
    /// Tasks of this priority currently running.
    pub active_count: usize,
    /// Per request-type counts, keyed by request type name.
    pub request_type_breakdown: HashMap<String, RequestTypeBreakdown>,
    /// Back-pressure counters for this priority.
    pub back_pressure: BackPressureStats,
}

/// One priority's latency percentile summary, supplied by an externally
/// installed tracker via [`crate::Scheduler::set_latency_summary_provider`]
/// and folded into the 30s structured summary line (§4.9).
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct LatencyPercentiles {
    /// Median dispatch latency, in milliseconds.
    pub p50_ms: u64,
    /// 95th percentile dispatch latency, in milliseconds.
    pub p95_ms: u64,
    /// 99th percentile dispatch latency, in milliseconds.
    pub p99_ms: u64,
    /// Samples the percentiles above were computed from.
    pub sample_count: usize,
}

/// A full scheduler metrics snapshot, covering [`crate::Priority::PUBLIC`]
/// levels only.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SchedulerMetrics {
    /// Per-priority metrics, keyed by [`crate::Priority::as_str`].
    pub per_priority: HashMap<String, PriorityMetrics>,
    /// Total tasks dispatched since the scheduler was created or reset.
    pub tasks_started: u64,
    /// Total tasks that have finished running (success or failure).
    pub tasks_completed: u64,
    /// Total tasks dropped without running (reserved for future use).
    pub tasks_dropped: u64,
}

impl SchedulerMetrics {
    /// Whether `self` (the previous snapshot) differs from `other` in any
    /// way worth notifying a subscriber about: any task counter changed,
    /// or any priority's queue size or active count changed.
    pub fn materially_differs(&self, other: &Self) -> bool {
        if self.tasks_started != other.tasks_started
            || self.tasks_completed != other.tasks_completed
            || self.tasks_dropped != other.tasks_dropped
        {
            return true;
        }

        for (key, curr) in &other.per_priority {
            match self.per_priority.get(key) {
                None => return true,
                Some(prev) if prev.queue_size != curr.queue_size || prev.active_count != curr.active_count => {
                    return true;
                }
                _ => {}
            }
        }

        false
    }
}
