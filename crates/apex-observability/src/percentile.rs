//! Latency percentile sampling, grounded on the teacher's workspace-index
//! SLO tracker: a bounded sliding window of durations per operation,
//! summarised on demand as P50/P95/P99 via the nearest-rank method.

use apex_scheduler::Priority;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Request kinds this core samples latency for. Mirrors the priority
/// table in §6 rather than the teacher's Perl-specific operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `hover`/`completion`/`signatureHelp`.
    Immediate,
    /// `definition`/`typeDefinition`/`implementation`.
    Definition,
    /// `documentSymbol`/`foldingRange`/`codeLens`.
    DocumentSymbol,
    /// `references`/`workspaceSymbol`.
    References,
    /// `workspace/batch-load`/`validator/run-all`.
    BatchLoad,
}

impl Operation {
    /// Stable lowercase name used as a metrics/log key.
    pub const fn name(self) -> &'static str {
        match self {
            Operation::Immediate => "immediate",
            Operation::Definition => "definition",
            Operation::DocumentSymbol => "document_symbol",
            Operation::References => "references",
            Operation::BatchLoad => "batch_load",
        }
    }

    /// The operation a scheduler dispatch at this priority is sampled
    /// under. `Critical` has no request-facing counterpart, so it folds
    /// into `Immediate`, the next level down.
    pub const fn from_priority(priority: Priority) -> Self {
        match priority {
            Priority::Critical | Priority::Immediate => Operation::Immediate,
            Priority::High => Operation::Definition,
            Priority::Normal => Operation::DocumentSymbol,
            Priority::Low => Operation::References,
            Priority::Background => Operation::BatchLoad,
        }
    }
}

/// Nearest-rank percentile over a sorted slice, matching the teacher's
/// `percentile` helper in `workspace/slo.rs`.
fn percentile(sorted_values: &[u64], pct: u64) -> u64 {
    if sorted_values.is_empty() {
        return 0;
    }
    let rank = ((pct as f64 / 100.0) * sorted_values.len() as f64).ceil() as usize;
    sorted_values[rank.min(sorted_values.len()).saturating_sub(1)]
}

/// P50/P95/P99 summary for one operation's sample window.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileSummary {
    /// Median latency, in milliseconds.
    pub p50_ms: u64,
    /// 95th percentile latency, in milliseconds.
    pub p95_ms: u64,
    /// 99th percentile latency, in milliseconds.
    pub p99_ms: u64,
    /// Samples currently in the window.
    pub sample_count: usize,
}

struct Window {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    fn record(&mut self, millis: u64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(millis);
    }

    fn summary(&self) -> PercentileSummary {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        PercentileSummary {
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
            p99_ms: percentile(&sorted, 99),
            sample_count: sorted.len(),
        }
    }
}

/// A sliding-window latency tracker over every [`Operation`].
pub struct PercentileTracker {
    windows: Mutex<HashMap<Operation, Window>>,
    sample_window_size: usize,
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl PercentileTracker {
    /// Build a tracker keeping up to `sample_window_size` samples per
    /// operation.
    pub fn new(sample_window_size: usize) -> Self {
        Self { windows: Mutex::new(HashMap::new()), sample_window_size }
    }

    /// Start timing an operation; pass the result to [`Self::record`].
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Record a completed operation's elapsed time since `start`.
    pub fn record(&self, operation: Operation, start: Instant) {
        self.record_duration(operation, start.elapsed());
    }

    /// Record an already-measured duration directly.
    pub fn record_duration(&self, operation: Operation, duration: Duration) {
        let millis = duration.as_millis().min(u128::from(u64::MAX)) as u64;
        self.windows
            .lock()
            .entry(operation)
            .or_insert_with(|| Window::new(self.sample_window_size))
            .record(millis);
    }

    /// Current percentile summary for one operation; all zero if no
    /// samples have been recorded yet.
    pub fn summary(&self, operation: Operation) -> PercentileSummary {
        self.windows.lock().get(&operation).map(Window::summary).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_priority_folds_into_the_immediate_operation() {
        assert_eq!(Operation::from_priority(Priority::Critical), Operation::Immediate);
        assert_eq!(Operation::from_priority(Priority::Immediate), Operation::Immediate);
        assert_eq!(Operation::from_priority(Priority::Background), Operation::BatchLoad);
    }

    #[test]
    fn percentile_of_empty_window_is_zero() {
        let tracker = PercentileTracker::new(10);
        let summary = tracker.summary(Operation::Definition);
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.p95_ms, 0);
    }

    #[test]
    fn percentiles_track_recorded_durations() {
        let tracker = PercentileTracker::new(100);
        for ms in 1..=100u64 {
            tracker.record_duration(Operation::Immediate, Duration::from_millis(ms));
        }
        let summary = tracker.summary(Operation::Immediate);
        assert_eq!(summary.sample_count, 100);
        assert_eq!(summary.p50_ms, 50);
        assert_eq!(summary.p95_ms, 95);
        assert_eq!(summary.p99_ms, 99);
    }

    #[test]
    fn window_evicts_oldest_sample_past_capacity() {
        let tracker = PercentileTracker::new(3);
        for ms in [10, 20, 30, 40] {
            tracker.record_duration(Operation::References, Duration::from_millis(ms));
        }
        let summary = tracker.summary(Operation::References);
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.p50_ms, 30);
    }
}
