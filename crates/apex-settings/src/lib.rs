//! Typed settings snapshot for the Apex core, and the glue that applies
//! `didChangeConfiguration`-style payloads to a live [`Scheduler`]
//! (§4.8 of the core specification).
//!
//! Settings arrive as partial, loosely-typed JSON the way the teacher's
//! `ServerConfig::update_from_value` consumes LSP configuration: rather
//! than a full `Deserialize` that would reject an unrecognised or
//! partial payload, [`ApexSettings::apply_json`] walks the value field
//! by field and only overwrites what is present.

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

use apex_scheduler::{Priority, Scheduler, SchedulerConfig};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// `apex.environment.runtimePlatform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// VS Code desktop and other Node-hosted clients.
    #[default]
    Desktop,
    /// Browser/webworker clients; a stricter capability set applies.
    Web,
}

/// `apex.logLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// The default operating level.
    #[default]
    Info,
    /// Verbose, development-time logging.
    Debug,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// `apex.queueProcessing.*`. Concurrency caps cover only the four
/// client-visible priorities named in §6's configuration table —
/// `Critical` is internal and `Background` is deliberately unbounded by
/// settings (it only ever yields to starvation relief).
#[derive(Debug, Clone)]
pub struct QueueProcessingSettings {
    /// `maxConcurrency.IMMEDIATE`; `None` means `Infinity`.
    pub max_concurrency_immediate: Option<usize>,
    /// `maxConcurrency.HIGH`.
    pub max_concurrency_high: Option<usize>,
    /// `maxConcurrency.NORMAL`.
    pub max_concurrency_normal: Option<usize>,
    /// `maxConcurrency.LOW`.
    pub max_concurrency_low: Option<usize>,
    /// `yieldInterval`, in milliseconds (how often the controller checks
    /// its scan budget).
    pub yield_interval_ms: u64,
    /// `yieldDelayMs`, the idle-scan sleep duration.
    pub yield_delay_ms: u64,
}

impl Default for QueueProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrency_immediate: None,
            max_concurrency_high: None,
            max_concurrency_normal: None,
            max_concurrency_low: None,
            yield_interval_ms: 5,
            yield_delay_ms: 1,
        }
    }
}

/// `apex.scheduler.*`.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Per-priority bounded buffer size, indexed by [`Priority::index`].
    pub queue_capacity: [usize; 6],
    /// `maxHighPriorityStreak`.
    pub max_high_priority_streak: u32,
    /// `idleSleepMs`.
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { queue_capacity: [200; 6], max_high_priority_streak: 50, idle_sleep_ms: 1 }
    }
}

/// `apex.findMissingArtifact.*` (§4.9's experimental protocol extension).
#[derive(Debug, Clone)]
pub struct FindMissingArtifactSettings {
    /// Whether the `find-missing-artifact` request is serviced at all.
    pub enabled: bool,
    /// Upper bound on documents opened in response to one request.
    pub max_candidates_to_open: usize,
    /// Client-supplied timeout hint, forwarded but not enforced here.
    pub timeout_ms_hint: u64,
}

impl Default for FindMissingArtifactSettings {
    fn default() -> Self {
        Self { enabled: true, max_candidates_to_open: 5, timeout_ms_hint: 5_000 }
    }
}

/// Full typed settings snapshot, built from `apex.*` configuration keys.
#[derive(Debug, Clone, Default)]
pub struct ApexSettings {
    /// `apex.queueProcessing.*`.
    pub queue_processing: QueueProcessingSettings,
    /// `apex.scheduler.*`.
    pub scheduler: SchedulerSettings,
    /// `apex.findMissingArtifact.*`.
    pub find_missing_artifact: FindMissingArtifactSettings,
    /// `apex.logLevel`.
    pub log_level: LogLevel,
    /// `apex.environment.runtimePlatform`.
    pub runtime_platform: Platform,
}

impl ApexSettings {
    /// Build the initial [`SchedulerConfig`] implied by this snapshot.
    /// Used at startup; live changes afterwards go through
    /// [`SettingsHandle::apply_change`] instead of rebuilding the
    /// scheduler.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        let mut max_concurrency = [None; 6];
        max_concurrency[Priority::Immediate.index()] = self.queue_processing.max_concurrency_immediate;
        max_concurrency[Priority::High.index()] = self.queue_processing.max_concurrency_high;
        max_concurrency[Priority::Normal.index()] = self.queue_processing.max_concurrency_normal;
        max_concurrency[Priority::Low.index()] = self.queue_processing.max_concurrency_low;

        SchedulerConfig {
            queue_capacity: self.scheduler.queue_capacity,
            max_concurrency,
            max_total_concurrency: None,
            max_high_priority_streak: self.scheduler.max_high_priority_streak,
            idle_sleep_ms: self.scheduler.idle_sleep_ms,
        }
    }

    /// Apply a partial `didChangeConfiguration`-shaped payload, field by
    /// field, leaving anything not present untouched. Mirrors the
    /// teacher's `ServerConfig::update_from_value`.
    pub fn apply_json(&mut self, settings: &serde_json::Value) {
        let Some(apex) = settings.get("apex") else { return };

        if let Some(qp) = apex.get("queueProcessing") {
            if let Some(mc) = qp.get("maxConcurrency") {
                Self::apply_optional_u64(mc, "IMMEDIATE", &mut self.queue_processing.max_concurrency_immediate);
                Self::apply_optional_u64(mc, "HIGH", &mut self.queue_processing.max_concurrency_high);
                Self::apply_optional_u64(mc, "NORMAL", &mut self.queue_processing.max_concurrency_normal);
                Self::apply_optional_u64(mc, "LOW", &mut self.queue_processing.max_concurrency_low);
            }
            if let Some(v) = qp.get("yieldInterval").and_then(serde_json::Value::as_u64) {
                self.queue_processing.yield_interval_ms = v;
            }
            if let Some(v) = qp.get("yieldDelayMs").and_then(serde_json::Value::as_u64) {
                self.queue_processing.yield_delay_ms = v;
            }
        }

        if let Some(sch) = apex.get("scheduler") {
            if let Some(qc) = sch.get("queueCapacity") {
                for &priority in &Priority::ALL {
                    let key = priority.as_str().to_uppercase();
                    if let Some(v) = qc.get(&key).and_then(serde_json::Value::as_u64) {
                        self.scheduler.queue_capacity[priority.index()] = v as usize;
                    }
                }
            }
            if let Some(v) = sch.get("maxHighPriorityStreak").and_then(serde_json::Value::as_u64) {
                self.scheduler.max_high_priority_streak = v as u32;
            }
            if let Some(v) = sch.get("idleSleepMs").and_then(serde_json::Value::as_u64) {
                self.scheduler.idle_sleep_ms = v;
            }
        }

        if let Some(fma) = apex.get("findMissingArtifact") {
            if let Some(v) = fma.get("enabled").and_then(serde_json::Value::as_bool) {
                self.find_missing_artifact.enabled = v;
            }
            if let Some(v) = fma.get("maxCandidatesToOpen").and_then(serde_json::Value::as_u64) {
                self.find_missing_artifact.max_candidates_to_open = v as usize;
            }
            if let Some(v) = fma.get("timeoutMsHint").and_then(serde_json::Value::as_u64) {
                self.find_missing_artifact.timeout_ms_hint = v;
            }
        }

        if let Some(level) = apex.get("logLevel").and_then(serde_json::Value::as_str) {
            if let Some(parsed) = LogLevel::parse(level) {
                self.log_level = parsed;
            }
        }

        if let Some(env) = apex.get("environment") {
            if let Some(platform) = env.get("runtimePlatform").and_then(serde_json::Value::as_str) {
                self.runtime_platform = match platform {
                    "web" => Platform::Web,
                    _ => Platform::Desktop,
                };
            }
        }
    }

    /// A `maxConcurrency.*` entry is either a JSON integer or the string
    /// `"Infinity"`; either parses, an integer clears to `Some`, and the
    /// literal `Infinity` clears to `None` (unbounded).
    fn apply_optional_u64(parent: &serde_json::Value, key: &str, target: &mut Option<usize>) {
        let Some(value) = parent.get(key) else { return };
        if let Some(n) = value.as_u64() {
            *target = Some(n as usize);
        } else if value.as_str() == Some("Infinity") {
            *target = None;
        }
    }

    /// Apply this snapshot's scheduler-relevant fields to a live
    /// [`Scheduler`] (§4.8: settings changes reach the scheduler through
    /// its live concurrency override rather than reconstruction).
    pub fn apply_to_scheduler(&self, scheduler: &Scheduler) {
        scheduler.update_max_concurrency(Priority::Immediate, self.queue_processing.max_concurrency_immediate);
        scheduler.update_max_concurrency(Priority::High, self.queue_processing.max_concurrency_high);
        scheduler.update_max_concurrency(Priority::Normal, self.queue_processing.max_concurrency_normal);
        scheduler.update_max_concurrency(Priority::Low, self.queue_processing.max_concurrency_low);
    }
}

/// Capability paths (dot-joined) hidden from `web` clients.
const WEB_DISABLED_PATHS: &[&str] =
    &["experimental.profilingProvider", "experimental.nativeFileWatcher", "testRunner.localDebugger"];

/// Capability paths hidden from `desktop` clients.
const DESKTOP_DISABLED_PATHS: &[&str] = &["experimental.webWorkerTransport"];

fn disabled_paths_for(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Web => WEB_DISABLED_PATHS,
        Platform::Desktop => DESKTOP_DISABLED_PATHS,
    }
}

/// Recursively strip capability paths disabled for `platform` from a
/// capabilities object, e.g. `experimental.profilingProvider` removes
/// the `profilingProvider` key nested under `experimental` (§4.8
/// "Filtering is recursive over nested records; disabled paths become
/// undefined").
pub fn filter_capabilities_for_platform(value: &serde_json::Value, platform: Platform) -> serde_json::Value {
    let mut filtered = value.clone();
    for path in disabled_paths_for(platform) {
        remove_path(&mut filtered, path);
    }
    filtered
}

fn remove_path(value: &mut serde_json::Value, path: &str) {
    let mut segments = path.splitn(2, '.');
    let Some(head) = segments.next() else { return };
    let rest = segments.next();
    let serde_json::Value::Object(map) = value else { return };

    match rest {
        None => {
            map.remove(head);
        }
        Some(rest) => {
            if let Some(child) = map.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

/// Shared, subscribable settings state (§4.8 "Settings change
/// notifications are delivered on a bus"). Construct with
/// [`SettingsHandle::new`] and thread the `Arc` through request handlers
/// that need to read the current snapshot.
pub struct SettingsHandle {
    current: RwLock<ApexSettings>,
    scheduler: Option<Arc<Scheduler>>,
    subscribers: Mutex<Vec<Box<dyn Fn(&ApexSettings, &ApexSettings) + Send + Sync>>>,
}

impl SettingsHandle {
    /// Build a handle with no attached scheduler; `apply_change` only
    /// notifies subscribers.
    pub fn new(initial: ApexSettings) -> Arc<Self> {
        Arc::new(Self { current: RwLock::new(initial), scheduler: None, subscribers: Mutex::new(Vec::new()) })
    }

    /// Build a handle that also pushes live concurrency changes straight
    /// to `scheduler` on every `apply_change` (§4.8's Scheduler
    /// subscriber).
    pub fn with_scheduler(initial: ApexSettings, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Self { current: RwLock::new(initial), scheduler: Some(scheduler), subscribers: Mutex::new(Vec::new()) })
    }

    /// The current settings snapshot.
    pub fn snapshot(&self) -> ApexSettings {
        self.current.read().clone()
    }

    /// Register a callback invoked with `(old, new)` on every accepted
    /// change.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&ApexSettings, &ApexSettings) + Send + Sync + 'static,
    {
        self.subscribers.lock().push(Box::new(callback));
    }

    /// Apply a partial configuration payload: merge it into the current
    /// snapshot, push scheduler-relevant fields to the attached
    /// scheduler if any, then notify subscribers.
    pub fn apply_change(&self, patch: &serde_json::Value) {
        let mut updated = self.snapshot();
        updated.apply_json(patch);

        let old = std::mem::replace(&mut *self.current.write(), updated.clone());

        if let Some(scheduler) = &self.scheduler {
            updated.apply_to_scheduler(scheduler);
        }

        debug!("settings updated from configuration change");
        for subscriber in self.subscribers.lock().iter() {
            subscriber(&old, &updated);
        }
        info!(?updated.log_level, ?updated.runtime_platform, "settings change applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_scheduler::SchedulerConfig;

    #[test]
    fn apply_json_overwrites_only_present_fields() {
        let mut settings = ApexSettings::default();
        settings.apply_json(&serde_json::json!({
            "apex": {
                "queueProcessing": { "maxConcurrency": { "NORMAL": 4 } },
                "logLevel": "debug",
            }
        }));

        assert_eq!(settings.queue_processing.max_concurrency_normal, Some(4));
        assert_eq!(settings.queue_processing.max_concurrency_immediate, None);
        assert_eq!(settings.log_level, LogLevel::Debug);
    }

    #[test]
    fn infinity_sentinel_clears_a_concurrency_cap() {
        let mut settings = ApexSettings::default();
        settings.queue_processing.max_concurrency_high = Some(2);
        settings.apply_json(&serde_json::json!({
            "apex": { "queueProcessing": { "maxConcurrency": { "HIGH": "Infinity" } } }
        }));
        assert_eq!(settings.queue_processing.max_concurrency_high, None);
    }

    #[test]
    fn to_scheduler_config_places_caps_at_the_right_priority_index() {
        let mut settings = ApexSettings::default();
        settings.queue_processing.max_concurrency_low = Some(3);
        let config = settings.to_scheduler_config();
        assert_eq!(config.max_concurrency[Priority::Low.index()], Some(3));
        assert_eq!(config.max_concurrency[Priority::Background.index()], None);
    }

    #[test]
    fn web_platform_strips_profiling_capability() {
        let caps = serde_json::json!({
            "experimental": { "profilingProvider": true, "other": 1 },
            "testRunner": { "localDebugger": true },
        });
        let filtered = filter_capabilities_for_platform(&caps, Platform::Web);
        assert!(filtered["experimental"].get("profilingProvider").is_none());
        assert_eq!(filtered["experimental"]["other"], 1);
        assert!(filtered["testRunner"].get("localDebugger").is_none());
    }

    #[test]
    fn desktop_platform_keeps_profiling_but_strips_web_worker_transport() {
        let caps = serde_json::json!({
            "experimental": { "profilingProvider": true, "webWorkerTransport": true },
        });
        let filtered = filter_capabilities_for_platform(&caps, Platform::Desktop);
        assert_eq!(filtered["experimental"]["profilingProvider"], true);
        assert!(filtered["experimental"].get("webWorkerTransport").is_none());
    }

    #[tokio::test]
    async fn apply_change_pushes_concurrency_to_a_live_scheduler() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let handle = SettingsHandle::with_scheduler(ApexSettings::default(), Arc::clone(&scheduler));

        handle.apply_change(&serde_json::json!({
            "apex": { "queueProcessing": { "maxConcurrency": { "NORMAL": 1 } } }
        }));

        let blocking = || -> apex_scheduler::TaskEffect {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(serde_json::Value::Null)
            })
        };

        let _h1 = scheduler
            .offer(Priority::Normal, "documentSymbol", None, apex_scheduler::CancellationToken::new(), blocking())
            .await
            .unwrap();
        let _h2 = scheduler
            .offer(Priority::Normal, "documentSymbol", None, apex_scheduler::CancellationToken::new(), blocking())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(scheduler.metrics().per_priority["normal"].active_count, 1);
    }

    #[test]
    fn on_change_subscriber_observes_old_and_new() {
        let handle = SettingsHandle::new(ApexSettings::default());
        let seen = Arc::new(Mutex::new(None));
        let seen_in_closure = Arc::clone(&seen);
        handle.on_change(move |_old, new| {
            *seen_in_closure.lock() = Some(new.log_level);
        });

        handle.apply_change(&serde_json::json!({ "apex": { "logLevel": "warn" } }));
        assert_eq!(*seen.lock(), Some(LogLevel::Warn));
    }
}
