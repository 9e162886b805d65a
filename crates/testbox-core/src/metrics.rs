//! Metrics sink for lifecycle events.
//!
//! Lifecycle code reports through the [`Metrics`] trait. [`MetricsRegistry`]
//! is the in-process implementation: named meters and timers backed by
//! atomics, readable without locking once obtained.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Meter marked when a container never reaches the running state.
pub const BOOT_TIMEOUT: &str = "vm.provider.boot.timeout";
/// Meter marked when creating or starting a container fails.
pub const BOOT_ERROR: &str = "vm.provider.boot.error";
/// Timer updated with the duration of every start-and-wait phase.
pub const BOOT_TIMER: &str = "vm.provider.boot";
/// Meter marked when removal gave up because the backend was unreachable.
pub const REMOVE_UNREACHABLE: &str = "vm.provider.remove.unreachable";

/// Receiver of counter and timer events.
pub trait Metrics: Send + Sync {
    /// Count one occurrence of `name`.
    fn mark(&self, name: &str);

    /// Record one duration sample for `name`.
    fn update(&self, name: &str, elapsed: Duration);
}

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Meter {
    count: AtomicU64,
}

impl Meter {
    /// Count one event.
    pub fn mark(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of events counted.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Duration samples: count, total and maximum.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Timer {
    /// Record one sample.
    pub fn update(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Get the number of samples.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the mean sample, or zero without samples.
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / count)
    }

    /// Get the largest sample.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }
}

/// Point-in-time copy of every metric, for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Meter name -> count
    pub meters: BTreeMap<String, u64>,
    /// Timer name -> summary
    pub timers: BTreeMap<String, TimerSnapshot>,
}

/// Summary of one timer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimerSnapshot {
    /// Number of samples
    pub count: u64,
    /// Mean sample in milliseconds
    pub mean_ms: u64,
    /// Largest sample in milliseconds
    pub max_ms: u64,
}

/// Registry of named meters and timers.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    meters: Mutex<HashMap<String, Arc<Meter>>>,
    timers: Mutex<HashMap<String, Arc<Timer>>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the meter called `name`.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        let mut meters = self.meters.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(meters.entry(name.to_string()).or_default())
    }

    /// Get (or create) the timer called `name`.
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(timers.entry(name.to_string()).or_default())
    }

    /// Copy the current value of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let meters = self
            .meters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, meter)| (name.clone(), meter.count()))
            .collect();

        let timers = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, timer)| {
                let summary = TimerSnapshot {
                    count: timer.count(),
                    mean_ms: timer.mean().as_millis() as u64,
                    max_ms: timer.max().as_millis() as u64,
                };
                (name.clone(), summary)
            })
            .collect();

        MetricsSnapshot { meters, timers }
    }
}

impl Metrics for MetricsRegistry {
    fn mark(&self, name: &str) {
        tracing::trace!(metric = name, "Meter marked");
        self.meter(name).mark();
    }

    fn update(&self, name: &str, elapsed: Duration) {
        tracing::trace!(metric = name, elapsed_ms = elapsed.as_millis() as u64, "Timer updated");
        self.timer(name).update(elapsed);
    }
}
