//! Global atomic counters for triage runs.
//!
//! Counters are incremented at the call site. Call [`Metrics::flush`] to
//! emit current values as a single `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    retries_triggered: AtomicU64,
    rebuilds_triggered: AtomicU64,
    bisections_started: AtomicU64,
    probes_run: AtomicU64,
    infra_breakages: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            retries_triggered: AtomicU64::new(0),
            rebuilds_triggered: AtomicU64::new(0),
            bisections_started: AtomicU64::new(0),
            probes_run: AtomicU64::new(0),
            infra_breakages: AtomicU64::new(0),
        }
    }

    /// One job retry requested from the build record source.
    pub fn inc_retries(&self) {
        self.retries_triggered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries_triggered", "counter incremented");
    }

    /// One rebuild at a last green commit.
    pub fn inc_rebuilds(&self) {
        self.rebuilds_triggered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rebuilds_triggered", "counter incremented");
    }

    /// One bisection handed to a bisector, however many tasks it covers.
    pub fn inc_bisections(&self) {
        self.bisections_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "bisections_started", "counter incremented");
    }

    pub fn inc_probes(&self) {
        self.probes_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "probes_run", "counter incremented");
    }

    pub fn inc_infra_breakages(&self) {
        self.infra_breakages.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "infra_breakages", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            retries_triggered = self.retries_triggered(),
            rebuilds_triggered = self.rebuilds_triggered(),
            bisections_started = self.bisections_started(),
            probes_run = self.probes_run(),
            infra_breakages = self.infra_breakages(),
        );
    }

    pub fn retries_triggered(&self) -> u64 {
        self.retries_triggered.load(Ordering::Relaxed)
    }

    pub fn rebuilds_triggered(&self) -> u64 {
        self.rebuilds_triggered.load(Ordering::Relaxed)
    }

    pub fn bisections_started(&self) -> u64 {
        self.bisections_started.load(Ordering::Relaxed)
    }

    pub fn probes_run(&self) -> u64 {
        self.probes_run.load(Ordering::Relaxed)
    }

    pub fn infra_breakages(&self) -> u64 {
        self.infra_breakages.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.retries_triggered.store(0, Ordering::Relaxed);
        self.rebuilds_triggered.store(0, Ordering::Relaxed);
        self.bisections_started.store(0, Ordering::Relaxed);
        self.probes_run.store(0, Ordering::Relaxed);
        self.infra_breakages.store(0, Ordering::Relaxed);
    }
}
