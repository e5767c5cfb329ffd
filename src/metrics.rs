// src/metrics.rs
//
// Engine metrics: operation counts, latencies, segment and discard state.
// Every engine owns its own instance, so tests opening several engines in one
// process never see each other's numbers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Main metrics container
#[derive(Debug)]
pub struct Metrics {
    // === Operation Counters ===
    // Writes
    pub writes_total: Counter,
    pub writes_bytes: Counter,

    // Reads
    pub reads_total: Counter,
    pub reads_hits: Counter,
    pub reads_misses: Counter,
    pub disk_reads: Counter,

    // Segments
    pub rotations_total: Counter,
    pub segment_syncs: Counter,

    // Compactions
    pub compactions_total: Counter,
    pub segments_reclaimed: Counter,
    pub compaction_bytes_reclaimed: Counter,
    pub compaction_entries_rewritten: Counter,
    pub compaction_duration: Histogram,

    // Discard tracking
    pub discard_updates: Counter,
    pub discard_dropped: Counter,

    // === Performance Metrics ===
    pub disk_read_latency: Histogram,

    // === System State ===
    pub active_segments: Gauge,
    pub archived_segments: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            writes_total: Counter::new(),
            writes_bytes: Counter::new(),
            reads_total: Counter::new(),
            reads_hits: Counter::new(),
            reads_misses: Counter::new(),
            disk_reads: Counter::new(),

            rotations_total: Counter::new(),
            segment_syncs: Counter::new(),

            compactions_total: Counter::new(),
            segments_reclaimed: Counter::new(),
            compaction_bytes_reclaimed: Counter::new(),
            compaction_entries_rewritten: Counter::new(),
            compaction_duration: Histogram::new(),

            discard_updates: Counter::new(),
            discard_dropped: Counter::new(),

            disk_read_latency: Histogram::new(),

            active_segments: Gauge::new(),
            archived_segments: Gauge::new(),
        }
    }

    // === Computed Metrics ===

    /// Read hit rate (0.0 to 1.0)
    pub fn read_hit_rate(&self) -> f64 {
        let hits = self.reads_hits.get();
        let total = self.reads_total.get();
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Share of discard updates lost to a full queue (0.0 to 1.0)
    pub fn discard_drop_rate(&self) -> f64 {
        let dropped = self.discard_dropped.get();
        let total = dropped + self.discard_updates.get();
        if total == 0 {
            return 0.0;
        }
        dropped as f64 / total as f64
    }

    /// Format metrics for display
    pub fn summary(&self) -> String {
        format!(
            r#"Storage Engine Metrics
======================

Operations:
  Writes:      {:>12}  ({} MB)
  Reads:       {:>12}  (hits: {}, misses: {})
  Disk Reads:  {:>12}
  Rotations:   {:>12}
  Syncs:       {:>12}

Read Performance:
  Hit Rate:    {:>11.2}%
  Disk p50:    {:>9.1} μs
  Disk p99:    {:>9.1} μs

Discard Tracking:
  Updates:     {:>12}
  Dropped:     {:>12}  ({:.2}%)

Compaction:
  Runs:        {:>12}
  Reclaimed:   {:>12}  segments ({} MB)
  Rewritten:   {:>12}  entries
  Duration p50:{:>9.1} ms

Segments:
  Active:      {:>12}
  Archived:    {:>12}
"#,
            self.writes_total.get(),
            self.writes_bytes.get() / 1_048_576,
            self.reads_total.get(),
            self.reads_hits.get(),
            self.reads_misses.get(),
            self.disk_reads.get(),
            self.rotations_total.get(),
            self.segment_syncs.get(),
            self.read_hit_rate() * 100.0,
            self.disk_read_latency.percentile(0.5).as_micros() as f64,
            self.disk_read_latency.percentile(0.99).as_micros() as f64,
            self.discard_updates.get(),
            self.discard_dropped.get(),
            self.discard_drop_rate() * 100.0,
            self.compactions_total.get(),
            self.segments_reclaimed.get(),
            self.compaction_bytes_reclaimed.get() / 1_048_576,
            self.compaction_entries_rewritten.get(),
            self.compaction_duration.percentile(0.5).as_millis() as f64,
            self.active_segments.get(),
            self.archived_segments.get(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomic counter (lock-free)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current state
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    samples: RwLock<Vec<Duration>>,
    max_samples: usize,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            samples: RwLock::new(Vec::with_capacity(max_samples.min(1024))),
            max_samples,
        }
    }

    /// Record a latency sample
    pub fn observe(&self, duration: Duration) {
        let mut samples = self.samples.write();

        // Reservoir sampling to bound memory
        if samples.len() < self.max_samples {
            samples.push(duration);
        } else {
            let idx = fastrand::usize(..samples.len());
            samples[idx] = duration;
        }
    }

    /// Get percentile (0.0 to 1.0)
    pub fn percentile(&self, p: f64) -> Duration {
        let samples = self.samples.read();

        if samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<Duration> = samples.clone();
        sorted.sort();

        let idx = ((sorted.len() - 1) as f64 * p) as usize;
        sorted[idx]
    }

    pub fn count(&self) -> usize {
        self.samples.read().len()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
