//! GC statistics.
//!
//! Counters for allocation, collection and barrier verification activity.
//! Atomics keep the recording methods `&self`, so anything holding a shared
//! reference to the heap can record.

use crate::heap::cell::CellKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics about garbage collection activity.
#[derive(Debug)]
pub struct GcStats {
    // =========================================================================
    // Allocation Statistics
    // =========================================================================
    /// Total cells allocated since start.
    pub cells_allocated: AtomicU64,
    /// Cells allocated per kind, indexed by `CellKind as usize`.
    pub allocated_by_kind: [AtomicU64; CellKind::COUNT],

    // =========================================================================
    // Collection Statistics
    // =========================================================================
    /// Number of minor (nursery) collections.
    pub minor_collections: AtomicU64,
    /// Number of major collections (incremental or not).
    pub major_collections: AtomicU64,
    /// Incremental mark slices run.
    pub incremental_slices: AtomicU64,
    /// Total time spent in minor GC (nanoseconds).
    pub minor_gc_time_ns: AtomicU64,
    /// Total time spent in major GC (nanoseconds).
    pub major_gc_time_ns: AtomicU64,
    /// Nursery cells promoted to tenured.
    pub cells_promoted: AtomicU64,
    /// Cells freed by minor and major collections.
    pub cells_freed: AtomicU64,

    // =========================================================================
    // Verifier Statistics
    // =========================================================================
    /// Verifier passes armed.
    pub verifier_passes_started: AtomicU64,
    /// Verifier passes checked to completion.
    pub verifier_passes_completed: AtomicU64,
    /// Verifier passes abandoned (arena exhausted).
    pub verifier_passes_aborted: AtomicU64,
    /// Start requests that were no-ops.
    pub verifier_passes_skipped: AtomicU64,
    /// Snapshot nodes built by the pre-barrier verifier.
    pub snapshot_nodes: AtomicU64,
    /// Snapshot edges recorded by the pre-barrier verifier.
    pub snapshot_edges: AtomicU64,
    /// Edges checked at the end of verifier passes.
    pub edges_checked: AtomicU64,
    /// Barrier violations detected.
    pub violations: AtomicU64,
}

impl GcStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            cells_allocated: AtomicU64::new(0),
            allocated_by_kind: [const { AtomicU64::new(0) }; CellKind::COUNT],
            minor_collections: AtomicU64::new(0),
            major_collections: AtomicU64::new(0),
            incremental_slices: AtomicU64::new(0),
            minor_gc_time_ns: AtomicU64::new(0),
            major_gc_time_ns: AtomicU64::new(0),
            cells_promoted: AtomicU64::new(0),
            cells_freed: AtomicU64::new(0),
            verifier_passes_started: AtomicU64::new(0),
            verifier_passes_completed: AtomicU64::new(0),
            verifier_passes_aborted: AtomicU64::new(0),
            verifier_passes_skipped: AtomicU64::new(0),
            snapshot_nodes: AtomicU64::new(0),
            snapshot_edges: AtomicU64::new(0),
            edges_checked: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Record an allocation.
    #[inline]
    pub fn record_allocation(&self, kind: CellKind) {
        self.cells_allocated.fetch_add(1, Ordering::Relaxed);
        self.allocated_by_kind[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a minor GC.
    pub fn record_minor_gc(&self, duration: Duration, promoted: usize, freed: usize) {
        self.minor_collections.fetch_add(1, Ordering::Relaxed);
        self.minor_gc_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.cells_promoted
            .fetch_add(promoted as u64, Ordering::Relaxed);
        self.cells_freed.fetch_add(freed as u64, Ordering::Relaxed);
    }

    /// Record a major GC.
    pub fn record_major_gc(&self, duration: Duration, freed: usize) {
        self.major_collections.fetch_add(1, Ordering::Relaxed);
        self.major_gc_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.cells_freed.fetch_add(freed as u64, Ordering::Relaxed);
    }

    /// Record one incremental slice.
    #[inline]
    pub fn record_slice(&self) {
        self.incremental_slices.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an armed verifier pass.
    pub fn record_verifier_start(&self) {
        self.verifier_passes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the size of a finished pre-barrier snapshot.
    pub fn record_snapshot(&self, nodes: usize, edges: usize) {
        self.snapshot_nodes
            .fetch_add(nodes as u64, Ordering::Relaxed);
        self.snapshot_edges
            .fetch_add(edges as u64, Ordering::Relaxed);
    }

    /// Record a verifier pass checked to completion.
    pub fn record_verifier_finish(&self, edges_checked: usize) {
        self.verifier_passes_completed
            .fetch_add(1, Ordering::Relaxed);
        self.edges_checked
            .fetch_add(edges_checked as u64, Ordering::Relaxed);
    }

    /// Record an abandoned verifier pass.
    pub fn record_verifier_abort(&self) {
        self.verifier_passes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a verifier start request that did nothing.
    pub fn record_verifier_skip(&self) {
        self.verifier_passes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a detected barrier violation.
    pub fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Cells of `kind` allocated so far.
    pub fn allocated(&self, kind: CellKind) -> u64 {
        self.allocated_by_kind[kind as usize].load(Ordering::Relaxed)
    }

    /// Get total GC time.
    pub fn total_gc_time(&self) -> Duration {
        let minor_ns = self.minor_gc_time_ns.load(Ordering::Relaxed);
        let major_ns = self.major_gc_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(minor_ns + major_ns)
    }

    /// Get average minor GC pause time.
    pub fn avg_minor_pause(&self) -> Duration {
        let count = self.minor_collections.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.minor_gc_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / count)
    }

    /// Get average major GC pause time.
    pub fn avg_major_pause(&self) -> Duration {
        let count = self.major_collections.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.major_gc_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / count)
    }

    /// One-paragraph human-readable summary.
    pub fn summary(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        format!(
            "allocated {} cells; {} minor / {} major collections ({} slices), \
             {:?} total GC time; promoted {}, freed {}; verifier: {} started, \
             {} completed, {} aborted, {} skipped, {} edges checked, {} violations",
            load(&self.cells_allocated),
            load(&self.minor_collections),
            load(&self.major_collections),
            load(&self.incremental_slices),
            self.total_gc_time(),
            load(&self.cells_promoted),
            load(&self.cells_freed),
            load(&self.verifier_passes_started),
            load(&self.verifier_passes_completed),
            load(&self.verifier_passes_aborted),
            load(&self.verifier_passes_skipped),
            load(&self.edges_checked),
            load(&self.violations),
        )
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring GC phases.
pub struct GcTimer {
    start: Instant,
    label: &'static str,
}

impl GcTimer {
    /// Start a new timer with the given label.
    pub fn start(label: &'static str) -> Self {
        Self {
            start: Instant::now(),
            label,
        }
    }

    /// Stop the timer and return the elapsed duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        log::trace!("GC {}: {:?}", self.label, elapsed);
        elapsed
    }
}
