//! Major (full) garbage collection.
//!
//! Major GC is an incremental mark-sweep over a chosen set of zones:
//! 1. Begin: empty the nursery, clear marks, turn on barriers in the
//!    collecting zones and mark the roots black
//! 2. Mark slices: drain the mark stack a budget at a time while the
//!    mutator runs with pre-barriers on
//! 3. Finish: re-mark the saved stack roots, drain, then mark the gray
//!    roots gray
//! 4. Sweep: free every tenured cell in a collecting zone that is neither
//!    marked nor allocated during the collection
//!
//! ```text
//! begin ──▶ slice ──▶ slice ──▶ … ──▶ finish ──▶ sweep
//!   │         ▲  mutator runs, barriers on  │
//!   └─ roots  └────────────────────────────┘
//! ```
//!
//! Mark bits are left set after the sweep; the next collection or verifier
//! pass clears them.

use crate::MarkColor;
use crate::collector::marker::{DrainResult, GcMarker, MarkingTracer};
use crate::heap::GcHeap;
use crate::heap::zone::ZoneId;
use crate::roots::{RootEnumerator, RootsSource, RuntimeRoots, TraceOrMark};
use crate::stats::GcTimer;
use crate::trace::{RootCategory, RootTracer};

use std::time::Duration;

/// Which zones a major collection covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GcScope {
    /// Every zone.
    #[default]
    All,
    /// Only the listed zones.
    Zones(Vec<ZoneId>),
}

impl GcScope {
    fn resolve(&self, heap: &GcHeap) -> Vec<ZoneId> {
        match self {
            GcScope::All => heap.zones().map(|(id, _)| id).collect(),
            GcScope::Zones(zones) => {
                let mut zones = zones.clone();
                zones.sort_unstable();
                zones.dedup();
                zones
            }
        }
    }
}

/// Result of a major collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionResult {
    /// GC number of the collection.
    pub gc_number: u64,
    /// Cells marked (black or gray) in the collecting zones.
    pub cells_marked: usize,
    /// Cells freed by the sweep.
    pub cells_freed: usize,
    /// Zones collected.
    pub zones_collected: usize,
}

/// Progress of an incremental major collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcProgress {
    /// No collection is running.
    NotRunning,
    /// Marking is under way; call `gc_slice` again.
    InProgress,
    /// The collection completed.
    Finished(CollectionResult),
}

/// An in-progress major collection.
#[derive(Debug)]
pub struct MajorCollection {
    zones: Vec<ZoneId>,
    gc_number: u64,
    elapsed: Duration,
}

impl MajorCollection {
    /// Open a collection of `scope`: flag the zones and mark the roots.
    ///
    /// The nursery must already be empty.
    pub fn begin(
        heap: &mut GcHeap,
        roots: &RuntimeRoots,
        marker: &mut GcMarker,
        scope: &GcScope,
        gc_number: u64,
    ) -> Self {
        let timer = GcTimer::start("major begin");
        debug_assert!(heap.nursery().is_empty(), "major GC with a non-empty nursery");

        let zones = scope.resolve(heap);
        heap.clear_marks();
        for &zone in &zones {
            let zone = heap.zone_mut(zone);
            zone.set_collecting(true);
            zone.set_needs_barrier(true);
        }

        marker.reset();
        {
            let heap: &GcHeap = heap;
            let mut tracer = MarkingTracer::new(marker, heap);
            RootEnumerator::new(heap, roots, TraceOrMark::Mark, RootsSource::TraceRoots)
                .enumerate(&mut tracer);
        }
        log::debug!(
            "major GC #{gc_number}: {} zone(s), {} root cell(s) queued",
            zones.len(),
            marker.len()
        );

        Self {
            zones,
            gc_number,
            elapsed: timer.stop(),
        }
    }

    /// GC number of this collection.
    pub fn gc_number(&self) -> u64 {
        self.gc_number
    }

    /// Zones being collected.
    pub fn zones(&self) -> &[ZoneId] {
        &self.zones
    }

    /// Run one mark slice of at most `budget` cells.
    pub fn mark_slice(
        &mut self,
        heap: &GcHeap,
        marker: &mut GcMarker,
        budget: Option<usize>,
    ) -> DrainResult {
        let timer = GcTimer::start("mark slice");
        let result = marker.drain(heap, budget);
        self.elapsed += timer.stop();
        heap.stats().record_slice();
        result
    }

    /// Finish marking and sweep.
    pub fn finish(
        mut self,
        heap: &mut GcHeap,
        roots: &RuntimeRoots,
        marker: &mut GcMarker,
    ) -> CollectionResult {
        let timer = GcTimer::start("major finish");

        {
            let heap: &GcHeap = heap;

            // Stack roots may have been popped since marking began; the
            // snapshot taken then is authoritative.
            let mut tracer = MarkingTracer::new(marker, heap);
            RootEnumerator::new(heap, roots, TraceOrMark::Mark, RootsSource::UseSavedRoots)
                .mark_exact_stack_roots(&mut tracer);
            marker.drain(heap, None);

            mark_gray_roots(heap, roots, marker);
        }

        let cells_marked = count_marked(heap);
        let cells_freed = sweep(heap);

        for &zone in &self.zones {
            let zone = heap.zone_mut(zone);
            zone.set_collecting(false);
            zone.set_needs_barrier(false);
        }
        roots.clear_saved_roots();
        marker.reset();

        self.elapsed += timer.stop();
        heap.stats().record_major_gc(self.elapsed, cells_freed);
        log::debug!(
            "major GC #{}: marked {}, freed {} in {:?}",
            self.gc_number,
            cells_marked,
            cells_freed,
            self.elapsed
        );

        CollectionResult {
            gc_number: self.gc_number,
            cells_marked,
            cells_freed,
            zones_collected: self.zones.len(),
        }
    }
}

/// Mark everything reachable from the gray-root callback gray.
fn mark_gray_roots(heap: &GcHeap, roots: &RuntimeRoots, marker: &mut GcMarker) {
    let Some(callback) = roots.gray_tracer() else {
        return;
    };
    marker.set_color(MarkColor::Gray);
    {
        let mut tracer = MarkingTracer::new(marker, heap);
        let mut trc = RootTracer::new(heap, &mut tracer, RootCategory::GrayRootCallback);
        callback(&mut trc);
    }
    marker.drain(heap, None);
    marker.set_color(MarkColor::Black);
}

fn count_marked(heap: &GcHeap) -> usize {
    heap.cell_ids()
        .filter(|&id| {
            let cell = heap.cell(id);
            heap.is_zone_collecting(cell.zone()) && cell.is_marked()
        })
        .count()
}

/// Free unmarked tenured cells in the collecting zones and drop wrapper
/// map entries whose target or wrapper died. Returns the number freed.
fn sweep(heap: &mut GcHeap) -> usize {
    let dead: Vec<_> = heap
        .cell_ids()
        .filter(|&id| {
            let cell = heap.cell(id);
            heap.is_zone_collecting(cell.zone())
                && !cell.is_in_nursery()
                && !cell.is_marked_or_allocated()
        })
        .collect();
    for &id in &dead {
        heap.free(id);
    }

    if !dead.is_empty() {
        let compartments: Vec<_> = heap.compartments().map(|(id, _)| id).collect();
        for id in compartments {
            let mut wrappers = std::mem::take(&mut heap.compartment_mut(id).wrappers);
            wrappers.retain(|&target, &mut wrapper| heap.is_live(target) && heap.is_live(wrapper));
            heap.compartment_mut(id).wrappers = wrappers;
        }
    }
    dead.len()
}

// =============================================================================
// Tests
// =============================================================================
