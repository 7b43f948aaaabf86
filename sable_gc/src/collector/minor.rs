//! Minor (nursery) garbage collection.
//!
//! Nursery cells share the arena with tenured cells, so a minor GC never
//! copies. It finds the nursery cells reachable from the minor roots and
//! from the store buffer, retags them as tenured, and frees the rest:
//!
//! ```text
//! ┌─────────────────────────────┐        ┌──────────────────────────┐
//! │  NURSERY                    │        │  TENURED                 │
//! │  ┌─────┬─────┬─────┐        │        │  ┌─────┬─────┐           │
//! │  │  A  │  B  │  C  │        │──────▶ │  │  A  │  C  │  B freed  │
//! │  │root │dead │ SB  │        │        │  └─────┴─────┘           │
//! │  └─────┴─────┴─────┘        │        │                          │
//! └─────────────────────────────┘        └──────────────────────────┘
//! ```
//!
//! # Performance Characteristics
//!
//! - **Time**: O(roots + store buffer + reachable nursery cells)
//! - Tenured cells are never scanned unless the store buffer names them

use crate::heap::GcHeap;
use crate::heap::cell::{CellFlags, CellId};
use crate::roots::{RootEnumerator, RuntimeRoots};
use crate::stats::GcTimer;
use crate::trace::{Edge, Tracer};

use rustc_hash::FxHashSet;

/// Result of a minor collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MinorResult {
    /// Nursery cells retagged as tenured.
    pub promoted: usize,
    /// Nursery cells freed.
    pub freed: usize,
}

/// Minor collector for the nursery.
pub struct MinorCollector {
    /// Reached nursery cells whose children have not been scanned.
    worklist: Vec<CellId>,
    /// Every nursery cell reached so far.
    reached: FxHashSet<CellId>,
}

impl MinorCollector {
    /// Create a new minor collector.
    pub fn new() -> Self {
        Self {
            worklist: Vec::with_capacity(256),
            reached: FxHashSet::default(),
        }
    }

    /// Empty the nursery.
    ///
    /// Promoted cells in zones that need barriers are flagged as allocated
    /// during the incremental window, so an in-progress mark keeps them.
    pub fn collect(&mut self, heap: &mut GcHeap, roots: &RuntimeRoots) -> MinorResult {
        if heap.nursery().is_empty() {
            heap.store_buffer_mut().clear();
            return MinorResult::default();
        }

        let timer = GcTimer::start("minor");
        self.reached.clear();
        self.worklist.clear();

        if heap.store_buffer().should_compact() {
            heap.store_buffer_mut().compact();
        }

        {
            let heap: &GcHeap = heap;
            let mut tracer = NurseryTracer {
                heap,
                worklist: &mut self.worklist,
                reached: &mut self.reached,
            };
            RootEnumerator::minor(heap, roots).enumerate(&mut tracer);
            heap.store_buffer().mark_all(heap, &mut tracer);

            while let Some(id) = tracer.worklist.pop() {
                heap.trace_children(id, &mut tracer);
            }
        }

        let mut result = MinorResult::default();
        for id in heap.nursery_mut().take_cells() {
            if !heap.is_live(id) {
                continue;
            }
            if self.reached.contains(&id) {
                heap.promote(id);
                let zone = heap.cell(id).zone();
                if heap.zone(zone).needs_barrier() {
                    heap.cell(id)
                        .insert_flags(CellFlags::ALLOCATED_DURING_INCREMENTAL);
                }
                result.promoted += 1;
            } else {
                heap.free(id);
                result.freed += 1;
            }
        }
        heap.store_buffer_mut().clear();

        let elapsed = timer.stop();
        heap.stats()
            .record_minor_gc(elapsed, result.promoted, result.freed);
        log::debug!(
            "minor GC: promoted {}, freed {} in {:?}",
            result.promoted,
            result.freed,
            elapsed
        );
        result
    }
}

impl Default for MinorCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows edges into the nursery only.
struct NurseryTracer<'a> {
    heap: &'a GcHeap,
    worklist: &'a mut Vec<CellId>,
    reached: &'a mut FxHashSet<CellId>,
}

impl Tracer for NurseryTracer<'_> {
    fn on_edge(&mut self, edge: Edge) {
        if self.heap.is_in_nursery(edge.target) && self.reached.insert(edge.target) {
            self.worklist.push(edge.target);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
