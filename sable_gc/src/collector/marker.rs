//! Mark stack and the marking tracer.
//!
//! Marking is tri-color over the per-cell mark bits:
//! - **White**: mark bit clear
//! - **Gray (on the stack)**: marked, children not yet scanned
//! - **Black**: marked and scanned
//!
//! The invariant: no black cell points directly to a white cell. Incremental
//! marking keeps it with snapshot-at-the-beginning pre-barriers, which mark
//! the old target of every overwritten slot while the zone needs barriers.
//!
//! ```text
//! ┌─────┐     ┌─────┐     ┌─────┐
//! │ Root│────▶│  A  │────▶│  B  │      drain(): pop A, trace_children(A)
//! └─────┘     │stack│     │white│  ──▶ marks B, pushes B
//!             └─────┘     └─────┘
//! ```
//!
//! Mark bits are separate from the mark *color*: black marking sets
//! `MARKED`, the later gray phase sets `GRAY` on cells that are still white.

use crate::MarkColor;
use crate::heap::GcHeap;
use crate::heap::cell::CellId;
use crate::trace::{Edge, Tracer};

/// Result of draining the mark stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    /// The stack is empty.
    Finished,
    /// The budget ran out with work left.
    BudgetExhausted,
}

/// The collector's mark stack.
#[derive(Debug)]
pub struct GcMarker {
    /// Marked cells whose children have not been scanned.
    stack: Vec<CellId>,
    /// Color applied by [`mark_cell`](Self::mark_cell).
    color: MarkColor,
}

impl GcMarker {
    /// Create an empty marker that marks black.
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(4096),
            color: MarkColor::Black,
        }
    }

    /// Current mark color.
    #[inline]
    pub fn color(&self) -> MarkColor {
        self.color
    }

    /// Switch mark color.
    #[inline]
    pub fn set_color(&mut self, color: MarkColor) {
        self.color = color;
    }

    /// Whether no work is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Pending work items.
    #[inline]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Mark `id` with the current color and queue it for scanning.
    ///
    /// Returns true if the cell was newly marked. Does not look at zones;
    /// callers decide whether the cell is theirs to mark.
    #[inline]
    pub fn mark_cell(&mut self, heap: &GcHeap, id: CellId) -> bool {
        if heap.cell(id).mark(self.color) {
            self.stack.push(id);
            true
        } else {
            false
        }
    }

    /// Scan queued cells until the stack is empty or `budget` cells have
    /// been scanned. `None` means no limit.
    pub fn drain(&mut self, heap: &GcHeap, budget: Option<usize>) -> DrainResult {
        let mut remaining = budget.unwrap_or(usize::MAX);
        while remaining > 0 {
            let Some(id) = self.stack.pop() else {
                return DrainResult::Finished;
            };
            remaining -= 1;
            let mut tracer = MarkingTracer::new(self, heap);
            heap.trace_children(id, &mut tracer);
        }
        if self.stack.is_empty() {
            DrainResult::Finished
        } else {
            DrainResult::BudgetExhausted
        }
    }

    /// Drop all pending work and go back to black.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.color = MarkColor::Black;
    }
}

impl Default for GcMarker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Marking Tracer
// =============================================================================

/// Tracer for the mark phase.
///
/// Marks targets in collecting zones and queues them on the marker; edges
/// into other zones are ignored.
pub struct MarkingTracer<'a> {
    marker: &'a mut GcMarker,
    heap: &'a GcHeap,
}

impl<'a> MarkingTracer<'a> {
    /// Mark through `marker`.
    pub fn new(marker: &'a mut GcMarker, heap: &'a GcHeap) -> Self {
        Self { marker, heap }
    }
}

impl Tracer for MarkingTracer<'_> {
    #[inline]
    fn on_edge(&mut self, edge: Edge) {
        let zone = self.heap.cell(edge.target).zone();
        if self.heap.is_zone_collecting(zone) {
            self.marker.mark_cell(self.heap, edge.target);
        }
    }

    #[inline]
    fn is_marking(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
