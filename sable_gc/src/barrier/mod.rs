//! Write barriers.
//!
//! Two barriers guard every pointer store into the heap:
//!
//! - The **pre-barrier** (SATB, snapshot-at-the-beginning) runs before the
//!   store. While the holder's zone needs barriers, the value being
//!   overwritten is marked, so incremental marking never loses a cell that
//!   was reachable when marking started.
//!
//! - The **post-barrier** (generational) runs after the store. A tenured
//!   holder that now points into the nursery is recorded in the
//!   [`StoreBuffer`], so minor GC can find old→young edges without scanning
//!   the whole tenured heap.
//!
//! [`GcRuntime::set_slot`](crate::GcRuntime::set_slot) runs both.

mod store_buffer;

pub use store_buffer::{StoreBuffer, StoreBufferEntry};

use crate::collector::GcMarker;
use crate::heap::GcHeap;
use crate::heap::cell::{CellId, Value};

// =============================================================================
// Incremental (SATB) Pre-Barrier
// =============================================================================

/// Pre-write barrier for overwriting `old` in a slot.
///
/// Marks the old target if it is a live tenured cell whose zone needs
/// barriers. Returns whether a cell was newly marked.
///
/// The fast path when no zone needs barriers is one flag test per store.
#[inline]
pub fn pre_write_barrier(heap: &GcHeap, marker: &mut GcMarker, old: Value) -> bool {
    let Value::Cell(target) = old else {
        return false;
    };
    let Some(cell) = heap.get(target) else {
        return false;
    };
    if cell.is_in_nursery() || !heap.zone(cell.zone()).needs_barrier() {
        return false;
    }
    marker.mark_cell(heap, target)
}

// =============================================================================
// Generational Post-Barrier
// =============================================================================

/// Post-write barrier after storing `new` into slot `index` of `holder`.
///
/// Records the slot when a tenured holder now points into the nursery.
/// Returns whether an entry was recorded.
#[inline]
pub fn post_write_barrier(heap: &mut GcHeap, holder: CellId, index: u32, new: Value) -> bool {
    if !needs_post_barrier(heap, holder, new) {
        return false;
    }
    heap.store_buffer_mut().put_slot(holder, index);
    true
}

/// Post-write barrier for a bulk store of `values` starting at `start`.
///
/// Records one range entry if any of the values is a nursery cell.
pub fn post_write_barrier_range(
    heap: &mut GcHeap,
    holder: CellId,
    start: u32,
    values: &[Value],
) -> bool {
    if !values.iter().any(|&v| needs_post_barrier(heap, holder, v)) {
        return false;
    }
    heap.store_buffer_mut()
        .put_slot_range(holder, start, values.len() as u32);
    true
}

/// Post-write barrier after replacing every slot of `holder`.
pub fn post_write_barrier_whole_cell(heap: &mut GcHeap, holder: CellId) -> bool {
    let young = heap
        .cell(holder)
        .slots()
        .iter()
        .any(|&v| needs_post_barrier(heap, holder, v));
    if young {
        heap.store_buffer_mut().put_whole_cell(holder);
    }
    young
}

#[inline]
fn needs_post_barrier(heap: &GcHeap, holder: CellId, new: Value) -> bool {
    let Value::Cell(target) = new else {
        return false;
    };
    heap.store_buffer().is_enabled() && !heap.is_in_nursery(holder) && heap.is_in_nursery(target)
}

// =============================================================================
// Tests
// =============================================================================
