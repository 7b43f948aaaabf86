//! Nursery (young generation) bookkeeping.
//!
//! Nursery cells live in the same arena as tenured cells but are tracked
//! here until the next minor GC, which either promotes them in place or
//! frees them:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  NURSERY                                     │
//! │  ┌─────┬─────┬─────┬─────┬───────────────┐   │
//! │  │  A  │  B  │  C  │  D  │     free      │   │
//! │  └─────┴─────┴─────┴─────┴───────────────┘   │
//! │        minor GC: reachable → tenured,        │
//! │        unreachable → freed, list emptied     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Generational allocation can be switched off, either by configuration or
//! temporarily (the pre-barrier verifier needs an empty, unused nursery).

use crate::heap::cell::CellId;

/// Young generation allocation tracker.
#[derive(Debug)]
pub struct Nursery {
    /// Cells allocated since the last minor GC.
    cells: Vec<CellId>,
    /// Cells the nursery holds before a minor GC is required.
    capacity: usize,
    /// Whether generational collection is configured at all.
    configured: bool,
    /// Nesting count of temporary disables.
    disable_count: u32,
}

impl Nursery {
    /// Create a nursery with room for `capacity` cells.
    pub fn new(capacity: usize, configured: bool) -> Self {
        Self {
            cells: Vec::with_capacity(capacity.min(4096)),
            capacity,
            configured,
            disable_count: 0,
        }
    }

    /// Whether new nursery-allocable cells go into the nursery.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.configured && self.disable_count == 0
    }

    /// Temporarily disable generational allocation. Nests.
    pub fn disable(&mut self) {
        self.disable_count += 1;
    }

    /// Undo one [`disable`](Self::disable).
    pub fn enable(&mut self) {
        debug_assert!(self.disable_count > 0, "unbalanced nursery enable");
        self.disable_count = self.disable_count.saturating_sub(1);
    }

    #[inline]
    pub(crate) fn track(&mut self, id: CellId) {
        self.cells.push(id);
    }

    /// Whether the next nursery allocation needs a minor GC first.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.cells.len() >= self.capacity
    }

    /// Cells currently in the nursery.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the nursery holds no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Configured capacity in cells.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the nursery's cell list, leaving it empty.
    pub(crate) fn take_cells(&mut self) -> Vec<CellId> {
        std::mem::take(&mut self.cells)
    }
}
