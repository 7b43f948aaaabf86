//! Store buffer for tracking tenured→nursery references.
//!
//! The post-write barrier appends an entry whenever a tenured cell is made
//! to point into the nursery. A minor GC treats every recorded location as
//! a root instead of scanning the whole tenured heap.
//!
//! # Design
//!
//! A plain append buffer with deduplication deferred to the collector. The
//! barrier pushes (O(1)); [`StoreBuffer::compact`] sorts and dedups before a
//! minor GC walks the entries, so duplicate inserts cost nothing on the
//! mutator side.
//!
//! Entries name *locations*, not values: the edge is re-read from the heap
//! when the buffer is walked, so a slot that was overwritten after being
//! recorded reports its current contents.

use crate::heap::GcHeap;
use crate::heap::cell::{CellId, Value};
use crate::trace::{Edge, EdgeLocation, Tracer};

/// Entries before [`StoreBuffer::should_compact`] reports true.
const BUFFER_CAPACITY: usize = 4096;

/// A recorded location that may hold a tenured→nursery edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreBufferEntry {
    /// One slot of a tenured cell.
    Slot {
        /// Cell owning the slot.
        holder: CellId,
        /// Slot index.
        index: u32,
    },
    /// A contiguous run of slots.
    SlotRange {
        /// Cell owning the slots.
        holder: CellId,
        /// First slot index.
        start: u32,
        /// Number of slots.
        count: u32,
    },
    /// Every slot of a cell (used after bulk slot replacement).
    WholeCell(CellId),
}

impl StoreBufferEntry {
    /// Cell the entry belongs to.
    #[inline]
    pub fn holder(&self) -> CellId {
        match *self {
            StoreBufferEntry::Slot { holder, .. }
            | StoreBufferEntry::SlotRange { holder, .. }
            | StoreBufferEntry::WholeCell(holder) => holder,
        }
    }
}

/// Store buffer for generational post-write barriers.
#[derive(Debug)]
pub struct StoreBuffer {
    entries: Vec<StoreBufferEntry>,
    enabled: bool,
}

impl StoreBuffer {
    /// Create a new, enabled, empty store buffer.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(BUFFER_CAPACITY),
            enabled: true,
        }
    }

    /// Whether barriers should record into this buffer.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stop recording and drop every entry.
    pub fn disable(&mut self) {
        self.entries.clear();
        self.enabled = false;
    }

    /// Resume recording.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record one slot.
    #[inline]
    pub fn put_slot(&mut self, holder: CellId, index: u32) {
        if self.enabled {
            self.entries.push(StoreBufferEntry::Slot { holder, index });
        }
    }

    /// Record `count` slots starting at `start`.
    #[inline]
    pub fn put_slot_range(&mut self, holder: CellId, start: u32, count: u32) {
        if self.enabled && count > 0 {
            self.entries.push(StoreBufferEntry::SlotRange {
                holder,
                start,
                count,
            });
        }
    }

    /// Record every slot of `holder`.
    #[inline]
    pub fn put_whole_cell(&mut self, holder: CellId) {
        if self.enabled {
            self.entries.push(StoreBufferEntry::WholeCell(holder));
        }
    }

    /// Number of entries, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the buffer has grown large enough to be worth compacting.
    #[inline]
    pub fn should_compact(&self) -> bool {
        self.entries.len() >= BUFFER_CAPACITY
    }

    /// Sort and deduplicate the entries.
    pub fn compact(&mut self) {
        self.entries.sort_unstable();
        self.entries.dedup();
    }

    /// Recorded entries, in insertion order unless compacted.
    #[inline]
    pub fn entries(&self) -> &[StoreBufferEntry] {
        &self.entries
    }

    /// Drop every entry. Called at the end of a minor GC.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Report every cell-valued slot covered by a recorded entry.
    ///
    /// Slots are re-read from `heap`; entries whose holder has since been
    /// freed are skipped, as are slots that no longer hold a cell. Each
    /// edge carries its real [`EdgeLocation::Slot`] location.
    pub fn mark_all(&self, heap: &GcHeap, tracer: &mut dyn Tracer) {
        for entry in &self.entries {
            let Some(cell) = heap.get(entry.holder()) else {
                continue;
            };
            let slots = cell.slots();
            let (start, end) = match *entry {
                StoreBufferEntry::Slot { index, .. } => (index as usize, index as usize + 1),
                StoreBufferEntry::SlotRange { start, count, .. } => {
                    (start as usize, start as usize + count as usize)
                }
                StoreBufferEntry::WholeCell(_) => (0, slots.len()),
            };
            let end = end.min(slots.len());
            for index in start..end {
                if let Value::Cell(target) = slots[index] {
                    tracer.on_edge(Edge {
                        location: EdgeLocation::Slot {
                            holder: entry.holder(),
                            index: index as u32,
                        },
                        target,
                        kind: heap.kind_of(target),
                        name: "store buffer",
                    });
                }
            }
        }
    }
}

impl Default for StoreBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GcConfig;
    use crate::heap::cell::CellKind;
    use crate::trace::EdgeCollector;

    fn id(index: u32) -> CellId {
        CellId {
            index,
            generation: 0,
        }
    }

    #[test]
    fn test_store_buffer_creation() {
        let sb = StoreBuffer::new();
        assert!(sb.is_empty());
        assert!(sb.is_enabled());
    }

    #[test]
    fn test_compact_deduplicates() {
        let mut sb = StoreBuffer::new();
        for _ in 0..50 {
            sb.put_slot(id(2), 0);
        }
        sb.put_whole_cell(id(1));
        sb.compact();
        assert_eq!(sb.len(), 2);
    }

    #[test]
    fn test_compact_sorted_order() {
        let mut sb = StoreBuffer::new();
        sb.put_slot(id(3), 0);
        sb.put_slot(id(1), 0);
        sb.put_slot(id(2), 0);
        sb.compact();
        let holders: Vec<_> = sb.entries().iter().map(|e| e.holder()).collect();
        assert_eq!(holders, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_disabled_buffer_records_nothing() {
        let mut sb = StoreBuffer::new();
        sb.put_slot(id(1), 0);
        sb.disable();
        assert!(sb.is_empty());
        sb.put_slot(id(1), 1);
        sb.put_whole_cell(id(1));
        assert!(sb.is_empty());
        sb.enable();
        sb.put_slot(id(1), 1);
        assert_eq!(sb.len(), 1);
    }

    #[test]
    fn test_empty_range_is_ignored() {
        let mut sb = StoreBuffer::new();
        sb.put_slot_range(id(1), 0, 0);
        assert!(sb.is_empty());
    }

    #[test]
    fn test_should_compact() {
        let mut sb = StoreBuffer::new();
        assert!(!sb.should_compact());
        for i in 0..BUFFER_CAPACITY as u32 {
            sb.put_slot(id(i), 0);
        }
        assert!(sb.should_compact());
    }

    #[test]
    fn test_mark_all_reports_current_slot_contents() {
        let mut heap = GcHeap::new(&GcConfig::default());
        let (_, c) = heap.new_zone_with_compartment();
        let holder = heap.allocate_tenured(CellKind::Object, c, 3);
        let a = heap.allocate_tenured(CellKind::Object, c, 0);
        let b = heap.allocate_tenured(CellKind::String, c, 0);
        heap.write_slot(holder, 0, Value::Cell(a));
        heap.write_slot(holder, 2, Value::Cell(b));

        let mut sb = StoreBuffer::new();
        sb.put_slot(holder, 0);
        sb.put_slot(holder, 1);
        sb.put_slot_range(holder, 1, 10);

        let mut collector = EdgeCollector::new();
        sb.mark_all(&heap, &mut collector);

        assert_eq!(collector.targets(), vec![a, b]);
        assert_eq!(
            collector.edges[1].location,
            EdgeLocation::Slot { holder, index: 2 }
        );
        assert_eq!(collector.edges[1].kind, CellKind::String);
    }

    #[test]
    fn test_mark_all_skips_dead_holders() {
        let mut heap = GcHeap::new(&GcConfig::default());
        let (_, c) = heap.new_zone_with_compartment();
        let holder = heap.allocate_tenured(CellKind::Object, c, 1);
        let target = heap.allocate_tenured(CellKind::Object, c, 0);
        heap.write_slot(holder, 0, Value::Cell(target));

        let mut sb = StoreBuffer::new();
        sb.put_whole_cell(holder);
        heap.free(holder);

        let mut collector = EdgeCollector::new();
        sb.mark_all(&heap, &mut collector);
        assert!(collector.edges.is_empty());
    }
}
