//! Heap storage.
//!
//! Every cell lives in one arena of slots, indexed by [`CellId`]. Freed
//! slots go on a free list and are reused with a bumped generation counter,
//! so a handle to a freed cell never aliases its successor.
//!
//! Generational state is a per-cell tag plus the [`Nursery`] list of young
//! cells; promotion retags a cell in place. Zones and compartments are
//! stored alongside, as is the [`StoreBuffer`] the post-barrier writes to.

pub mod cell;
mod nursery;
pub mod zone;

pub use cell::{CellFlags, CellId, CellKind, HeapCell, Value};
pub use nursery::Nursery;
pub use zone::{Compartment, CompartmentId, WrapperMap, Zone, ZoneId};

use crate::Generation;
use crate::barrier::StoreBuffer;
use crate::config::GcConfig;
use crate::stats::GcStats;
use crate::trace::{Edge, EdgeLocation, Tracer};

use smallvec::SmallVec;

/// Slot storage for a new cell.
pub type Slots = SmallVec<[Value; 4]>;

/// Main heap structure: the cell arena plus zones, nursery and store buffer.
pub struct GcHeap {
    /// Cell arena; `None` marks a free slot.
    cells: Vec<Option<HeapCell>>,
    /// Reuse counter per arena slot.
    generations: Vec<u32>,
    /// Free arena slots, reused LIFO.
    free_list: Vec<u32>,
    /// Live cell count.
    live: usize,

    zones: Vec<Zone>,
    compartments: Vec<Compartment>,

    /// Young generation bookkeeping.
    nursery: Nursery,

    /// Tenured→nursery locations recorded by the post-barrier.
    store_buffer: StoreBuffer,

    /// GC statistics.
    stats: GcStats,
}

impl GcHeap {
    /// Create an empty heap.
    pub fn new(config: &GcConfig) -> Self {
        let mut store_buffer = StoreBuffer::new();
        if !config.generational {
            store_buffer.disable();
        }
        Self {
            cells: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            zones: Vec::new(),
            compartments: Vec::new(),
            nursery: Nursery::new(config.nursery_capacity, config.generational),
            store_buffer,
            stats: GcStats::new(),
        }
    }

    // =========================================================================
    // Zones and compartments
    // =========================================================================

    /// Create a zone.
    pub fn new_zone(&mut self) -> ZoneId {
        let id = ZoneId(self.zones.len() as u32);
        self.zones.push(Zone::default());
        id
    }

    /// Create a compartment in `zone`.
    ///
    /// # Panics
    ///
    /// Panics if `zone` was not created by this heap.
    pub fn new_compartment(&mut self, zone: ZoneId) -> CompartmentId {
        assert!((zone.0 as usize) < self.zones.len(), "unknown zone {zone:?}");
        let id = CompartmentId(self.compartments.len() as u32);
        self.compartments.push(Compartment::new(zone));
        id
    }

    /// Create a zone holding a single compartment.
    pub fn new_zone_with_compartment(&mut self) -> (ZoneId, CompartmentId) {
        let zone = self.new_zone();
        (zone, self.new_compartment(zone))
    }

    /// Look up a zone.
    #[inline]
    pub fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.0 as usize]
    }

    #[inline]
    pub(crate) fn zone_mut(&mut self, id: ZoneId) -> &mut Zone {
        &mut self.zones[id.0 as usize]
    }

    /// All zones with their ids.
    pub fn zones(&self) -> impl Iterator<Item = (ZoneId, &Zone)> {
        self.zones
            .iter()
            .enumerate()
            .map(|(i, z)| (ZoneId(i as u32), z))
    }

    pub(crate) fn zones_mut(&mut self) -> impl Iterator<Item = &mut Zone> {
        self.zones.iter_mut()
    }

    /// Number of zones created so far.
    #[inline]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Look up a compartment.
    #[inline]
    pub fn compartment(&self, id: CompartmentId) -> &Compartment {
        &self.compartments[id.0 as usize]
    }

    /// Mutable access to a compartment's root tables.
    #[inline]
    pub fn compartment_mut(&mut self, id: CompartmentId) -> &mut Compartment {
        &mut self.compartments[id.0 as usize]
    }

    /// All compartments with their ids.
    pub fn compartments(&self) -> impl Iterator<Item = (CompartmentId, &Compartment)> {
        self.compartments
            .iter()
            .enumerate()
            .map(|(i, c)| (CompartmentId(i as u32), c))
    }

    /// Whether `zone` participates in the current collection.
    #[inline]
    pub fn is_zone_collecting(&self, zone: ZoneId) -> bool {
        self.zone(zone).is_collecting()
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Store a new cell in the arena.
    ///
    /// Nursery cells are tracked by the nursery until the next minor GC.
    pub(crate) fn allocate(
        &mut self,
        kind: CellKind,
        compartment: CompartmentId,
        slots: Slots,
        generation: Generation,
    ) -> CellId {
        let zone = self.compartment(compartment).zone();
        let cell = HeapCell::new(kind, compartment, zone, generation, slots);

        let id = match self.free_list.pop() {
            Some(index) => {
                let i = index as usize;
                self.cells[i] = Some(cell);
                CellId {
                    index,
                    generation: self.generations[i],
                }
            }
            None => {
                let index = self.cells.len() as u32;
                self.cells.push(Some(cell));
                self.generations.push(0);
                CellId {
                    index,
                    generation: 0,
                }
            }
        };

        if generation.is_young() {
            self.nursery.track(id);
        }
        self.live += 1;
        self.stats.record_allocation(kind);
        id
    }

    /// Allocate a tenured cell with `slot_count` undefined slots, bypassing
    /// the runtime's allocation policy (no zeal, no nursery, no incremental
    /// flagging). Useful for building heaps directly.
    pub fn allocate_tenured(
        &mut self,
        kind: CellKind,
        compartment: CompartmentId,
        slot_count: usize,
    ) -> CellId {
        let slots = std::iter::repeat(Value::Undefined).take(slot_count).collect();
        self.allocate(kind, compartment, slots, Generation::Tenured)
    }

    /// Release a cell's arena slot.
    pub(crate) fn free(&mut self, id: CellId) {
        let i = id.index as usize;
        if self.get(id).is_none() {
            return;
        }
        self.cells[i] = None;
        self.generations[i] = self.generations[i].wrapping_add(1);
        self.free_list.push(id.index);
        self.live -= 1;
    }

    /// Retag a nursery cell as tenured.
    pub(crate) fn promote(&mut self, id: CellId) {
        if let Some(Some(cell)) = self.cells.get_mut(id.index as usize) {
            cell.set_generation(Generation::Tenured);
        }
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Look up a live cell. Returns `None` for freed or stale ids.
    #[inline]
    pub fn get(&self, id: CellId) -> Option<&HeapCell> {
        let i = id.index as usize;
        if self.generations.get(i).copied() != Some(id.generation) {
            return None;
        }
        self.cells[i].as_ref()
    }

    /// Look up a cell that must be live.
    ///
    /// # Panics
    ///
    /// Panics on a freed or stale id. Reaching a dead cell through a live
    /// reference means the heap is already corrupt.
    #[inline]
    pub fn cell(&self, id: CellId) -> &HeapCell {
        match self.get(id) {
            Some(cell) => cell,
            None => panic!("dangling reference to freed cell {id}"),
        }
    }

    /// Whether `id` names a live cell.
    #[inline]
    pub fn is_live(&self, id: CellId) -> bool {
        self.get(id).is_some()
    }

    /// Kind of a live cell.
    #[inline]
    pub fn kind_of(&self, id: CellId) -> CellKind {
        self.cell(id).kind()
    }

    /// Whether a live cell is in the nursery.
    #[inline]
    pub fn is_in_nursery(&self, id: CellId) -> bool {
        self.get(id).is_some_and(HeapCell::is_in_nursery)
    }

    /// Read slot `index` of `id`.
    #[inline]
    pub fn slot(&self, id: CellId, index: usize) -> Option<Value> {
        self.get(id)?.slots().get(index).copied()
    }

    /// Overwrite a slot without any barrier. Returns the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `id` is dead or `index` is out of bounds.
    pub(crate) fn write_slot(&mut self, id: CellId, index: usize, value: Value) -> Value {
        let cell = self.cell_mut(id);
        std::mem::replace(&mut cell.slots[index], value)
    }

    /// Replace every slot of `id`. Returns the previous slots.
    pub(crate) fn replace_slots(&mut self, id: CellId, slots: Slots) -> Slots {
        let cell = self.cell_mut(id);
        std::mem::replace(&mut cell.slots, slots)
    }

    fn cell_mut(&mut self, id: CellId) -> &mut HeapCell {
        let i = id.index as usize;
        match self.cells.get_mut(i) {
            Some(Some(cell)) if self.generations[i] == id.generation => cell,
            _ => panic!("write to freed cell {id}"),
        }
    }

    /// Number of live cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the heap holds no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Ids of every live cell, in arena order.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.iter().enumerate().filter_map(|(i, c)| {
            c.as_ref().map(|_| CellId {
                index: i as u32,
                generation: self.generations[i],
            })
        })
    }

    /// Ids of every live tenured cell of `kind`, in arena order.
    pub fn tenured_cells(&self, kind: CellKind) -> impl Iterator<Item = CellId> + '_ {
        self.cell_ids().filter(move |&id| {
            let cell = self.cell(id);
            cell.kind() == kind && !cell.is_in_nursery()
        })
    }

    // =========================================================================
    // Tracing
    // =========================================================================

    /// Report every outgoing edge of `id` to `tracer`, in slot order.
    ///
    /// Each edge is labelled by the holder's kind (see
    /// [`CellKind::slot_label`]) and located at its slot.
    ///
    /// # Panics
    ///
    /// Panics if `id` or any slot target is a freed cell.
    pub fn trace_children(&self, id: CellId, tracer: &mut dyn Tracer) {
        let cell = self.cell(id);
        let kind = cell.kind();
        for (index, value) in cell.slots().iter().enumerate() {
            if let Value::Cell(target) = *value {
                tracer.on_edge(Edge {
                    location: EdgeLocation::Slot {
                        holder: id,
                        index: index as u32,
                    },
                    target,
                    kind: self.kind_of(target),
                    name: kind.slot_label(index),
                });
            }
        }
    }

    /// Clear mark bits and the incremental-allocation flag on every cell.
    pub(crate) fn clear_marks(&self) {
        let all = CellFlags::MARKED | CellFlags::GRAY | CellFlags::ALLOCATED_DURING_INCREMENTAL;
        for cell in self.cells.iter().flatten() {
            cell.remove_flags(all);
        }
    }

    /// Ids of marked (black or gray) cells.
    pub fn marked_cells(&self) -> rustc_hash::FxHashSet<CellId> {
        self.cell_ids()
            .filter(|&id| self.cell(id).is_marked())
            .collect()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Young generation state.
    #[inline]
    pub fn nursery(&self) -> &Nursery {
        &self.nursery
    }

    #[inline]
    pub(crate) fn nursery_mut(&mut self) -> &mut Nursery {
        &mut self.nursery
    }

    /// The generational store buffer.
    #[inline]
    pub fn store_buffer(&self) -> &StoreBuffer {
        &self.store_buffer
    }

    #[inline]
    pub(crate) fn store_buffer_mut(&mut self) -> &mut StoreBuffer {
        &mut self.store_buffer
    }

    /// Collector statistics.
    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}

impl std::fmt::Debug for GcHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcHeap")
            .field("live", &self.live)
            .field("zones", &self.zones.len())
            .field("compartments", &self.compartments.len())
            .field("nursery", &self.nursery.len())
            .field("store_buffer", &self.store_buffer.len())
            .finish()
    }
}
