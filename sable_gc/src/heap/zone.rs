//! Zones and compartments.
//!
//! A zone is the unit of collection: a GC may mark and sweep a subset of
//! zones while leaving the rest untouched. Each compartment belongs to one
//! zone and owns the per-compartment tables that act as roots while its
//! zone is being collected.

use crate::heap::cell::CellId;
use rustc_hash::FxHashMap;

/// Zone identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub(crate) u32);

/// Compartment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompartmentId(pub(crate) u32);

/// Cross-compartment wrapper map: wrapped target → wrapper object.
pub type WrapperMap = FxHashMap<CellId, CellId>;

/// Per-zone collector state.
#[derive(Debug, Default)]
pub struct Zone {
    needs_barrier: bool,
    collecting: bool,
}

impl Zone {
    /// Whether pre-write barriers are active for cells in this zone.
    #[inline]
    pub fn needs_barrier(&self) -> bool {
        self.needs_barrier
    }

    #[inline]
    pub(crate) fn set_needs_barrier(&mut self, needs_barrier: bool) {
        self.needs_barrier = needs_barrier;
    }

    /// Whether this zone participates in the current collection.
    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    #[inline]
    pub(crate) fn set_collecting(&mut self, collecting: bool) {
        self.collecting = collecting;
    }
}

/// Per-compartment root tables.
///
/// Minor GC does not scan these tables, so cells stored in them must be
/// tenured (see [`GcHeap::allocate_tenured`](crate::GcHeap::allocate_tenured)).
#[derive(Debug)]
pub struct Compartment {
    zone: ZoneId,
    /// Global object, once created.
    pub global: Option<CellId>,
    /// Wrappers for cells in other compartments.
    pub wrappers: WrapperMap,
    /// Debugger scope map, created when a debugger attaches.
    pub debug_scopes: Option<FxHashMap<CellId, CellId>>,
    /// Allocation-metadata objects, created when metadata tracking is on.
    pub object_metadata: Option<Vec<CellId>>,
    /// Lazily created JIT stub table.
    pub jit_stubs: Option<Vec<CellId>>,
}

impl Compartment {
    pub(crate) fn new(zone: ZoneId) -> Self {
        Self {
            zone,
            global: None,
            wrappers: WrapperMap::default(),
            debug_scopes: None,
            object_metadata: None,
            jit_stubs: None,
        }
    }

    /// Zone this compartment belongs to.
    #[inline]
    pub fn zone(&self) -> ZoneId {
        self.zone
    }
}
