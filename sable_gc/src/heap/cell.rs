//! Cells: the traceable entities stored in the heap.
//!
//! A cell is identified by a [`CellId`] (slot index plus a reuse counter),
//! carries an immutable [`CellKind`], and holds its outgoing references in
//! a small vector of [`Value`] slots. Mark state lives in a [`Cell`] of
//! [`CellFlags`] so that tracers holding a shared `&GcHeap` can mark.
//!
//! [`Cell`]: std::cell::Cell

use crate::heap::zone::{CompartmentId, ZoneId};
use crate::{Generation, MarkColor};
use bitflags::bitflags;
use smallvec::SmallVec;

// =============================================================================
// Identity
// =============================================================================

/// Handle to a heap cell.
///
/// `index` selects the slot in the heap arena; `generation` detects a handle
/// that outlived the cell it named (the slot has since been reused).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl CellId {
    /// Arena slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cell({}/{})", self.index, self.generation)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// Kinds
// =============================================================================

/// The closed set of traceable cell kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Script-visible object.
    Object = 0,
    /// String (flat or rope).
    String = 1,
    /// Symbol.
    Symbol = 2,
    /// Compiled script.
    Script = 3,
    /// Script whose compilation has been deferred.
    LazyScript = 4,
    /// Property layout descriptor.
    Shape = 5,
    /// Shared part of a shape lineage.
    BaseShape = 6,
    /// Machine code produced by the JIT.
    JitCode = 7,
    /// Type inference object group.
    TypeObject = 8,
}

impl CellKind {
    /// Number of cell kinds.
    pub const COUNT: usize = 9;

    /// Every kind, in allocation-bucket order.
    pub const ALL: [CellKind; Self::COUNT] = [
        CellKind::Object,
        CellKind::String,
        CellKind::Symbol,
        CellKind::Script,
        CellKind::LazyScript,
        CellKind::Shape,
        CellKind::BaseShape,
        CellKind::JitCode,
        CellKind::TypeObject,
    ];

    /// Whether cells of this kind may be allocated in the nursery.
    #[inline]
    pub fn is_nursery_allocable(self) -> bool {
        matches!(self, CellKind::Object)
    }

    /// Debug label for the edge stored in slot `index` of a cell of this kind.
    pub fn slot_label(self, index: usize) -> &'static str {
        match self {
            CellKind::Object => "object slot",
            CellKind::String => "string base",
            CellKind::Symbol => "symbol description",
            CellKind::Script => "script object",
            CellKind::LazyScript => "lazy script function",
            CellKind::Shape if index == 0 => "shape base",
            CellKind::Shape => "shape parent",
            CellKind::BaseShape => "base shape owner",
            CellKind::JitCode => "jitcode relocation",
            CellKind::TypeObject => "type proto",
        }
    }
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CellKind::Object => "object",
            CellKind::String => "string",
            CellKind::Symbol => "symbol",
            CellKind::Script => "script",
            CellKind::LazyScript => "lazy script",
            CellKind::Shape => "shape",
            CellKind::BaseShape => "base shape",
            CellKind::JitCode => "jitcode",
            CellKind::TypeObject => "type object",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A slot value: either a primitive or a reference to a cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// `undefined`.
    #[default]
    Undefined,
    /// `null`.
    Null,
    /// Boolean primitive.
    Boolean(bool),
    /// 32-bit integer primitive.
    Int32(i32),
    /// Double primitive.
    Double(f64),
    /// Reference to a heap cell.
    Cell(CellId),
}

impl Value {
    /// The referenced cell, if this value holds one.
    #[inline]
    pub fn as_cell(&self) -> Option<CellId> {
        match *self {
            Value::Cell(id) => Some(id),
            _ => None,
        }
    }

    /// Whether this value refers to a heap cell.
    #[inline]
    pub fn is_cell(&self) -> bool {
        matches!(self, Value::Cell(_))
    }
}

impl From<CellId> for Value {
    #[inline]
    fn from(id: CellId) -> Self {
        Value::Cell(id)
    }
}

impl From<Option<CellId>> for Value {
    #[inline]
    fn from(id: Option<CellId>) -> Self {
        id.map_or(Value::Null, Value::Cell)
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Per-cell collector state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        /// Marked black.
        const MARKED = 0b0000_0001;
        /// Marked gray (reachable only from gray roots so far).
        const GRAY = 0b0000_0010;
        /// Allocated (or tenured) while incremental marking was active.
        const ALLOCATED_DURING_INCREMENTAL = 0b0000_0100;
    }
}

// =============================================================================
// Heap cell
// =============================================================================

/// A cell as stored in the heap arena.
pub struct HeapCell {
    kind: CellKind,
    zone: ZoneId,
    compartment: CompartmentId,
    generation: Generation,
    flags: std::cell::Cell<CellFlags>,
    pub(crate) slots: SmallVec<[Value; 4]>,
}

impl HeapCell {
    pub(crate) fn new(
        kind: CellKind,
        compartment: CompartmentId,
        zone: ZoneId,
        generation: Generation,
        slots: SmallVec<[Value; 4]>,
    ) -> Self {
        Self {
            kind,
            zone,
            compartment,
            generation,
            flags: std::cell::Cell::new(CellFlags::empty()),
            slots,
        }
    }

    /// The cell's kind. Never changes after allocation.
    #[inline]
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Zone the cell belongs to.
    #[inline]
    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Compartment the cell belongs to.
    #[inline]
    pub fn compartment(&self) -> CompartmentId {
        self.compartment
    }

    /// Current generation.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[inline]
    pub(crate) fn set_generation(&mut self, generation: Generation) {
        self.generation = generation;
    }

    /// Whether the cell lives in the nursery.
    #[inline]
    pub fn is_in_nursery(&self) -> bool {
        self.generation.is_young()
    }

    /// Outgoing slots.
    #[inline]
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Current flag bits.
    #[inline]
    pub fn flags(&self) -> CellFlags {
        self.flags.get()
    }

    /// Black or gray.
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags
            .get()
            .intersects(CellFlags::MARKED | CellFlags::GRAY)
    }

    /// Marked gray and not black.
    #[inline]
    pub fn is_gray(&self) -> bool {
        let flags = self.flags.get();
        flags.contains(CellFlags::GRAY) && !flags.contains(CellFlags::MARKED)
    }

    /// Whether the cell came into existence during an incremental window.
    #[inline]
    pub fn allocated_during_incremental(&self) -> bool {
        self.flags
            .get()
            .contains(CellFlags::ALLOCATED_DURING_INCREMENTAL)
    }

    /// Marked, or allocated during the incremental window.
    #[inline]
    pub fn is_marked_or_allocated(&self) -> bool {
        self.is_marked() || self.allocated_during_incremental()
    }

    /// Set the mark bit for `color`. Returns true if the cell was unmarked.
    #[inline]
    pub fn mark(&self, color: MarkColor) -> bool {
        if self.is_marked() {
            return false;
        }
        let bit = match color {
            MarkColor::Black => CellFlags::MARKED,
            MarkColor::Gray => CellFlags::GRAY,
        };
        self.flags.set(self.flags.get() | bit);
        true
    }

    #[inline]
    pub(crate) fn insert_flags(&self, flags: CellFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    #[inline]
    pub(crate) fn remove_flags(&self, flags: CellFlags) {
        self.flags.set(self.flags.get() - flags);
    }
}

impl std::fmt::Debug for HeapCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapCell")
            .field("kind", &self.kind)
            .field("zone", &self.zone)
            .field("generation", &self.generation)
            .field("flags", &self.flags.get())
            .field("slots", &self.slots.len())
            .finish()
    }
}
