//! Edges and the tracing interface.
//!
//! Everything the collector learns about the object graph arrives as an
//! [`Edge`]: heap walks report one edge per cell-valued slot, root
//! enumeration reports one edge per non-null root. Tracers decide what to do
//! with them (see [`Tracer`]).
//!
//! Root payloads (stack roots, persistent roots, embedder tables) implement
//! [`Trace`] so that composite roots can expose several sub-edges.

pub mod tracer;

pub use tracer::{CountingTracer, EdgeCollector, NullTracer, RootTracer, Tracer};

use crate::heap::cell::{CellId, CellKind, Value};

// =============================================================================
// Edges
// =============================================================================

/// Which class of root an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootCategory {
    /// Cross-compartment wrapper map entry.
    CrossCompartmentWrapper,
    /// Stack-declared exact root.
    ExactStack,
    /// Persistent (process-lifetime) root.
    Persistent,
    /// Named runtime-wide singleton slot.
    RuntimeSingleton,
    /// Compartment-local table.
    Compartment,
    /// Embedder black-root callback.
    BlackRootCallback,
    /// Embedder gray-root callback.
    GrayRootCallback,
}

impl std::fmt::Display for RootCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RootCategory::CrossCompartmentWrapper => "cross-compartment wrapper",
            RootCategory::ExactStack => "exact stack root",
            RootCategory::Persistent => "persistent root",
            RootCategory::RuntimeSingleton => "runtime singleton",
            RootCategory::Compartment => "compartment root",
            RootCategory::BlackRootCallback => "black root callback",
            RootCategory::GrayRootCallback => "gray root callback",
        };
        f.write_str(name)
    }
}

/// Where an edge is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeLocation {
    /// Slot `index` of cell `holder`.
    Slot {
        /// Cell owning the slot.
        holder: CellId,
        /// Slot index.
        index: u32,
    },
    /// A root slot.
    Root(RootCategory),
}

impl EdgeLocation {
    /// Holder cell for heap slots.
    #[inline]
    pub fn holder(&self) -> Option<CellId> {
        match *self {
            EdgeLocation::Slot { holder, .. } => Some(holder),
            EdgeLocation::Root(_) => None,
        }
    }
}

impl std::fmt::Display for EdgeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeLocation::Slot { holder, index } => write!(f, "{holder}[{index}]"),
            EdgeLocation::Root(category) => write!(f, "<{category}>"),
        }
    }
}

/// A directed reference discovered during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Where the reference is stored.
    pub location: EdgeLocation,
    /// Referenced cell.
    pub target: CellId,
    /// Kind of the referenced cell.
    pub kind: CellKind,
    /// Debug label.
    pub name: &'static str,
}

// =============================================================================
// Trace
// =============================================================================

/// Root payloads that can report their edges.
///
/// Implementations report every cell they hold and skip anything that is
/// not a real edge (null pointers, primitives, sentinels).
///
/// # Example
///
/// ```ignore
/// struct Pair {
///     first: Option<CellId>,
///     second: Value,
/// }
///
/// impl Trace for Pair {
///     fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
///         self.first.trace(tracer, name);
///         self.second.trace(tracer, name);
///     }
/// }
/// ```
pub trait Trace {
    /// Report the edges held by `self`, labelled `name`.
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str);
}

impl Trace for CellId {
    #[inline]
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        tracer.trace_cell(*self, name);
    }
}

impl Trace for Value {
    #[inline]
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        if let Value::Cell(id) = *self {
            tracer.trace_cell(id, name);
        }
    }
}

impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        if let Some(inner) = self {
            inner.trace(tracer, name);
        }
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        for item in self {
            item.trace(tracer, name);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        self.as_slice().trace(tracer, name);
    }
}

impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        (**self).trace(tracer, name);
    }
}
