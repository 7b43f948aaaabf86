//! Tracer interface for object graph traversal.

use crate::heap::GcHeap;
use crate::heap::cell::CellId;
use crate::trace::{Edge, EdgeLocation, RootCategory, Trace};

/// Visitor invoked once per discovered edge.
///
/// Heap walks and root enumeration report every reference they find as an
/// [`Edge`]; what happens next depends on the tracer:
///
/// - the marking tracer sets the target's mark bit and queues it
/// - the snapshot tracer records the edge in the verifier arena
/// - the checking tracers cancel or look up recorded edges
///
/// # Example
///
/// ```ignore
/// struct Census(usize);
///
/// impl Tracer for Census {
///     fn on_edge(&mut self, _edge: Edge) {
///         self.0 += 1;
///     }
/// }
/// ```
pub trait Tracer {
    /// Visit one edge.
    fn on_edge(&mut self, edge: Edge);

    /// Whether this tracer marks cells.
    ///
    /// Gray roots are never handed to a marking tracer during root
    /// enumeration; gray marking is a separate, later phase.
    #[inline]
    fn is_marking(&self) -> bool {
        false
    }
}

/// Adapter that turns typed root payloads into [`Edge`]s.
///
/// Root enumeration and embedder root callbacks see a `RootTracer` rather
/// than a bare [`Tracer`]: it knows the heap (to label each edge with its
/// target's kind) and which root category is being enumerated.
pub struct RootTracer<'a> {
    heap: &'a GcHeap,
    tracer: &'a mut dyn Tracer,
    category: RootCategory,
}

impl<'a> RootTracer<'a> {
    /// Wrap `tracer` for enumerating roots of `category`.
    pub fn new(heap: &'a GcHeap, tracer: &'a mut dyn Tracer, category: RootCategory) -> Self {
        Self {
            heap,
            tracer,
            category,
        }
    }

    /// Category reported for subsequent edges.
    #[inline]
    pub fn category(&self) -> RootCategory {
        self.category
    }

    /// Switch to another root category.
    #[inline]
    pub fn set_category(&mut self, category: RootCategory) {
        self.category = category;
    }

    /// The heap being traced.
    #[inline]
    pub fn heap(&self) -> &GcHeap {
        self.heap
    }

    /// Whether the underlying tracer marks.
    #[inline]
    pub fn is_marking(&self) -> bool {
        self.tracer.is_marking()
    }

    /// Report a root edge to `target`.
    ///
    /// # Panics
    ///
    /// Panics if `target` names a cell that has been freed: a root holding a
    /// dead cell means the heap is already corrupt.
    pub fn trace_cell(&mut self, target: CellId, name: &'static str) {
        let kind = self.heap.kind_of(target);
        self.tracer.on_edge(Edge {
            location: EdgeLocation::Root(self.category),
            target,
            kind,
            name,
        });
    }

    /// Trace any root payload.
    #[inline]
    pub fn trace<T: Trace + ?Sized>(&mut self, thing: &T, name: &'static str) {
        thing.trace(self, name);
    }
}

/// A tracer that discards every edge.
pub struct NullTracer;

impl Tracer for NullTracer {
    #[inline]
    fn on_edge(&mut self, _edge: Edge) {}
}

/// A counting tracer for debugging and statistics.
#[derive(Debug, Default)]
pub struct CountingTracer {
    /// Edges whose location is a root.
    pub root_edges: usize,
    /// Edges whose location is a heap slot.
    pub heap_edges: usize,
}

impl CountingTracer {
    /// Create a new counting tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of edges traced.
    pub fn total(&self) -> usize {
        self.root_edges + self.heap_edges
    }
}

impl Tracer for CountingTracer {
    fn on_edge(&mut self, edge: Edge) {
        match edge.location {
            EdgeLocation::Root(_) => self.root_edges += 1,
            EdgeLocation::Slot { .. } => self.heap_edges += 1,
        }
    }
}

/// A tracer that keeps every edge it sees, in order.
#[derive(Debug, Default)]
pub struct EdgeCollector {
    /// Edges in discovery order.
    pub edges: Vec<Edge>,
}

impl EdgeCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets in discovery order.
    pub fn targets(&self) -> Vec<CellId> {
        self.edges.iter().map(|e| e.target).collect()
    }

    /// Edges reported for `category`.
    pub fn in_category(&self, category: RootCategory) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(move |e| e.location == EdgeLocation::Root(category))
    }
}

impl Tracer for EdgeCollector {
    fn on_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }
}
