//! Stack-declared exact roots.
//!
//! Code that holds cells across a possible GC declares them in a
//! [`Rooted`] guard. Each guard claims a slot on a per-kind list of the
//! owning [`StackRoots`] registry and vacates exactly that slot when
//! dropped. Guards may be dropped in any order.
//!
//! # Example
//!
//! ```ignore
//! let roots = runtime.main_thread_roots();
//! {
//!     let obj = roots.root(StackRoot::Object(TaggedObject::Cell(id)));
//!     runtime.collect(GcScope::All);
//!     // `id` survived: it was reachable from `obj`.
//! } // guard dropped, `id` is no longer a root
//! ```

use crate::heap::cell::{CellId, Value};
use crate::trace::{RootTracer, Trace};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Per-kind stack root lists, one per shape of root.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    /// Object pointer (may hold the lazy-proto sentinel).
    Object = 0,
    /// String pointer.
    String,
    /// Script pointer.
    Script,
    /// Shape pointer.
    Shape,
    /// Symbol pointer.
    Symbol,
    /// JIT code pointer.
    JitCode,
    /// Property id.
    Id,
    /// Arbitrary value.
    Value,
    /// Binding layout (shape plus names).
    Bindings,
    /// Property descriptor (holder, accessors, value).
    PropertyDescriptor,
    /// Vector of values.
    ValueVector,
}

impl RootKind {
    /// Number of root kinds.
    pub const COUNT: usize = 11;

    /// Every kind, in enumeration order.
    pub const ALL: [RootKind; Self::COUNT] = [
        RootKind::Object,
        RootKind::String,
        RootKind::Script,
        RootKind::Shape,
        RootKind::Symbol,
        RootKind::JitCode,
        RootKind::Id,
        RootKind::Value,
        RootKind::Bindings,
        RootKind::PropertyDescriptor,
        RootKind::ValueVector,
    ];
}

// =============================================================================
// Root payloads
// =============================================================================

/// An object pointer that may also be null or the lazy-prototype sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaggedObject {
    /// Declared but never assigned.
    #[default]
    Null,
    /// Prototype not yet materialised.
    LazyProto,
    /// A real object.
    Cell(CellId),
}

/// A property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyId {
    /// Integer index; holds no cell.
    Int(i32),
    /// Interned string key.
    Atom(CellId),
    /// Symbol key.
    Symbol(CellId),
    /// The empty id.
    Void,
}

impl Trace for PropertyId {
    fn trace(&self, tracer: &mut RootTracer<'_>, name: &'static str) {
        match *self {
            PropertyId::Atom(id) | PropertyId::Symbol(id) => tracer.trace_cell(id, name),
            PropertyId::Int(_) | PropertyId::Void => {}
        }
    }
}

/// Binding layout of a function scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    /// Shape of the call object, once created.
    pub call_object_shape: Option<CellId>,
    /// Binding names (atoms).
    pub names: Vec<CellId>,
}

impl Trace for Bindings {
    fn trace(&self, tracer: &mut RootTracer<'_>, _name: &'static str) {
        self.call_object_shape.trace(tracer, "bindings call object shape");
        self.names.trace(tracer, "bindings name");
    }
}

/// A property descriptor held across a GC.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropertyDescriptor {
    /// Object the property was found on.
    pub object: Option<CellId>,
    /// Getter function.
    pub getter: Option<CellId>,
    /// Setter function.
    pub setter: Option<CellId>,
    /// Data value.
    pub value: Value,
}

impl Trace for PropertyDescriptor {
    fn trace(&self, tracer: &mut RootTracer<'_>, _name: &'static str) {
        self.object.trace(tracer, "descriptor object");
        self.getter.trace(tracer, "descriptor getter");
        self.setter.trace(tracer, "descriptor setter");
        self.value.trace(tracer, "descriptor value");
    }
}

/// One stack-declared root.
#[derive(Debug, Clone, PartialEq)]
pub enum StackRoot {
    /// Object root.
    Object(TaggedObject),
    /// String root.
    String(Option<CellId>),
    /// Script root.
    Script(Option<CellId>),
    /// Shape root.
    Shape(Option<CellId>),
    /// Symbol root.
    Symbol(Option<CellId>),
    /// JIT code root.
    JitCode(Option<CellId>),
    /// Property id root.
    Id(PropertyId),
    /// Value root.
    Value(Value),
    /// Bindings root.
    Bindings(Bindings),
    /// Property descriptor root.
    PropertyDescriptor(PropertyDescriptor),
    /// Value vector root.
    ValueVector(Vec<Value>),
}

impl StackRoot {
    /// The list this root is registered on.
    pub fn kind(&self) -> RootKind {
        match self {
            StackRoot::Object(_) => RootKind::Object,
            StackRoot::String(_) => RootKind::String,
            StackRoot::Script(_) => RootKind::Script,
            StackRoot::Shape(_) => RootKind::Shape,
            StackRoot::Symbol(_) => RootKind::Symbol,
            StackRoot::JitCode(_) => RootKind::JitCode,
            StackRoot::Id(_) => RootKind::Id,
            StackRoot::Value(_) => RootKind::Value,
            StackRoot::Bindings(_) => RootKind::Bindings,
            StackRoot::PropertyDescriptor(_) => RootKind::PropertyDescriptor,
            StackRoot::ValueVector(_) => RootKind::ValueVector,
        }
    }
}

impl Trace for StackRoot {
    fn trace(&self, tracer: &mut RootTracer<'_>, _name: &'static str) {
        match self {
            StackRoot::Object(TaggedObject::Cell(id)) => tracer.trace_cell(*id, "exact-object"),
            StackRoot::Object(TaggedObject::Null | TaggedObject::LazyProto) => {}
            StackRoot::String(id) => id.trace(tracer, "exact-string"),
            StackRoot::Script(id) => id.trace(tracer, "exact-script"),
            StackRoot::Shape(id) => id.trace(tracer, "exact-shape"),
            StackRoot::Symbol(id) => id.trace(tracer, "exact-symbol"),
            StackRoot::JitCode(id) => id.trace(tracer, "exact-jitcode"),
            StackRoot::Id(id) => id.trace(tracer, "exact-id"),
            StackRoot::Value(value) => value.trace(tracer, "exact-value"),
            StackRoot::Bindings(bindings) => bindings.trace(tracer, "exact-bindings"),
            StackRoot::PropertyDescriptor(desc) => desc.trace(tracer, "exact-descriptor"),
            StackRoot::ValueVector(values) => values.trace(tracer, "exact-value-vector"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// One list: a slab of slots plus a free list.
///
/// Vacated slots at the tail are popped, so strictly nested guards keep the
/// list dense.
#[derive(Debug, Default)]
struct RootList {
    slots: Vec<Option<StackRoot>>,
    free: Vec<usize>,
}

impl RootList {
    fn insert(&mut self, root: StackRoot) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(root);
                slot
            }
            None => {
                self.slots.push(Some(root));
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) {
        if self.slots[slot].take().is_none() {
            return;
        }
        if slot + 1 == self.slots.len() {
            while matches!(self.slots.last(), Some(None)) {
                self.slots.pop();
            }
            let len = self.slots.len();
            self.free.retain(|&free| free < len);
        } else {
            self.free.push(slot);
        }
    }

    fn get(&self, slot: usize) -> &StackRoot {
        match &self.slots[slot] {
            Some(root) => root,
            None => unreachable!("stack root slot vacated while its guard is alive"),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &StackRoot> {
        self.slots.iter().flatten()
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

type RootLists = [RefCell<RootList>; RootKind::COUNT];

/// Per-thread (or per-context) registry of stack roots.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct StackRoots {
    lists: Rc<RootLists>,
}

impl StackRoots {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `root` for the lifetime of the returned guard.
    pub fn root(&self, root: StackRoot) -> Rooted {
        let kind = root.kind();
        let slot = self.lists[kind as usize].borrow_mut().insert(root);
        Rooted {
            lists: Rc::clone(&self.lists),
            kind,
            slot,
        }
    }

    /// Shorthand for rooting an object.
    pub fn root_object(&self, id: CellId) -> Rooted {
        self.root(StackRoot::Object(TaggedObject::Cell(id)))
    }

    /// Shorthand for rooting a value.
    pub fn root_value(&self, value: Value) -> Rooted {
        self.root(StackRoot::Value(value))
    }

    /// Number of live roots of `kind`.
    pub fn count(&self, kind: RootKind) -> usize {
        self.lists[kind as usize].borrow().len()
    }

    /// Total number of live roots.
    pub fn len(&self) -> usize {
        self.lists.iter().map(|l| l.borrow().len()).sum()
    }

    /// Whether no roots are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on each root, list by list in [`RootKind::ALL`] order and
    /// by slot within a list.
    pub fn for_each(&self, mut f: impl FnMut(&StackRoot)) {
        for list in self.lists.iter() {
            for root in list.borrow().iter() {
                f(root);
            }
        }
    }

    /// Copy every root, in enumeration order.
    pub fn snapshot(&self) -> Vec<StackRoot> {
        let mut roots = Vec::with_capacity(self.len());
        self.for_each(|root| roots.push(root.clone()));
        roots
    }
}

impl std::fmt::Debug for StackRoots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackRoots").field("len", &self.len()).finish()
    }
}

/// Scoped registration of one stack root. Unregisters its own slot on drop.
pub struct Rooted {
    lists: Rc<RootLists>,
    kind: RootKind,
    slot: usize,
}

impl Rooted {
    /// Current value.
    pub fn get(&self) -> StackRoot {
        self.lists[self.kind as usize].borrow().get(self.slot).clone()
    }

    /// The object held by an object root.
    pub fn object(&self) -> Option<CellId> {
        match self.lists[self.kind as usize].borrow().get(self.slot) {
            StackRoot::Object(TaggedObject::Cell(id)) => Some(*id),
            _ => None,
        }
    }

    /// Replace the value.
    ///
    /// # Panics
    ///
    /// Panics if `root` is of a different kind than the guard was created
    /// with.
    pub fn set(&self, root: StackRoot) {
        assert_eq!(root.kind(), self.kind, "stack root kind mismatch");
        self.lists[self.kind as usize].borrow_mut().slots[self.slot] = Some(root);
    }

    /// Which list the guard is registered on.
    pub fn kind(&self) -> RootKind {
        self.kind
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        self.lists[self.kind as usize].borrow_mut().remove(self.slot);
    }
}

impl std::fmt::Debug for Rooted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Rooted").field(&self.get()).finish()
    }
}

// =============================================================================
// Execution contexts
// =============================================================================

/// An execution context sharing the runtime, with its own stack roots.
#[derive(Debug)]
pub struct ExecutionContext {
    roots: StackRoots,
    alive: Cell<bool>,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self {
            roots: StackRoots::new(),
            alive: Cell::new(true),
        }
    }

    /// The context's stack roots.
    pub fn roots(&self) -> &StackRoots {
        &self.roots
    }

    /// Whether the context is still running.
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Mark the context as finished; its roots are no longer enumerated.
    pub fn destroy(&self) {
        self.alive.set(false);
    }
}
