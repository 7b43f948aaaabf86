//! Persistent roots.
//!
//! Process-lifetime roots registered explicitly through a
//! [`PersistentRooted`] handle and unregistered when the handle drops.
//! Roots are kept in one list per [`PersistentKind`]. The registry sits
//! behind a `parking_lot::Mutex`: handles may be created and dropped from
//! any thread, while the root enumerator holds the lock for the whole of
//! its walk so the set cannot change underneath it.

use crate::heap::cell::{CellId, Value};
use crate::roots::stack::PropertyId;
use crate::trace::{RootTracer, Trace};

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Persistent root lists.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistentKind {
    /// Nullable object.
    Object = 0,
    /// Nullable string.
    String,
    /// Nullable script.
    Script,
    /// Nullable function object.
    Function,
    /// Property id; always traced.
    Id,
    /// Value; always traced.
    Value,
}

impl PersistentKind {
    /// Number of persistent kinds.
    pub const COUNT: usize = 6;

    /// Every kind, in enumeration order.
    pub const ALL: [PersistentKind; Self::COUNT] = [
        PersistentKind::Object,
        PersistentKind::String,
        PersistentKind::Script,
        PersistentKind::Function,
        PersistentKind::Id,
        PersistentKind::Value,
    ];
}

/// Payload of one persistent root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PersistentValue {
    /// Object root.
    Object(Option<CellId>),
    /// String root.
    String(Option<CellId>),
    /// Script root.
    Script(Option<CellId>),
    /// Function root.
    Function(Option<CellId>),
    /// Id root.
    Id(PropertyId),
    /// Value root.
    Value(Value),
}

impl PersistentValue {
    /// The list this value belongs on.
    pub fn kind(&self) -> PersistentKind {
        match self {
            PersistentValue::Object(_) => PersistentKind::Object,
            PersistentValue::String(_) => PersistentKind::String,
            PersistentValue::Script(_) => PersistentKind::Script,
            PersistentValue::Function(_) => PersistentKind::Function,
            PersistentValue::Id(_) => PersistentKind::Id,
            PersistentValue::Value(_) => PersistentKind::Value,
        }
    }
}

impl Trace for PersistentValue {
    fn trace(&self, tracer: &mut RootTracer<'_>, _name: &'static str) {
        match self {
            PersistentValue::Object(id) => id.trace(tracer, "persistent-object"),
            PersistentValue::String(id) => id.trace(tracer, "persistent-string"),
            PersistentValue::Script(id) => id.trace(tracer, "persistent-script"),
            PersistentValue::Function(id) => id.trace(tracer, "persistent-function"),
            PersistentValue::Id(id) => id.trace(tracer, "persistent-id"),
            PersistentValue::Value(value) => value.trace(tracer, "persistent-value"),
        }
    }
}

/// One list: a slab of slots plus a free list.
#[derive(Debug, Default)]
struct RootList {
    slots: Vec<Option<PersistentValue>>,
    free: Vec<usize>,
}

impl RootList {
    fn insert(&mut self, value: PersistentValue) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) {
        if self.slots[slot].take().is_some() {
            self.free.push(slot);
        }
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// The persistent root lists, locked.
#[derive(Debug, Default)]
pub struct PersistentRegistry {
    lists: [RootList; PersistentKind::COUNT],
}

impl PersistentRegistry {
    /// Live roots of `kind`, in slot order.
    pub fn iter(&self, kind: PersistentKind) -> impl Iterator<Item = &PersistentValue> {
        self.lists[kind as usize].slots.iter().flatten()
    }

    /// Number of live roots of `kind`.
    pub fn count(&self, kind: PersistentKind) -> usize {
        self.lists[kind as usize].len()
    }
}

/// Shared handle to the persistent root registry.
#[derive(Clone, Debug, Default)]
pub struct PersistentRoots {
    registry: Arc<Mutex<PersistentRegistry>>,
}

impl PersistentRoots {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` until the returned handle is dropped.
    pub fn add(&self, value: PersistentValue) -> PersistentRooted {
        let kind = value.kind();
        let slot = self.registry.lock().lists[kind as usize].insert(value);
        PersistentRooted {
            registry: Arc::clone(&self.registry),
            kind,
            slot,
        }
    }

    /// Lock the registry for enumeration.
    pub fn lock(&self) -> MutexGuard<'_, PersistentRegistry> {
        self.registry.lock()
    }

    /// Total number of live persistent roots.
    pub fn len(&self) -> usize {
        let registry = self.registry.lock();
        registry.lists.iter().map(RootList::len).sum()
    }

    /// Whether no persistent roots are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one persistent root. Unregisters on drop.
pub struct PersistentRooted {
    registry: Arc<Mutex<PersistentRegistry>>,
    kind: PersistentKind,
    slot: usize,
}

impl PersistentRooted {
    /// Current value.
    pub fn get(&self) -> PersistentValue {
        let registry = self.registry.lock();
        match registry.lists[self.kind as usize].slots[self.slot] {
            Some(value) => value,
            None => unreachable!("persistent root slot vacated while its handle is alive"),
        }
    }

    /// Replace the value.
    ///
    /// # Panics
    ///
    /// Panics if `value` belongs to a different list.
    pub fn set(&self, value: PersistentValue) {
        assert_eq!(value.kind(), self.kind, "persistent root kind mismatch");
        self.registry.lock().lists[self.kind as usize].slots[self.slot] = Some(value);
    }

    /// Which list the handle is registered on.
    pub fn kind(&self) -> PersistentKind {
        self.kind
    }
}

impl Drop for PersistentRooted {
    fn drop(&mut self) {
        self.registry.lock().lists[self.kind as usize].remove(self.slot);
    }
}

impl std::fmt::Debug for PersistentRooted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentRooted")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .finish()
    }
}
