//! Root registries and root enumeration.
//!
//! GC roots are the starting points for tracing:
//! - Cross-compartment wrapper maps (mark mode only)
//! - Stack-declared exact roots, per execution context
//! - Persistent roots
//! - Runtime-wide singleton slots
//! - Compartment-local tables
//! - Embedder black and gray root callbacks
//!
//! [`RootEnumerator`] walks them in that order and feeds every edge to a
//! [`Tracer`].

mod persistent;
mod stack;

pub use persistent::{
    PersistentKind, PersistentRegistry, PersistentRooted, PersistentRoots, PersistentValue,
};
pub use stack::{
    Bindings, ExecutionContext, PropertyDescriptor, PropertyId, RootKind, Rooted, StackRoot,
    StackRoots, TaggedObject,
};

use crate::heap::GcHeap;
use crate::heap::cell::CellId;
use crate::trace::{RootCategory, RootTracer, Trace, Tracer};

use std::cell::RefCell;
use std::rc::Rc;

/// Callback that reports embedder-held roots.
pub type RootTraceCallback = Box<dyn Fn(&mut RootTracer<'_>)>;

/// Whether an enumeration is a pure heap trace or part of marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOrMark {
    /// Full trace (heap dumps, verifier snapshots, minor GC).
    Trace,
    /// Marking for a major collection.
    Mark,
}

/// Where exact stack roots come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootsSource {
    /// Read the live registries. In mark mode the roots read are also saved.
    TraceRoots,
    /// Replay the roots saved by the last mark-mode enumeration, falling
    /// back to the live registries if none were saved.
    UseSavedRoots,
}

/// Named runtime-wide root slots.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSingletons {
    /// Saved async stack of the current activation.
    pub async_stack: Option<CellId>,
    /// Global of the self-hosting compartment.
    pub self_hosting_global: Option<CellId>,
    /// Scripts kept alive for execution-count profiling.
    pub script_counts: Vec<CellId>,
}

/// Every root registry owned by a runtime.
pub struct RuntimeRoots {
    main_thread: StackRoots,
    contexts: Vec<Rc<ExecutionContext>>,
    persistent: PersistentRoots,
    /// Runtime singleton slots.
    pub singletons: RuntimeSingletons,
    black_tracers: Vec<(u64, RootTraceCallback)>,
    next_tracer_id: u64,
    gray_tracer: Option<RootTraceCallback>,
    saved_stack_roots: RefCell<Option<Vec<StackRoot>>>,
}

impl RuntimeRoots {
    /// Create empty registries.
    pub fn new() -> Self {
        Self {
            main_thread: StackRoots::new(),
            contexts: Vec::new(),
            persistent: PersistentRoots::new(),
            singletons: RuntimeSingletons::default(),
            black_tracers: Vec::new(),
            next_tracer_id: 0,
            gray_tracer: None,
            saved_stack_roots: RefCell::new(None),
        }
    }

    /// Stack roots of the main thread.
    pub fn main_thread(&self) -> &StackRoots {
        &self.main_thread
    }

    /// Create an execution context with its own stack roots.
    pub fn new_context(&mut self) -> Rc<ExecutionContext> {
        let cx = Rc::new(ExecutionContext::new());
        self.contexts.push(Rc::clone(&cx));
        cx
    }

    /// Forget destroyed contexts.
    pub fn prune_contexts(&mut self) {
        self.contexts.retain(|cx| cx.is_alive());
    }

    /// The persistent root registry.
    pub fn persistent(&self) -> &PersistentRoots {
        &self.persistent
    }

    /// Register an embedder black-root callback. Returns an id for removal.
    pub fn add_black_root_tracer(&mut self, callback: RootTraceCallback) -> u64 {
        let id = self.next_tracer_id;
        self.next_tracer_id += 1;
        self.black_tracers.push((id, callback));
        id
    }

    /// Remove a black-root callback. Returns whether it was registered.
    pub fn remove_black_root_tracer(&mut self, id: u64) -> bool {
        let before = self.black_tracers.len();
        self.black_tracers.retain(|(tracer_id, _)| *tracer_id != id);
        self.black_tracers.len() != before
    }

    /// Install (or clear) the single gray-root callback.
    pub fn set_gray_root_tracer(&mut self, callback: Option<RootTraceCallback>) {
        self.gray_tracer = callback;
    }

    /// Whether a gray-root callback is installed.
    pub fn has_gray_root_tracer(&self) -> bool {
        self.gray_tracer.is_some()
    }

    pub(crate) fn gray_tracer(&self) -> Option<&RootTraceCallback> {
        self.gray_tracer.as_ref()
    }

    /// Whether a stack-root snapshot has been saved.
    pub fn has_saved_roots(&self) -> bool {
        self.saved_stack_roots.borrow().is_some()
    }

    /// Drop the saved stack-root snapshot.
    pub fn clear_saved_roots(&self) {
        self.saved_stack_roots.borrow_mut().take();
    }

    fn live_stacks(&self) -> impl Iterator<Item = &StackRoots> {
        self.contexts
            .iter()
            .filter(|cx| cx.is_alive())
            .map(|cx| cx.roots())
            .chain(std::iter::once(&self.main_thread))
    }
}

impl Default for RuntimeRoots {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeRoots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRoots")
            .field("main_thread", &self.main_thread)
            .field("contexts", &self.contexts.len())
            .field("persistent", &self.persistent.len())
            .field("black_tracers", &self.black_tracers.len())
            .field("gray_tracer", &self.gray_tracer.is_some())
            .finish()
    }
}

// =============================================================================
// Enumeration
// =============================================================================

/// One root enumeration pass.
pub struct RootEnumerator<'a> {
    heap: &'a GcHeap,
    roots: &'a RuntimeRoots,
    mode: TraceOrMark,
    source: RootsSource,
    minor: bool,
}

impl<'a> RootEnumerator<'a> {
    /// Enumerator for a major-GC or full-trace pass.
    pub fn new(
        heap: &'a GcHeap,
        roots: &'a RuntimeRoots,
        mode: TraceOrMark,
        source: RootsSource,
    ) -> Self {
        Self {
            heap,
            roots,
            mode,
            source,
            minor: false,
        }
    }

    /// Enumerator for a minor GC: trace mode, nursery-relevant roots only.
    pub fn minor(heap: &'a GcHeap, roots: &'a RuntimeRoots) -> Self {
        Self {
            heap,
            roots,
            mode: TraceOrMark::Trace,
            source: RootsSource::TraceRoots,
            minor: true,
        }
    }

    /// Enumerate every root category, in order.
    pub fn enumerate(&self, tracer: &mut dyn Tracer) {
        log::trace!(
            "enumerating roots (mode {:?}, source {:?}, minor {})",
            self.mode,
            self.source,
            self.minor
        );
        self.mark_cross_compartment_wrappers(tracer);
        self.mark_exact_stack_roots(tracer);
        self.mark_persistent_rooted_chains(tracer);
        self.mark_runtime_singletons(tracer);
        self.mark_compartment_roots(tracer);
        self.mark_embedder_roots(tracer);
    }

    /// Step 1: in mark mode, the targets of wrappers held by compartments
    /// whose zone is not being collected. A marking tracer ignores targets
    /// outside the collecting zones.
    pub fn mark_cross_compartment_wrappers(&self, tracer: &mut dyn Tracer) {
        if self.mode != TraceOrMark::Mark {
            return;
        }
        self.wrapper_targets(tracer, true);
    }

    /// The target of every wrapper in every compartment, whatever the mode
    /// and whichever zones are collecting.
    pub fn trace_wrapper_targets(&self, tracer: &mut dyn Tracer) {
        self.wrapper_targets(tracer, false);
    }

    fn wrapper_targets(&self, tracer: &mut dyn Tracer, skip_collecting: bool) {
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::CrossCompartmentWrapper);
        for (_, compartment) in self.heap.compartments() {
            if skip_collecting && self.heap.is_zone_collecting(compartment.zone()) {
                continue;
            }
            for &target in compartment.wrappers.keys() {
                if self.heap.is_live(target) {
                    trc.trace_cell(target, "cross-compartment wrapper");
                }
            }
        }
    }

    /// Step 2: every stack root of every live context and the main thread.
    ///
    /// Null roots and the lazy-prototype sentinel are skipped.
    pub fn mark_exact_stack_roots(&self, tracer: &mut dyn Tracer) {
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::ExactStack);

        if self.source == RootsSource::UseSavedRoots {
            if let Some(saved) = self.roots.saved_stack_roots.borrow().as_ref() {
                saved.trace(&mut trc, "saved");
                return;
            }
            log::warn!("no saved stack roots; reading live registries");
        }

        let save = self.mode == TraceOrMark::Mark && self.source == RootsSource::TraceRoots;
        let mut saved = Vec::new();
        for stack in self.roots.live_stacks() {
            stack.for_each(|root| {
                root.trace(&mut trc, "exact");
                if save {
                    saved.push(root.clone());
                }
            });
        }
        if save {
            *self.roots.saved_stack_roots.borrow_mut() = Some(saved);
        }
    }

    /// Step 3: persistent roots, kind by kind, under the registry lock.
    pub fn mark_persistent_rooted_chains(&self, tracer: &mut dyn Tracer) {
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::Persistent);
        let registry = self.roots.persistent.lock();
        for kind in PersistentKind::ALL {
            for value in registry.iter(kind) {
                value.trace(&mut trc, "persistent");
            }
        }
    }

    /// Step 4: named runtime singletons. Only the async stack is relevant
    /// to a minor GC.
    pub fn mark_runtime_singletons(&self, tracer: &mut dyn Tracer) {
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::RuntimeSingleton);
        let singletons = &self.roots.singletons;
        singletons.async_stack.trace(&mut trc, "asyncStackForNewActivations");
        if self.minor {
            return;
        }
        singletons
            .self_hosting_global
            .trace(&mut trc, "self-hosting global");
        singletons.script_counts.trace(&mut trc, "scriptAndCountsVector");
    }

    /// Step 5: compartment tables. A marking tracer only sees compartments
    /// whose zone is being collected. Skipped in a minor GC.
    pub fn mark_compartment_roots(&self, tracer: &mut dyn Tracer) {
        if self.minor {
            return;
        }
        let restrict = tracer.is_marking();
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::Compartment);
        for (_, compartment) in self.heap.compartments() {
            if restrict && !self.heap.is_zone_collecting(compartment.zone()) {
                continue;
            }
            compartment.global.trace(&mut trc, "compartment global");
            if let Some(scopes) = &compartment.debug_scopes {
                for (&key, &scope) in scopes {
                    trc.trace_cell(key, "debug scope key");
                    trc.trace_cell(scope, "debug scope");
                }
            }
            if let Some(metadata) = &compartment.object_metadata {
                metadata.trace(&mut trc, "object metadata");
            }
            if let Some(stubs) = &compartment.jit_stubs {
                stubs.trace(&mut trc, "jit stub");
            }
        }
    }

    /// Step 6: embedder callbacks. Black roots always; gray roots only in a
    /// full trace, never for a marking tracer.
    pub fn mark_embedder_roots(&self, tracer: &mut dyn Tracer) {
        let run_gray = !self.minor && self.mode == TraceOrMark::Trace && !tracer.is_marking();
        let mut trc = RootTracer::new(self.heap, tracer, RootCategory::BlackRootCallback);
        for (_, callback) in &self.roots.black_tracers {
            callback(&mut trc);
        }
        if run_gray {
            if let Some(callback) = &self.roots.gray_tracer {
                trc.set_category(RootCategory::GrayRootCallback);
                callback(&mut trc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GcConfig;
    use crate::heap::CompartmentId;
    use crate::heap::cell::{CellKind, Value};
    use crate::trace::EdgeCollector;

    fn setup() -> (GcHeap, CompartmentId, RuntimeRoots) {
        let mut heap = GcHeap::new(&GcConfig::default());
        let (_, c) = heap.new_zone_with_compartment();
        (heap, c, RuntimeRoots::new())
    }

    fn collect(heap: &GcHeap, roots: &RuntimeRoots, mode: TraceOrMark) -> EdgeCollector {
        let mut collector = EdgeCollector::new();
        RootEnumerator::new(heap, roots, mode, RootsSource::TraceRoots).enumerate(&mut collector);
        collector
    }

    #[test]
    fn test_null_and_lazy_proto_roots_are_skipped() {
        let (mut heap, c, roots) = setup();
        let obj = heap.allocate_tenured(CellKind::Object, c, 0);
        let _null = roots.main_thread().root(StackRoot::Object(TaggedObject::Null));
        let _lazy = roots
            .main_thread()
            .root(StackRoot::Object(TaggedObject::LazyProto));
        let _none = roots.main_thread().root(StackRoot::String(None));
        let _real = roots.main_thread().root_object(obj);

        let edges = collect(&heap, &roots, TraceOrMark::Trace);
        assert_eq!(edges.targets(), vec![obj]);
    }

    #[test]
    fn test_composite_roots_expose_sub_edges() {
        let (mut heap, c, roots) = setup();
        let holder = heap.allocate_tenured(CellKind::Object, c, 0);
        let getter = heap.allocate_tenured(CellKind::Object, c, 0);
        let value = heap.allocate_tenured(CellKind::String, c, 0);
        let _desc = roots
            .main_thread()
            .root(StackRoot::PropertyDescriptor(PropertyDescriptor {
                object: Some(holder),
                getter: Some(getter),
                setter: None,
                value: Value::Cell(value),
            }));

        let edges = collect(&heap, &roots, TraceOrMark::Trace);
        assert_eq!(edges.targets(), vec![holder, getter, value]);
        assert_eq!(edges.edges[2].name, "descriptor value");
    }

    #[test]
    fn test_dead_contexts_are_skipped() {
        let (mut heap, c, mut roots) = setup();
        let obj = heap.allocate_tenured(CellKind::Object, c, 0);
        let cx = roots.new_context();
        let _guard = cx.roots().root_object(obj);
        assert_eq!(collect(&heap, &roots, TraceOrMark::Trace).edges.len(), 1);

        cx.destroy();
        assert!(collect(&heap, &roots, TraceOrMark::Trace).edges.is_empty());
    }

    #[test]
    fn test_persistent_nullable_kinds_skip_null() {
        let (mut heap, c, roots) = setup();
        let script = heap.allocate_tenured(CellKind::Script, c, 0);
        let _a = roots.persistent().add(PersistentValue::Object(None));
        let _b = roots.persistent().add(PersistentValue::Script(Some(script)));
        let _c = roots.persistent().add(PersistentValue::Value(Value::Int32(1)));

        let edges = collect(&heap, &roots, TraceOrMark::Trace);
        assert_eq!(edges.targets(), vec![script]);
        assert_eq!(edges.edges[0].name, "persistent-script");
    }

    #[test]
    fn test_wrappers_are_roots_only_in_mark_mode() {
        let mut heap = GcHeap::new(&GcConfig::default());
        let (collected_zone, collected) = heap.new_zone_with_compartment();
        let (_, other) = heap.new_zone_with_compartment();
        let target = heap.allocate_tenured(CellKind::Object, collected, 0);
        let wrapper = heap.allocate_tenured(CellKind::Object, other, 1);
        heap.compartment_mut(other).wrappers.insert(target, wrapper);
        heap.zone_mut(collected_zone).set_collecting(true);
        let roots = RuntimeRoots::new();

        let traced = collect(&heap, &roots, TraceOrMark::Trace);
        assert!(traced.in_category(RootCategory::CrossCompartmentWrapper).next().is_none());

        let marked = collect(&heap, &roots, TraceOrMark::Mark);
        let wrappers: Vec<_> = marked
            .in_category(RootCategory::CrossCompartmentWrapper)
            .map(|e| e.target)
            .collect();
        assert_eq!(wrappers, vec![target]);
    }

    #[test]
    fn test_minor_skips_non_nursery_singletons_and_compartments() {
        let (mut heap, c, mut roots) = setup();
        let stack = heap.allocate_tenured(CellKind::Object, c, 0);
        let global = heap.allocate_tenured(CellKind::Object, c, 0);
        let counts = heap.allocate_tenured(CellKind::Script, c, 0);
        roots.singletons.async_stack = Some(stack);
        roots.singletons.self_hosting_global = Some(global);
        roots.singletons.script_counts.push(counts);
        heap.compartment_mut(c).global = Some(global);

        let mut collector = EdgeCollector::new();
        RootEnumerator::minor(&heap, &roots).enumerate(&mut collector);
        assert_eq!(collector.targets(), vec![stack]);

        let full = collect(&heap, &roots, TraceOrMark::Trace);
        assert_eq!(full.targets(), vec![stack, global, counts, global]);
    }

    #[test]
    fn test_gray_callback_only_for_full_trace() {
        let (mut heap, c, mut roots) = setup();
        let black = heap.allocate_tenured(CellKind::Object, c, 0);
        let gray = heap.allocate_tenured(CellKind::Object, c, 0);
        roots.add_black_root_tracer(Box::new(move |trc: &mut RootTracer<'_>| {
            trc.trace_cell(black, "black")
        }));
        roots.set_gray_root_tracer(Some(Box::new(move |trc: &mut RootTracer<'_>| {
            trc.trace_cell(gray, "gray")
        })));

        assert_eq!(
            collect(&heap, &roots, TraceOrMark::Trace).targets(),
            vec![black, gray]
        );
        assert_eq!(
            collect(&heap, &roots, TraceOrMark::Mark).targets(),
            vec![black]
        );

        let mut minor = EdgeCollector::new();
        RootEnumerator::minor(&heap, &roots).enumerate(&mut minor);
        assert_eq!(minor.targets(), vec![black]);
    }

    #[test]
    fn test_remove_black_root_tracer() {
        let (mut heap, c, mut roots) = setup();
        let obj = heap.allocate_tenured(CellKind::Object, c, 0);
        let id = roots.add_black_root_tracer(Box::new(move |trc: &mut RootTracer<'_>| {
            trc.trace_cell(obj, "obj")
        }));
        assert!(roots.remove_black_root_tracer(id));
        assert!(!roots.remove_black_root_tracer(id));
        assert!(collect(&heap, &roots, TraceOrMark::Trace).edges.is_empty());
    }

    #[test]
    fn test_saved_roots_replay() {
        let (mut heap, c, roots) = setup();
        let first = heap.allocate_tenured(CellKind::Object, c, 0);
        let second = heap.allocate_tenured(CellKind::Object, c, 0);
        {
            let _g = roots.main_thread().root_object(first);
            collect(&heap, &roots, TraceOrMark::Mark);
        }
        assert!(roots.has_saved_roots());
        let _g = roots.main_thread().root_object(second);

        let mut collector = EdgeCollector::new();
        RootEnumerator::new(&heap, &roots, TraceOrMark::Mark, RootsSource::UseSavedRoots)
            .mark_exact_stack_roots(&mut collector);
        assert_eq!(collector.targets(), vec![first]);

        roots.clear_saved_roots();
        let mut collector = EdgeCollector::new();
        RootEnumerator::new(&heap, &roots, TraceOrMark::Mark, RootsSource::UseSavedRoots)
            .mark_exact_stack_roots(&mut collector);
        assert_eq!(collector.targets(), vec![second]);
    }

    #[test]
    fn test_enumeration_is_idempotent() {
        let (mut heap, c, roots) = setup();
        let obj = heap.allocate_tenured(CellKind::Object, c, 0);
        let _p = roots.persistent().add(PersistentValue::Object(Some(obj)));
        let _s = roots.main_thread().root_value(Value::Cell(obj));

        let first = collect(&heap, &roots, TraceOrMark::Trace);
        let second = collect(&heap, &roots, TraceOrMark::Trace);
        assert_eq!(first.edges, second.edges);
    }
}
