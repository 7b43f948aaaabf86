//! The collector runtime.
//!
//! [`GcRuntime`] owns the heap, the root registries, the marker and the
//! verifier slot, and is the only place that mutates them together. Every
//! collector entry point and every barriered store goes through it.
//!
//! # Example
//!
//! ```ignore
//! let mut rt = GcRuntime::new(GcConfig::testing())?;
//! let (_, c) = rt.heap_mut().new_zone_with_compartment();
//! let parent = rt.alloc(CellKind::Object, c, [Value::Null]);
//! let child = rt.alloc(CellKind::Object, c, []);
//! rt.set_slot(parent, 0, Value::Cell(child));
//! ```

use crate::Generation;
use crate::barrier::{
    post_write_barrier, post_write_barrier_range, post_write_barrier_whole_cell,
    pre_write_barrier,
};
use crate::collector::{
    CollectionResult, DrainResult, GcMarker, GcProgress, GcScope, HeapState, IncrementalSafety,
    IncrementalState, MajorCollection, MinorCollector, MinorResult, TraceSession, UnsafeReason,
};
use crate::config::{ConfigError, GcConfig, ZealMode, ZealSettings};
use crate::heap::cell::{CellFlags, CellId, CellKind, Value};
use crate::heap::zone::CompartmentId;
use crate::heap::{GcHeap, Slots};
use crate::roots::{RootEnumerator, RootsSource, RuntimeRoots, TraceOrMark};
use crate::stats::GcStats;
use crate::trace::{Edge, Tracer};
use crate::verify::{BarrierViolation, VerifierState, VerifierType};

use rustc_hash::FxHashSet;
use std::cell::Cell;
use std::rc::Rc;

/// Verifiers stopped around a collection, to be re-armed afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PausedVerifiers {
    pub(crate) pre: bool,
    pub(crate) post: bool,
}

/// A garbage-collected runtime.
pub struct GcRuntime {
    pub(crate) config: GcConfig,
    pub(crate) heap: GcHeap,
    pub(crate) roots: RuntimeRoots,
    pub(crate) marker: GcMarker,
    minor: MinorCollector,
    pub(crate) heap_state: Rc<Cell<HeapState>>,
    pub(crate) incremental_state: IncrementalState,
    major: Option<MajorCollection>,
    paused: PausedVerifiers,
    pub(crate) verifier: VerifierState,
    zeal_counter: u32,
    pub(crate) gc_number: u64,
    minor_gc_number: u64,
    pub(crate) suppress_gc: u32,
    keep_atoms: u32,
    incremental_enabled: bool,
    pub(crate) reported_violations: Vec<BarrierViolation>,
}

impl GcRuntime {
    /// Create a runtime with a validated configuration.
    pub fn new(config: GcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a runtime with the default configuration.
    pub fn with_defaults() -> Self {
        Self::build(GcConfig::default())
    }

    fn build(config: GcConfig) -> Self {
        log::debug!("creating GC runtime: {config:?}");
        Self {
            heap: GcHeap::new(&config),
            roots: RuntimeRoots::new(),
            marker: GcMarker::new(),
            minor: MinorCollector::new(),
            heap_state: Rc::new(Cell::new(HeapState::Idle)),
            incremental_state: IncrementalState::NotActive,
            major: None,
            paused: PausedVerifiers::default(),
            verifier: VerifierState::Idle,
            zeal_counter: 0,
            gc_number: 0,
            minor_gc_number: 0,
            suppress_gc: 0,
            keep_atoms: 0,
            incremental_enabled: true,
            reported_violations: Vec::new(),
            config,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Active configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The heap.
    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    /// The heap, for creating zones and editing compartment tables.
    pub fn heap_mut(&mut self) -> &mut GcHeap {
        &mut self.heap
    }

    /// Root registries.
    pub fn roots(&self) -> &RuntimeRoots {
        &self.roots
    }

    /// Root registries, for registering callbacks and contexts.
    pub fn roots_mut(&mut self) -> &mut RuntimeRoots {
        &mut self.roots
    }

    /// Collector statistics.
    pub fn stats(&self) -> &GcStats {
        self.heap.stats()
    }

    /// Number of major GCs and verifier passes started.
    pub fn gc_number(&self) -> u64 {
        self.gc_number
    }

    /// Number of minor GCs run.
    pub fn minor_gc_number(&self) -> u64 {
        self.minor_gc_number
    }

    /// What the heap is doing right now.
    pub fn heap_state(&self) -> HeapState {
        self.heap_state.get()
    }

    /// Incremental collection state. A pre-barrier verifier pass holds it
    /// at [`IncrementalState::Mark`].
    pub fn incremental_state(&self) -> IncrementalState {
        self.incremental_state
    }

    /// Whether an incremental major collection is in progress.
    pub fn is_incremental_gc_in_progress(&self) -> bool {
        self.major.is_some()
    }

    // =========================================================================
    // Safety switches
    // =========================================================================

    /// Whether an incremental collection could run now.
    pub fn incremental_safety(&self) -> IncrementalSafety {
        if !self.incremental_enabled {
            IncrementalSafety::Unsafe(UnsafeReason::IncrementalDisabled)
        } else if self.keep_atoms > 0 {
            IncrementalSafety::Unsafe(UnsafeReason::KeepAtoms)
        } else {
            IncrementalSafety::Safe
        }
    }

    /// Allow or forbid incremental collection.
    pub fn set_incremental_enabled(&mut self, enabled: bool) {
        self.incremental_enabled = enabled;
    }

    /// Run `f` with zeal-driven collection and verification suppressed.
    pub fn with_gc_suppressed<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.suppress_gc += 1;
        let result = f(self);
        self.suppress_gc -= 1;
        result
    }

    /// Run `f` inside a keep-atoms section.
    pub fn with_keep_atoms<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.keep_atoms += 1;
        let result = f(self);
        self.keep_atoms -= 1;
        result
    }

    /// Change the zeal settings. Leaving a verifier mode tears down its
    /// armed pass.
    ///
    /// Rejects a zero frequency, leaving the current settings in place.
    pub fn set_zeal(&mut self, zeal: ZealSettings) -> Result<(), ConfigError> {
        if zeal.frequency == 0 {
            return Err(ConfigError::ZeroZealFrequency);
        }
        let leaving_pre =
            self.config.zeal.is(ZealMode::VerifierPre) && !zeal.is(ZealMode::VerifierPre);
        let leaving_post =
            self.config.zeal.is(ZealMode::VerifierPost) && !zeal.is(ZealMode::VerifierPost);
        let armed = self.verifier.active();
        if (leaving_pre && armed == Some(VerifierType::PreBarrier))
            || (leaving_post && armed == Some(VerifierType::PostBarrier))
        {
            self.finish_verifier();
        }
        self.config.zeal = zeal;
        self.zeal_counter = 0;
        Ok(())
    }

    /// Violations found by zeal-driven verification under
    /// [`ViolationAction::Report`](crate::ViolationAction::Report).
    pub fn take_reported_violations(&mut self) -> Vec<BarrierViolation> {
        std::mem::take(&mut self.reported_violations)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a cell in `compartment` holding `slots`.
    ///
    /// Objects go to the nursery when generational allocation is enabled.
    /// Cells allocated while their zone needs barriers are born marked.
    ///
    /// Under zeal, an allocation may first run a collection or a verifier
    /// step; cells only reachable from the caller's locals must be rooted.
    pub fn alloc(
        &mut self,
        kind: CellKind,
        compartment: CompartmentId,
        slots: impl IntoIterator<Item = Value>,
    ) -> CellId {
        let slots: Slots = slots.into_iter().collect();
        self.run_alloc_zeal();

        let young = kind.is_nursery_allocable() && self.heap.nursery().is_enabled();
        if young && self.heap.nursery().is_full() {
            self.minor_gc();
        }
        let generation = if young {
            Generation::Nursery
        } else {
            Generation::Tenured
        };

        let id = self.heap.allocate(kind, compartment, slots, generation);
        let zone = self.heap.cell(id).zone();
        if self.heap.zone(zone).needs_barrier() {
            self.heap
                .cell(id)
                .insert_flags(CellFlags::MARKED | CellFlags::ALLOCATED_DURING_INCREMENTAL);
        }
        if !young {
            post_write_barrier_whole_cell(&mut self.heap, id);
        }
        id
    }

    fn run_alloc_zeal(&mut self) {
        let zeal = self.config.zeal;
        if self.suppress_gc > 0 || zeal.is(ZealMode::None) {
            return;
        }
        match zeal.mode {
            ZealMode::Alloc | ZealMode::GenerationalGc => {
                self.zeal_counter += 1;
                if self.zeal_counter < zeal.frequency {
                    return;
                }
                self.zeal_counter = 0;
                if zeal.is(ZealMode::Alloc) {
                    log::trace!("zeal: full GC on allocation");
                    self.collect(GcScope::All);
                } else {
                    log::trace!("zeal: minor GC on allocation");
                    self.minor_gc();
                }
            }
            ZealMode::VerifierPre | ZealMode::VerifierPost => {
                if let Err(violation) = self.maybe_verify_barriers(false) {
                    self.reported_violations.push(violation);
                }
            }
            ZealMode::None => {}
        }
    }

    /// Allocate a tenured wrapper in `compartment` for `target`, or return
    /// the existing one. The wrapper holds `target` in slot 0.
    pub fn wrap(&mut self, compartment: CompartmentId, target: CellId) -> CellId {
        if let Some(&wrapper) = self.heap.compartment(compartment).wrappers.get(&target) {
            if self.heap.is_live(wrapper) {
                return wrapper;
            }
        }
        let slots: Slots = std::iter::once(Value::Cell(target)).collect();
        let wrapper = self
            .heap
            .allocate(CellKind::Object, compartment, slots, Generation::Tenured);
        let zone = self.heap.cell(wrapper).zone();
        if self.heap.zone(zone).needs_barrier() {
            self.heap
                .cell(wrapper)
                .insert_flags(CellFlags::MARKED | CellFlags::ALLOCATED_DURING_INCREMENTAL);
        }
        post_write_barrier_whole_cell(&mut self.heap, wrapper);
        self.heap
            .compartment_mut(compartment)
            .wrappers
            .insert(target, wrapper);
        wrapper
    }

    // =========================================================================
    // Barriered stores
    // =========================================================================

    /// Store `value` into slot `index` of `holder` with both barriers.
    /// Returns the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `holder` is dead or `index` is out of bounds.
    pub fn set_slot(&mut self, holder: CellId, index: usize, value: Value) -> Value {
        let old = self.heap.cell(holder).slots()[index];
        pre_write_barrier(&self.heap, &mut self.marker, old);
        self.heap.write_slot(holder, index, value);
        post_write_barrier(&mut self.heap, holder, index as u32, value);
        old
    }

    /// Store `values` into consecutive slots starting at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `holder` is dead or the range is out of bounds.
    pub fn set_slot_range(&mut self, holder: CellId, start: usize, values: &[Value]) {
        let old: Slots = self.heap.cell(holder).slots()[start..start + values.len()]
            .iter()
            .copied()
            .collect();
        for &value in &old {
            pre_write_barrier(&self.heap, &mut self.marker, value);
        }
        for (offset, &value) in values.iter().enumerate() {
            self.heap.write_slot(holder, start + offset, value);
        }
        post_write_barrier_range(&mut self.heap, holder, start as u32, values);
    }

    /// Replace every slot of `holder`. Returns the previous slots.
    pub fn replace_slots(
        &mut self,
        holder: CellId,
        slots: impl IntoIterator<Item = Value>,
    ) -> Slots {
        let slots: Slots = slots.into_iter().collect();
        for &value in self.heap.cell(holder).slots() {
            pre_write_barrier(&self.heap, &mut self.marker, value);
        }
        let old = self.heap.replace_slots(holder, slots);
        post_write_barrier_whole_cell(&mut self.heap, holder);
        old
    }

    /// Store without any barrier. Only for injecting barrier bugs in tests.
    pub fn set_slot_unbarriered(&mut self, holder: CellId, index: usize, value: Value) -> Value {
        self.heap.write_slot(holder, index, value)
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Empty the nursery.
    pub fn minor_gc(&mut self) -> MinorResult {
        let _session = TraceSession::new(&self.heap_state, HeapState::MinorCollecting);
        let result = self.minor.collect(&mut self.heap, &self.roots);
        self.minor_gc_number += 1;
        result
    }

    /// Start an incremental collection of `scope`.
    ///
    /// Runs a full non-incremental collection instead when incremental GC
    /// is unsafe. Armed verifiers are ended and re-armed after the
    /// collection finishes.
    pub fn start_incremental_gc(&mut self, scope: GcScope) -> GcProgress {
        if self.major.is_some() {
            log::trace!("incremental GC already in progress");
            return GcProgress::InProgress;
        }
        if let IncrementalSafety::Unsafe(reason) = self.incremental_safety() {
            log::debug!("incremental GC unsafe ({reason}); collecting non-incrementally");
            return GcProgress::Finished(self.collect(scope));
        }
        self.paused = self.stop_verifiers();
        self.begin_major(&scope);
        GcProgress::InProgress
    }

    /// Run one mark slice of `budget` cells (the configured slice budget
    /// if `None`), finishing the collection when marking completes.
    pub fn gc_slice(&mut self, budget: Option<usize>) -> GcProgress {
        let Some(mut gc) = self.major.take() else {
            return GcProgress::NotRunning;
        };
        let budget = budget.unwrap_or(self.config.mark_slice_budget);
        let drained = {
            let _session = TraceSession::new(&self.heap_state, HeapState::MajorCollecting);
            gc.mark_slice(&self.heap, &mut self.marker, Some(budget))
        };
        match drained {
            DrainResult::BudgetExhausted => {
                self.major = Some(gc);
                GcProgress::InProgress
            }
            DrainResult::Finished => GcProgress::Finished(self.finish_major(gc)),
        }
    }

    /// Finish an in-progress incremental collection without a budget.
    pub fn finish_gc(&mut self) -> Option<CollectionResult> {
        let mut gc = self.major.take()?;
        {
            let _session = TraceSession::new(&self.heap_state, HeapState::MajorCollecting);
            gc.mark_slice(&self.heap, &mut self.marker, None);
        }
        Some(self.finish_major(gc))
    }

    /// Run a complete, non-incremental collection of `scope`.
    ///
    /// Any in-progress incremental collection is finished first.
    pub fn collect(&mut self, scope: GcScope) -> CollectionResult {
        self.finish_gc();
        self.paused = self.stop_verifiers();
        self.begin_major(&scope);
        match self.finish_gc() {
            Some(result) => result,
            None => unreachable!("major collection vanished between begin and finish"),
        }
    }

    fn begin_major(&mut self, scope: &GcScope) {
        self.minor_gc();
        self.gc_number += 1;
        let _session = TraceSession::new(&self.heap_state, HeapState::MajorCollecting);
        self.incremental_state = IncrementalState::MarkRoots;
        let gc = MajorCollection::begin(
            &mut self.heap,
            &self.roots,
            &mut self.marker,
            scope,
            self.gc_number,
        );
        self.incremental_state = IncrementalState::Mark;
        self.major = Some(gc);
    }

    fn finish_major(&mut self, gc: MajorCollection) -> CollectionResult {
        let result = {
            let _session = TraceSession::new(&self.heap_state, HeapState::MajorCollecting);
            self.incremental_state = IncrementalState::Sweep;
            gc.finish(&mut self.heap, &self.roots, &mut self.marker)
        };
        self.incremental_state = IncrementalState::NotActive;
        let paused = std::mem::take(&mut self.paused);
        self.restart_verifiers(paused);
        result
    }

    // =========================================================================
    // Runtime walks
    // =========================================================================

    /// Enumerate every root into `tracer`.
    pub fn mark_runtime(&self, tracer: &mut dyn Tracer, mode: TraceOrMark, source: RootsSource) {
        let _session = TraceSession::new(&self.heap_state, HeapState::Tracing);
        RootEnumerator::new(&self.heap, &self.roots, mode, source).enumerate(tracer);
    }

    /// Every cell reachable from the roots, by a synchronous full trace.
    /// Does not touch mark bits.
    pub fn trace_heap(&self) -> FxHashSet<CellId> {
        let _session = TraceSession::new(&self.heap_state, HeapState::Tracing);
        let mut tracer = ReachabilityTracer::default();
        RootEnumerator::new(&self.heap, &self.roots, TraceOrMark::Trace, RootsSource::TraceRoots)
            .enumerate(&mut tracer);
        while let Some(id) = tracer.worklist.pop() {
            self.heap.trace_children(id, &mut tracer);
        }
        tracer.reached
    }
}

impl Drop for GcRuntime {
    fn drop(&mut self) {
        self.finish_verifier();
        log::debug!("GC runtime dropped\n{}", self.heap.stats().summary());
    }
}

impl std::fmt::Debug for GcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcRuntime")
            .field("heap", &self.heap)
            .field("incremental_state", &self.incremental_state)
            .field("verifier", &self.verifier.active())
            .field("gc_number", &self.gc_number)
            .field("minor_gc_number", &self.minor_gc_number)
            .finish()
    }
}

#[derive(Default)]
struct ReachabilityTracer {
    worklist: Vec<CellId>,
    reached: FxHashSet<CellId>,
}

impl Tracer for ReachabilityTracer {
    fn on_edge(&mut self, edge: Edge) {
        if self.reached.insert(edge.target) {
            self.worklist.push(edge.target);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::zone::ZoneId;

    fn runtime() -> (GcRuntime, ZoneId, CompartmentId) {
        let mut rt = GcRuntime::new(GcConfig::testing()).unwrap();
        let (zone, c) = rt.heap_mut().new_zone_with_compartment();
        (rt, zone, c)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = GcConfig {
            nursery_capacity: 0,
            ..GcConfig::default()
        };
        assert_eq!(GcRuntime::new(config).unwrap_err(), ConfigError::NurseryTooSmall);
    }

    #[test]
    fn test_objects_start_in_nursery() {
        let (mut rt, _, c) = runtime();
        let obj = rt.alloc(CellKind::Object, c, []);
        let string = rt.alloc(CellKind::String, c, []);
        assert!(rt.heap().is_in_nursery(obj));
        assert!(!rt.heap().is_in_nursery(string));
    }

    #[test]
    fn test_nursery_full_triggers_minor_gc() {
        let mut rt = GcRuntime::new(GcConfig {
            nursery_capacity: 4,
            ..GcConfig::testing()
        })
        .unwrap();
        let (_, c) = rt.heap_mut().new_zone_with_compartment();
        for _ in 0..5 {
            rt.alloc(CellKind::Object, c, []);
        }
        assert_eq!(rt.minor_gc_number(), 1);
        assert_eq!(rt.heap().nursery().len(), 1);
    }

    #[test]
    fn test_set_slot_runs_post_barrier() {
        let (mut rt, _, c) = runtime();
        let holder = rt.alloc(CellKind::String, c, [Value::Null]);
        let young = rt.alloc(CellKind::Object, c, []);
        rt.set_slot(holder, 0, Value::Cell(young));
        assert_eq!(rt.heap().store_buffer().len(), 1);

        rt.minor_gc();
        assert!(rt.heap().is_live(young));
        assert!(!rt.heap().is_in_nursery(young));
    }

    #[test]
    fn test_tenured_alloc_with_young_slot_is_recorded() {
        let (mut rt, _, c) = runtime();
        let young = rt.alloc(CellKind::Object, c, []);
        let holder = rt.alloc(CellKind::Script, c, [Value::Cell(young)]);
        assert_eq!(
            rt.heap().store_buffer().entries(),
            &[crate::barrier::StoreBufferEntry::WholeCell(holder)]
        );
    }

    #[test]
    fn test_set_slot_pre_barrier_during_incremental() {
        let (mut rt, _, c) = runtime();
        let holder = rt.alloc(CellKind::String, c, [Value::Null]);
        let old = rt.alloc(CellKind::String, c, []);
        rt.set_slot(holder, 0, Value::Cell(old));
        let _root = rt.roots().main_thread().root_object(holder);

        assert_eq!(rt.start_incremental_gc(GcScope::All), GcProgress::InProgress);
        rt.set_slot(holder, 0, Value::Null);
        assert!(rt.heap().cell(old).is_marked());
        rt.finish_gc();
        // Marked by the barrier, so it survives this cycle.
        assert!(rt.heap().is_live(old));
    }

    #[test]
    fn test_allocated_during_incremental_survives() {
        let (mut rt, _, c) = runtime();
        rt.start_incremental_gc(GcScope::All);
        let fresh = rt.alloc(CellKind::String, c, []);
        assert!(rt.heap().cell(fresh).allocated_during_incremental());
        let result = rt.finish_gc().unwrap();
        assert_eq!(result.cells_freed, 0);
        assert!(rt.heap().is_live(fresh));
    }

    #[test]
    fn test_incremental_slices() {
        let (mut rt, _, c) = runtime();
        let mut prev = rt.alloc(CellKind::String, c, []);
        let _root = rt.roots().main_thread().root_object(prev);
        for _ in 0..10 {
            let next = rt.alloc(CellKind::String, c, [Value::Null]);
            rt.set_slot(next, 0, Value::Cell(prev));
            prev = next;
        }
        let _head = rt.roots().main_thread().root_object(prev);

        rt.start_incremental_gc(GcScope::All);
        let mut slices = 0;
        loop {
            slices += 1;
            match rt.gc_slice(Some(2)) {
                GcProgress::InProgress => continue,
                GcProgress::Finished(result) => {
                    assert_eq!(result.cells_freed, 0);
                    break;
                }
                GcProgress::NotRunning => panic!("collection vanished"),
            }
        }
        assert!(slices > 1);
        assert_eq!(rt.gc_slice(None), GcProgress::NotRunning);
        assert_eq!(rt.incremental_state(), IncrementalState::NotActive);
    }

    #[test]
    fn test_unsafe_incremental_runs_full_gc() {
        let (mut rt, _, c) = runtime();
        rt.alloc(CellKind::String, c, []);
        rt.set_incremental_enabled(false);
        match rt.start_incremental_gc(GcScope::All) {
            GcProgress::Finished(result) => assert_eq!(result.cells_freed, 1),
            other => panic!("expected a finished collection, got {other:?}"),
        }
        assert!(!rt.is_incremental_gc_in_progress());
    }

    #[test]
    fn test_keep_atoms_is_unsafe() {
        let (mut rt, _, _) = runtime();
        let safety = rt.with_keep_atoms(|rt| rt.incremental_safety());
        assert_eq!(safety, IncrementalSafety::Unsafe(UnsafeReason::KeepAtoms));
        assert!(rt.incremental_safety().is_safe());
    }

    #[test]
    fn test_alloc_zeal_collects() {
        let (mut rt, _, c) = runtime();
        rt.set_zeal(ZealSettings::new(ZealMode::Alloc, 3)).unwrap();
        for _ in 0..6 {
            rt.alloc(CellKind::String, c, []);
        }
        assert_eq!(rt.gc_number(), 2);
    }

    #[test]
    fn test_suppressed_zeal() {
        let (mut rt, _, c) = runtime();
        rt.set_zeal(ZealSettings::new(ZealMode::GenerationalGc, 1)).unwrap();
        rt.with_gc_suppressed(|rt| {
            for _ in 0..4 {
                rt.alloc(CellKind::Object, c, []);
            }
        });
        assert_eq!(rt.minor_gc_number(), 0);
    }

    #[test]
    fn test_set_zeal_rejects_zero_frequency() {
        let (mut rt, _, c) = runtime();
        rt.set_zeal(ZealSettings::new(ZealMode::Alloc, 3)).unwrap();
        assert_eq!(
            rt.set_zeal(ZealSettings::new(ZealMode::Alloc, 0)),
            Err(ConfigError::ZeroZealFrequency)
        );
        assert_eq!(rt.config().zeal, ZealSettings::new(ZealMode::Alloc, 3));
        for _ in 0..3 {
            rt.alloc(CellKind::String, c, []);
        }
        assert_eq!(rt.gc_number(), 1);
    }

    #[test]
    fn test_wrap_reuses_wrapper() {
        let (mut rt, _, c) = runtime();
        let (_, other) = rt.heap_mut().new_zone_with_compartment();
        let target = rt.alloc(CellKind::String, c, []);
        let w1 = rt.wrap(other, target);
        let w2 = rt.wrap(other, target);
        assert_eq!(w1, w2);
        assert_eq!(rt.heap().slot(w1, 0), Some(Value::Cell(target)));
        assert!(!rt.heap().is_in_nursery(w1));
    }

    #[test]
    fn test_trace_heap_matches_full_gc_survivors() {
        let (mut rt, _, c) = runtime();
        let a = rt.alloc(CellKind::String, c, [Value::Null]);
        let b = rt.alloc(CellKind::String, c, []);
        rt.alloc(CellKind::String, c, []);
        rt.set_slot(a, 0, Value::Cell(b));
        let _root = rt.roots().main_thread().root_object(a);

        let reachable = rt.trace_heap();
        rt.collect(GcScope::All);
        let survivors: FxHashSet<_> = rt.heap().cell_ids().collect();
        assert_eq!(reachable, survivors);
        assert_eq!(rt.heap_state(), HeapState::Idle);
    }
}
