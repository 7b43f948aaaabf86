//! Integration tests for the write-barrier verifiers.
//!
//! Coverage:
//! - Pre-barrier: unmutated heaps verify clean, barrier bypasses are caught
//! - Pre-barrier: a holder reachable through any single root category is
//!   snapshotted and checked
//! - Post-barrier: barriered stores verify clean, raw stores are caught
//! - Snapshot arena exhaustion rolls back and leaves the collector usable
//! - The two verifiers exclude each other
//! - Zeal-driven verification under `ViolationAction::Report`

use proptest::prelude::*;
use sable_gc::collector::IncrementalState;
use sable_gc::roots::{PersistentValue, StackRoot};
use sable_gc::trace::RootTracer;
use sable_gc::verify::{AbortReason, SkipReason};
use sable_gc::{
    BarrierViolation, CellId, CellKind, CompartmentId, GcConfig, GcProgress, GcRuntime, GcScope,
    Value, VerifierType, VerifyOutcome, VerifyStart, ZealMode, ZealSettings,
};
use std::sync::atomic::Ordering;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn runtime_with(config: GcConfig) -> (GcRuntime, CompartmentId) {
    init_logging();
    let mut rt = GcRuntime::new(config).unwrap();
    let (_, c) = rt.heap_mut().new_zone_with_compartment();
    (rt, c)
}

fn runtime() -> (GcRuntime, CompartmentId) {
    runtime_with(GcConfig::testing())
}

/// A tenured tree of `depth` levels, two children per node. Returns every
/// cell, root first.
fn tree(rt: &mut GcRuntime, c: CompartmentId, depth: usize) -> Vec<CellId> {
    let root = rt.alloc(CellKind::Script, c, [Value::Null, Value::Null]);
    let mut cells = vec![root];
    let mut frontier = vec![root];
    for _ in 1..depth {
        let mut next = Vec::new();
        for &parent in &frontier {
            for slot in 0..2 {
                let child = rt.alloc(CellKind::Script, c, [Value::Null, Value::Null]);
                rt.set_slot(parent, slot, Value::Cell(child));
                next.push(child);
            }
        }
        cells.extend(&next);
        frontier = next;
    }
    cells
}

// =============================================================================
// Pre-barrier verifier
// =============================================================================

mod pre_barrier {
    use super::*;

    #[test]
    fn test_no_mutation_no_violation() {
        let (mut rt, c) = runtime();
        let cells = tree(&mut rt, c, 5);
        let _root = rt.roots().main_thread().root_object(cells[0]);

        assert_eq!(rt.start_verify_pre_barriers(), VerifyStart::Armed);
        assert_eq!(rt.incremental_state(), IncrementalState::Mark);
        let outcome = rt.end_verify_pre_barriers().unwrap();
        match outcome {
            VerifyOutcome::Verified {
                nodes,
                edges_checked,
            } => {
                assert_eq!(nodes, cells.len());
                assert_eq!(edges_checked, cells.len() - 1);
            }
            other => panic!("expected a verified pass, got {other:?}"),
        }
        assert_eq!(rt.stats().violations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_barriered_mutation_passes() {
        let (mut rt, c) = runtime();
        let cells = tree(&mut rt, c, 4);
        let _root = rt.roots().main_thread().root_object(cells[0]);

        rt.start_verify_pre_barriers();
        rt.set_slot(cells[0], 0, Value::Null);
        rt.set_slot(cells[2], 1, Value::Cell(cells[3]));
        let fresh = rt.alloc(CellKind::Object, c, []);
        rt.set_slot(cells[2], 0, Value::Cell(fresh));
        assert!(rt.end_verify_pre_barriers().is_ok());
    }

    #[test]
    fn test_barrier_bypass_is_detected() {
        let (mut rt, c) = runtime();
        let cells = tree(&mut rt, c, 3);
        let _root = rt.roots().main_thread().root_object(cells[0]);

        rt.start_verify_pre_barriers();
        rt.set_slot_unbarriered(cells[0], 1, Value::Null);
        let violation = rt.end_verify_pre_barriers().unwrap_err();

        assert_eq!(violation.verifier(), VerifierType::PreBarrier);
        assert_eq!(violation.source(), cells[0]);
        assert_eq!(violation.target(), cells[2]);
        assert!(violation.to_string().contains("Unmarked edge"));
        assert_eq!(rt.stats().violations.load(Ordering::Relaxed), 1);
        assert_eq!(rt.active_verifier(), None);
        assert!(rt.heap().nursery().is_enabled());
    }

    #[test]
    fn test_bypass_into_freshly_marked_target_passes() {
        let (mut rt, c) = runtime();
        let cells = tree(&mut rt, c, 3);
        let _root = rt.roots().main_thread().root_object(cells[0]);

        rt.start_verify_pre_barriers();
        // The barriered store marks cells[1] before the raw store drops it.
        rt.set_slot(cells[2], 0, Value::Cell(cells[1]));
        rt.set_slot(cells[2], 0, Value::Null);
        rt.set_slot_unbarriered(cells[0], 0, Value::Null);
        assert!(rt.end_verify_pre_barriers().is_ok());
    }
}

// =============================================================================
// Pre-barrier verifier, per root category
// =============================================================================

mod root_categories {
    use super::*;

    /// A Script holder with one edge to a String.
    fn holder(rt: &mut GcRuntime, c: CompartmentId) -> (CellId, CellId) {
        let child = rt.alloc(CellKind::String, c, []);
        let holder = rt.alloc(CellKind::Script, c, [Value::Cell(child)]);
        (holder, child)
    }

    /// Arm the verifier, drop `holder`'s edge without a barrier and check
    /// the bypass is reported against it.
    fn assert_bypass_caught(rt: &mut GcRuntime, holder: CellId, child: CellId) {
        assert_eq!(rt.start_verify_pre_barriers(), VerifyStart::Armed);
        rt.set_slot_unbarriered(holder, 0, Value::Null);
        let violation = rt.end_verify_pre_barriers().unwrap_err();
        assert_eq!(violation.source(), holder);
        assert_eq!(violation.target(), child);
    }

    #[test]
    fn test_context_stack_root() {
        let (mut rt, c) = runtime();
        let (h, child) = holder(&mut rt, c);
        let cx = rt.roots_mut().new_context();
        let _root = cx.roots().root(StackRoot::Script(Some(h)));
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_persistent_root() {
        let (mut rt, c) = runtime();
        let (h, child) = holder(&mut rt, c);
        let _handle = rt.roots().persistent().add(PersistentValue::Script(Some(h)));
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_runtime_singleton_root() {
        let (mut rt, c) = runtime();
        let (h, child) = holder(&mut rt, c);
        rt.roots_mut().singletons.script_counts.push(h);
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_compartment_global_root() {
        let (mut rt, c) = runtime();
        let child = rt.alloc(CellKind::String, c, []);
        let global = rt.heap_mut().allocate_tenured(CellKind::Object, c, 1);
        rt.set_slot(global, 0, Value::Cell(child));
        rt.heap_mut().compartment_mut(c).global = Some(global);
        assert_bypass_caught(&mut rt, global, child);
    }

    #[test]
    fn test_embedder_black_root() {
        let (mut rt, c) = runtime();
        let (h, child) = holder(&mut rt, c);
        rt.roots_mut()
            .add_black_root_tracer(Box::new(move |trc: &mut RootTracer<'_>| {
                trc.trace_cell(h, "embedder black");
            }));
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_embedder_gray_root() {
        let (mut rt, c) = runtime();
        let (h, child) = holder(&mut rt, c);
        rt.roots_mut()
            .set_gray_root_tracer(Some(Box::new(move |trc: &mut RootTracer<'_>| {
                trc.trace_cell(h, "embedder gray");
            })));
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_cross_compartment_wrapper_root() {
        let (mut rt, c) = runtime();
        let (_, other) = rt.heap_mut().new_zone_with_compartment();
        let (h, child) = holder(&mut rt, c);
        rt.wrap(other, h);
        assert_bypass_caught(&mut rt, h, child);
    }

    #[test]
    fn test_unrooted_holder_is_not_checked() {
        let (mut rt, c) = runtime();
        let (h, _) = holder(&mut rt, c);
        assert_eq!(rt.start_verify_pre_barriers(), VerifyStart::Armed);
        rt.set_slot_unbarriered(h, 0, Value::Null);
        assert!(rt.end_verify_pre_barriers().is_ok());
    }
}

// =============================================================================
// Post-barrier verifier
// =============================================================================

mod post_barrier {
    use super::*;

    #[test]
    fn test_barriered_store_passes() {
        let (mut rt, c) = runtime();
        let holder = rt.alloc(CellKind::Script, c, [Value::Null; 2]);
        let _root = rt.roots().main_thread().root_object(holder);

        assert_eq!(rt.start_verify_post_barriers(), VerifyStart::Armed);
        let young = rt.alloc(CellKind::Object, c, []);
        assert!(rt.heap().is_in_nursery(young));
        rt.set_slot(holder, 1, Value::Cell(young));
        rt.set_slot_range(holder, 0, &[Value::Cell(young)]);
        assert!(matches!(
            rt.end_verify_post_barriers(),
            Ok(VerifyOutcome::Verified {
                edges_checked: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_raw_store_is_detected() {
        let (mut rt, c) = runtime();
        let holder = rt.alloc(CellKind::Script, c, [Value::Null; 2]);
        let _holder = rt.roots().main_thread().root_object(holder);

        rt.start_verify_post_barriers();
        let young = rt.alloc(CellKind::Object, c, []);
        let _young = rt.roots().main_thread().root_object(young);
        rt.set_slot_unbarriered(holder, 1, Value::Cell(young));

        let violation = rt.end_verify_post_barriers().unwrap_err();
        assert!(matches!(
            violation,
            BarrierViolation::MissingStoreBufferEdge { source, target, .. }
                if source == holder && target == young
        ));
        assert!(violation.to_string().starts_with("[post-barrier verifier] Missing edge"));
    }

    #[test]
    fn test_replace_slots_is_recorded() {
        let (mut rt, c) = runtime();
        let holder = rt.alloc(CellKind::Script, c, []);
        rt.start_verify_post_barriers();
        let young = rt.alloc(CellKind::Object, c, []);
        rt.replace_slots(holder, [Value::Int32(3), Value::Cell(young)]);
        assert!(rt.end_verify_post_barriers().is_ok());
    }
}

// =============================================================================
// Bounded resource use
// =============================================================================

#[test]
fn test_small_arena_aborts_and_gc_still_works() {
    let (mut rt, c) = runtime_with(GcConfig {
        verifier_arena_bytes: 4 * 1024,
        ..GcConfig::testing()
    });
    let cells = tree(&mut rt, c, 9);
    let _root = rt.roots().main_thread().root_object(cells[0]);
    let garbage = rt.alloc(CellKind::String, c, []);

    assert_eq!(
        rt.start_verify_pre_barriers(),
        VerifyStart::Aborted(AbortReason::ArenaExhausted)
    );
    assert_eq!(rt.active_verifier(), None);
    assert_eq!(rt.incremental_state(), IncrementalState::NotActive);
    assert!(rt.heap().nursery().is_enabled());
    assert!(rt.heap().zones().all(|(_, zone)| !zone.needs_barrier()));
    assert!(!rt.roots().has_saved_roots());
    assert_eq!(rt.stats().verifier_passes_aborted.load(Ordering::Relaxed), 1);

    assert_eq!(rt.start_incremental_gc(GcScope::All), GcProgress::InProgress);
    let result = loop {
        if let GcProgress::Finished(result) = rt.gc_slice(Some(64)) {
            break result;
        }
    };
    assert_eq!(result.cells_freed, 1);
    assert!(!rt.heap().is_live(garbage));
    assert!(cells.iter().all(|&id| rt.heap().is_live(id)));
}

// =============================================================================
// Mutual exclusion
// =============================================================================

#[test]
fn test_post_start_while_pre_armed_is_noop() {
    let (mut rt, c) = runtime();
    let cells = tree(&mut rt, c, 3);
    let _root = rt.roots().main_thread().root_object(cells[0]);

    rt.start_verify_pre_barriers();
    let gc_number = rt.gc_number();
    assert_eq!(
        rt.start_verify_post_barriers(),
        VerifyStart::Skipped(SkipReason::OtherVerifierActive)
    );
    assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
    assert_eq!(rt.gc_number(), gc_number);
    assert_eq!(rt.end_verify_post_barriers(), Ok(VerifyOutcome::NotActive));
    assert!(matches!(
        rt.end_verify_pre_barriers(),
        Ok(VerifyOutcome::Verified { .. })
    ));
}

#[test]
fn test_pre_start_while_post_armed_is_noop() {
    let (mut rt, _) = runtime();
    rt.start_verify_post_barriers();
    assert_eq!(
        rt.start_verify_pre_barriers(),
        VerifyStart::Skipped(SkipReason::OtherVerifierActive)
    );
    assert_eq!(rt.active_verifier(), Some(VerifierType::PostBarrier));
}

#[test]
fn test_no_start_during_incremental_gc() {
    let (mut rt, _) = runtime();
    rt.start_incremental_gc(GcScope::All);
    assert_eq!(
        rt.start_verify_pre_barriers(),
        VerifyStart::Skipped(SkipReason::IncrementalGcActive)
    );
    assert_eq!(
        rt.start_verify_post_barriers(),
        VerifyStart::Skipped(SkipReason::IncrementalGcActive)
    );
    rt.finish_gc();
}

// =============================================================================
// Zeal
// =============================================================================

#[test]
fn test_pre_zeal_reports_bypass_from_allocation() {
    let (mut rt, c) = runtime();
    let cells = tree(&mut rt, c, 3);
    let _root = rt.roots().main_thread().root_object(cells[0]);
    rt.set_zeal(ZealSettings::new(ZealMode::VerifierPre, 4)).unwrap();

    rt.alloc(CellKind::String, c, []);
    rt.set_slot_unbarriered(cells[0], 0, Value::Null);
    for _ in 0..4 {
        rt.alloc(CellKind::String, c, []);
    }

    let violations = rt.take_reported_violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].target(), cells[1]);
}

#[test]
fn test_post_zeal_runs_clean_with_barriers() {
    let (mut rt, c) = runtime();
    let holder = rt.alloc(CellKind::Script, c, [Value::Null]);
    let _root = rt.roots().main_thread().root_object(holder);
    rt.set_zeal(ZealSettings::new(ZealMode::VerifierPost, 3)).unwrap();

    for _ in 0..20 {
        let young = rt.alloc(CellKind::Object, c, []);
        rt.set_slot(holder, 0, Value::Cell(young));
    }
    assert!(rt.take_reported_violations().is_empty());
    assert!(rt.stats().verifier_passes_completed.load(Ordering::Relaxed) >= 5);
}

#[test]
fn test_full_gc_rearms_pre_verifier() {
    let (mut rt, c) = runtime();
    let cells = tree(&mut rt, c, 3);
    let _root = rt.roots().main_thread().root_object(cells[0]);
    rt.start_verify_pre_barriers();

    rt.collect(GcScope::All);
    assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
    rt.set_slot(cells[0], 0, Value::Null);
    assert!(rt.end_verify_pre_barriers().is_ok());
}

// =============================================================================
// Random graphs
// =============================================================================

#[derive(Debug, Clone)]
struct Scenario {
    cells: usize,
    edges: Vec<(usize, usize, usize)>,
    mutations: Vec<(usize, usize, Option<usize>)>,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (2usize..30).prop_flat_map(|cells| {
        (
            prop::collection::vec((0..cells, 0..2usize, 0..cells), 0..cells * 2),
            prop::collection::vec((0..cells, 0..2usize, prop::option::of(0..cells)), 0..12),
        )
            .prop_map(move |(edges, mutations)| Scenario {
                cells,
                edges,
                mutations,
            })
    })
}

fn build(rt: &mut GcRuntime, c: CompartmentId, scenario: &Scenario) -> Vec<CellId> {
    let ids: Vec<_> = (0..scenario.cells)
        .map(|_| rt.alloc(CellKind::Script, c, [Value::Null; 2]))
        .collect();
    for &(from, slot, to) in &scenario.edges {
        rt.set_slot(ids[from], slot, Value::Cell(ids[to]));
    }
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_unmutated_snapshot_cancels_every_edge(scenario in scenario()) {
        let (mut rt, c) = runtime();
        let ids = build(&mut rt, c, &scenario);
        let rooted: Vec<_> = ids.iter().map(|&id| Value::Cell(id)).collect();
        let _roots = rt.roots().main_thread().root(StackRoot::ValueVector(rooted));

        prop_assert_eq!(rt.start_verify_pre_barriers(), VerifyStart::Armed);
        let outcome = rt.end_verify_pre_barriers();
        prop_assert!(
            matches!(outcome, Ok(VerifyOutcome::Verified { nodes, .. }) if nodes == ids.len()),
            "unexpected outcome {:?}",
            outcome
        );
    }

    #[test]
    fn prop_barriered_mutation_never_violates(scenario in scenario()) {
        let (mut rt, c) = runtime();
        let ids = build(&mut rt, c, &scenario);
        let _root = rt.roots().main_thread().root_object(ids[0]);
        let reachable = rt.trace_heap();

        rt.start_verify_pre_barriers();
        for &(holder, slot, target) in &scenario.mutations {
            if !reachable.contains(&ids[holder]) {
                continue;
            }
            let value = match target {
                Some(t) if reachable.contains(&ids[t]) => Value::Cell(ids[t]),
                _ => Value::Null,
            };
            rt.set_slot(ids[holder], slot, value);
        }
        let outcome = rt.end_verify_pre_barriers();
        prop_assert!(outcome.is_ok(), "violation: {:?}", outcome);
    }
}
