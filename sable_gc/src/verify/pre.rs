//! Pre-barrier (incremental) verifier.
//!
//! The check rests on one observation: under snapshot-at-the-beginning
//! barriers, any edge that existed when marking started and was later
//! overwritten must have had its old target marked by the pre-barrier.
//!
//! 1. **Start**: empty the nursery and turn generational allocation off,
//!    then record every cell reachable from the roots and its outgoing
//!    edges in a [`VerifierArena`]. Turn barriers on in every zone and
//!    enter the marking state. The mutator now runs.
//! 2. **End**: turn barriers off, then walk every snapshotted cell's
//!    current edges. An edge seen again with the same target is cancelled.
//!    Every edge left over was overwritten, so its old target must be
//!    marked or have been allocated inside the window.
//!
//! ```text
//!   snapshot          mutator                check
//!   A ──▶ B      A.x = C (barrier marks B)   A ──▶ C   (A ──▶ B left over:
//!   A ──▶ D                                  A ──▶ D    B marked? ✓)
//! ```
//!
//! Nodes with more than `max_verifier_edges` snapshot edges are neither
//! cancelled nor checked, which bounds the quadratic cancel search.

use crate::collector::{HeapState, IncrementalSafety, IncrementalState, TraceSession};
use crate::heap::GcHeap;
use crate::roots::{RootEnumerator, RootsSource, RuntimeRoots, TraceOrMark};
use crate::runtime::GcRuntime;
use crate::trace::{Edge, Tracer};
use crate::verify::arena::{ArenaExhausted, EdgeValue, NodeIndex, VerifierArena};
use crate::verify::{
    AbortReason, BarrierViolation, SkipReason, VerifierState, VerifierType, VerifyOutcome,
    VerifyStart,
};

/// An armed pre-barrier pass.
#[derive(Debug)]
pub struct PreBarrierVerifier {
    arena: VerifierArena,
    /// Scheduler opportunities seen since arming.
    pub(crate) count: u32,
    gc_number: u64,
}

impl PreBarrierVerifier {
    /// The snapshot.
    pub fn arena(&self) -> &VerifierArena {
        &self.arena
    }

    /// GC number the pass was armed under.
    pub fn gc_number(&self) -> u64 {
        self.gc_number
    }
}

// =============================================================================
// Tracers
// =============================================================================

/// Appends every edge to the arena's newest node.
struct SnapshotTracer<'a> {
    arena: &'a mut VerifierArena,
}

impl Tracer for SnapshotTracer<'_> {
    fn on_edge(&mut self, edge: Edge) {
        if self.arena.is_exhausted() {
            return;
        }
        // A failed push leaves the arena exhausted; the builder checks.
        let _ = self.arena.push_edge(EdgeValue {
            target: Some(edge.target),
            kind: edge.kind,
            label: edge.name,
            location: edge.location,
        });
    }
}

/// Cancels the first snapshot edge of `node` with the same target.
struct CheckTracer<'a> {
    arena: &'a mut VerifierArena,
    node: NodeIndex,
    searchable: bool,
}

impl Tracer for CheckTracer<'_> {
    fn on_edge(&mut self, edge: Edge) {
        if !self.searchable {
            return;
        }
        if let Some(recorded) = self
            .arena
            .edges_of_mut(self.node)
            .iter_mut()
            .find(|e| e.target == Some(edge.target))
        {
            recorded.target = None;
        }
    }
}

// =============================================================================
// Snapshot and check
// =============================================================================

/// Record the root node and every reachable cell with its edges.
///
/// Roots are enumerated as a full trace, so gray embedder roots are
/// included, together with every cross-compartment wrapper target. Each
/// node's edges are recorded as soon as the node is created; nodes are then
/// expanded in creation order.
fn build_snapshot(
    heap: &GcHeap,
    roots: &RuntimeRoots,
    arena: &mut VerifierArena,
) -> Result<(), ArenaExhausted> {
    arena.push_root()?;
    {
        let enumerator =
            RootEnumerator::new(heap, roots, TraceOrMark::Trace, RootsSource::TraceRoots);
        let mut tracer = SnapshotTracer { arena: &mut *arena };
        enumerator.trace_wrapper_targets(&mut tracer);
        enumerator.enumerate(&mut tracer);
    }
    if arena.is_exhausted() {
        return Err(ArenaExhausted);
    }

    let mut cursor: NodeIndex = 0;
    while (cursor as usize) < arena.node_count() {
        let count = arena.node(cursor).count as usize;
        for i in 0..count {
            let edge = arena.edges_of(cursor)[i];
            let Some(target) = edge.target else {
                continue;
            };
            if arena.make_node(target, edge.kind)?.is_none() {
                continue;
            }
            heap.trace_children(target, &mut SnapshotTracer { arena: &mut *arena });
            if arena.is_exhausted() {
                return Err(ArenaExhausted);
            }
        }
        cursor += 1;
    }
    Ok(())
}

/// Cancel unchanged edges and check the rest. Root edges are not checked.
fn check_snapshot(
    heap: &GcHeap,
    arena: &mut VerifierArena,
    max_edges: usize,
) -> Result<VerifyOutcome, BarrierViolation> {
    let mut edges_checked = 0;
    for index in 1..arena.node_count() as NodeIndex {
        let node = *arena.node(index);
        let Some(thing) = node.thing else {
            continue;
        };
        if !heap.is_live(thing) {
            continue;
        }

        let searchable = node.count as usize <= max_edges;
        heap.trace_children(
            thing,
            &mut CheckTracer {
                arena: &mut *arena,
                node: index,
                searchable,
            },
        );
        if !searchable {
            continue;
        }

        for edge in arena.edges_of(index) {
            edges_checked += 1;
            let Some(target) = edge.target else {
                continue;
            };
            let ok = heap
                .get(target)
                .is_some_and(|cell| cell.is_marked_or_allocated());
            if !ok {
                return Err(BarrierViolation::UnmarkedEdge {
                    label: edge.label,
                    source: thing,
                    location: edge.location,
                    target,
                    kind: edge.kind,
                });
            }
        }
    }
    Ok(VerifyOutcome::Verified {
        nodes: arena.node_count() - 1,
        edges_checked,
    })
}

// =============================================================================
// Runtime entry points
// =============================================================================

impl GcRuntime {
    /// Snapshot the heap and open a marking window with barriers on.
    ///
    /// No-op if a verifier is armed or an incremental GC is in progress.
    /// Abandons the pass, rolling everything back, if the snapshot does not
    /// fit in `verifier_arena_bytes`.
    pub fn start_verify_pre_barriers(&mut self) -> VerifyStart {
        if let Some(active) = self.verifier.active() {
            let reason = match active {
                VerifierType::PreBarrier => SkipReason::AlreadyActive,
                VerifierType::PostBarrier => SkipReason::OtherVerifierActive,
            };
            return self.skip_start(reason);
        }
        if self.incremental_state != IncrementalState::NotActive {
            return self.skip_start(SkipReason::IncrementalGcActive);
        }

        self.minor_gc();
        if let IncrementalSafety::Unsafe(reason) = self.incremental_safety() {
            return self.skip_start(SkipReason::IncrementalUnsafe(reason));
        }

        self.heap.clear_marks();
        self.heap.nursery_mut().disable();
        self.gc_number += 1;
        self.heap.stats().record_verifier_start();

        let mut arena = VerifierArena::new(self.config.verifier_arena_bytes);
        let built = {
            let _session = TraceSession::new(&self.heap_state, HeapState::Tracing);
            build_snapshot(&self.heap, &self.roots, &mut arena)
        };

        if built.is_err() {
            log::warn!(
                "pre-barrier verifier: snapshot exceeded {} bytes after {} nodes; pass abandoned",
                self.config.verifier_arena_bytes,
                arena.node_count()
            );
            self.heap.nursery_mut().enable();
            self.heap.stats().record_verifier_abort();
            return VerifyStart::Aborted(AbortReason::ArenaExhausted);
        }

        self.heap
            .stats()
            .record_snapshot(arena.node_count(), arena.edge_count());
        for zone in self.heap.zones_mut() {
            zone.set_needs_barrier(true);
        }
        self.incremental_state = IncrementalState::Mark;
        self.marker.reset();

        log::debug!(
            "pre-barrier verifier armed (gc #{}): {} nodes, {} edges, {} bytes",
            self.gc_number,
            arena.node_count(),
            arena.edge_count(),
            arena.bytes_used()
        );
        self.verifier = VerifierState::Pre(PreBarrierVerifier {
            arena,
            count: 0,
            gc_number: self.gc_number,
        });
        VerifyStart::Armed
    }

    /// Close the marking window and check the snapshot.
    ///
    /// The check is skipped if a zone was created during the window or
    /// incremental GC has become unsafe. All verifier state is torn down
    /// whatever the result.
    pub fn end_verify_pre_barriers(&mut self) -> Result<VerifyOutcome, BarrierViolation> {
        let mut pass = match std::mem::take(&mut self.verifier) {
            VerifierState::Pre(pass) => pass,
            other => {
                self.verifier = other;
                return Ok(VerifyOutcome::NotActive);
            }
        };

        let zone_created = self.heap.zones().any(|(_, zone)| !zone.needs_barrier());
        for zone in self.heap.zones_mut() {
            zone.set_needs_barrier(false);
        }
        self.incremental_state = IncrementalState::NotActive;

        let result = if zone_created {
            Ok(VerifyOutcome::CheckSkipped(SkipReason::ZoneCreated))
        } else if let IncrementalSafety::Unsafe(reason) = self.incremental_safety() {
            Ok(VerifyOutcome::CheckSkipped(SkipReason::IncrementalUnsafe(
                reason,
            )))
        } else {
            let _session = TraceSession::new(&self.heap_state, HeapState::Tracing);
            check_snapshot(
                &self.heap,
                &mut pass.arena,
                self.config.max_verifier_edges,
            )
        };

        self.marker.reset();
        self.heap.clear_marks();
        self.heap.nursery_mut().enable();

        match &result {
            Ok(VerifyOutcome::Verified { nodes, edges_checked }) => {
                self.heap.stats().record_verifier_finish(*edges_checked);
                log::debug!(
                    "pre-barrier verifier (gc #{}): {nodes} nodes, {edges_checked} edges checked",
                    pass.gc_number
                );
            }
            Ok(outcome) => {
                self.heap.stats().record_verifier_skip();
                log::warn!("pre-barrier verifier: check skipped: {outcome:?}");
            }
            Err(violation) => {
                self.heap.stats().record_violation();
                log::debug!("pre-barrier verifier (gc #{}): {violation}", pass.gc_number);
            }
        }
        result
    }

    fn skip_start(&self, reason: SkipReason) -> VerifyStart {
        log::debug!("verifier not started: {reason}");
        self.heap.stats().record_verifier_skip();
        VerifyStart::Skipped(reason)
    }
}
