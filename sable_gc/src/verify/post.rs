//! Post-barrier (generational) verifier.
//!
//! Minor GC only finds tenured→nursery edges through the store buffer. This
//! pass checks that the buffer is complete:
//!
//! 1. **Start**: empty the nursery so every nursery edge that follows was
//!    created inside the window.
//! 2. **End**: collect the location of every tenured→nursery edge the store
//!    buffer knows about, then walk every tenured cell in the heap,
//!    reachable or not, and require each object edge into the nursery to
//!    be in that set.

use crate::collector::{HeapState, IncrementalState, TraceSession};
use crate::heap::GcHeap;
use crate::heap::cell::CellKind;
use crate::runtime::GcRuntime;
use crate::trace::{Edge, EdgeLocation, Tracer};
use crate::verify::{
    BarrierViolation, SkipReason, VerifierState, VerifierType, VerifyOutcome, VerifyStart,
};

use rustc_hash::FxHashSet;

/// An armed post-barrier pass.
#[derive(Debug)]
pub struct PostBarrierVerifier {
    /// Scheduler opportunities seen since arming.
    pub(crate) count: u32,
    gc_number: u64,
}

impl PostBarrierVerifier {
    pub(crate) fn new(gc_number: u64) -> Self {
        Self {
            count: 0,
            gc_number,
        }
    }

    /// GC number the pass was armed under.
    pub fn gc_number(&self) -> u64 {
        self.gc_number
    }
}

/// Records store-buffer edges from tenured cells into the nursery.
struct CollectingTracer<'a> {
    heap: &'a GcHeap,
    edges: FxHashSet<EdgeLocation>,
}

impl Tracer for CollectingTracer<'_> {
    fn on_edge(&mut self, edge: Edge) {
        let from_tenured = edge
            .location
            .holder()
            .is_some_and(|holder| !self.heap.is_in_nursery(holder));
        if from_tenured && self.heap.is_in_nursery(edge.target) {
            self.edges.insert(edge.location);
        }
    }
}

/// Looks up every object edge into the nursery. Keeps the first miss.
struct CheckingTracer<'a> {
    heap: &'a GcHeap,
    edges: &'a FxHashSet<EdgeLocation>,
    checked: usize,
    missing: Option<Edge>,
}

impl Tracer for CheckingTracer<'_> {
    fn on_edge(&mut self, edge: Edge) {
        if edge.kind != CellKind::Object || !self.heap.is_in_nursery(edge.target) {
            return;
        }
        self.checked += 1;
        if self.missing.is_none() && !self.edges.contains(&edge.location) {
            self.missing = Some(edge);
        }
    }
}

fn check_store_buffer(heap: &GcHeap) -> Result<VerifyOutcome, BarrierViolation> {
    let mut collector = CollectingTracer {
        heap,
        edges: FxHashSet::default(),
    };
    heap.store_buffer().mark_all(heap, &mut collector);
    let recorded = collector.edges;

    let mut checker = CheckingTracer {
        heap,
        edges: &recorded,
        checked: 0,
        missing: None,
    };
    let mut cells = 0;
    for kind in CellKind::ALL {
        for id in heap.tenured_cells(kind) {
            cells += 1;
            heap.trace_children(id, &mut checker);
            if let Some(edge) = checker.missing {
                let source = edge.location.holder().unwrap_or(id);
                return Err(BarrierViolation::MissingStoreBufferEdge {
                    label: edge.name,
                    source,
                    location: edge.location,
                    target: edge.target,
                });
            }
        }
    }
    Ok(VerifyOutcome::Verified {
        nodes: cells,
        edges_checked: checker.checked,
    })
}

impl GcRuntime {
    /// Empty the nursery and open a post-barrier window.
    ///
    /// No-op if a verifier is armed, an incremental GC is in progress, or
    /// generational collection is off.
    pub fn start_verify_post_barriers(&mut self) -> VerifyStart {
        let reason = match self.verifier.active() {
            Some(VerifierType::PostBarrier) => Some(SkipReason::AlreadyActive),
            Some(VerifierType::PreBarrier) => Some(SkipReason::OtherVerifierActive),
            None if self.incremental_state != IncrementalState::NotActive => {
                Some(SkipReason::IncrementalGcActive)
            }
            None if !self.heap.nursery().is_enabled() => Some(SkipReason::GenerationalDisabled),
            None => None,
        };
        if let Some(reason) = reason {
            log::debug!("post-barrier verifier not started: {reason}");
            self.heap.stats().record_verifier_skip();
            return VerifyStart::Skipped(reason);
        }

        self.minor_gc();
        self.gc_number += 1;
        self.heap.stats().record_verifier_start();
        log::debug!("post-barrier verifier armed (gc #{})", self.gc_number);
        self.verifier = VerifierState::Post(PostBarrierVerifier::new(self.gc_number));
        VerifyStart::Armed
    }

    /// Close the window and check the store buffer against the heap.
    pub fn end_verify_post_barriers(&mut self) -> Result<VerifyOutcome, BarrierViolation> {
        let pass = match std::mem::take(&mut self.verifier) {
            VerifierState::Post(pass) => pass,
            other => {
                self.verifier = other;
                return Ok(VerifyOutcome::NotActive);
            }
        };

        let result = {
            let _session = TraceSession::new(&self.heap_state, HeapState::Tracing);
            check_store_buffer(&self.heap)
        };

        match &result {
            Ok(VerifyOutcome::Verified {
                nodes,
                edges_checked,
            }) => {
                self.heap.stats().record_verifier_finish(*edges_checked);
                log::debug!(
                    "post-barrier verifier (gc #{}): {nodes} cells walked, {edges_checked} nursery edges checked",
                    pass.gc_number
                );
            }
            Ok(_) => {}
            Err(violation) => {
                self.heap.stats().record_violation();
                log::debug!("post-barrier verifier (gc #{}): {violation}", pass.gc_number);
            }
        }
        result
    }
}
