//! Heap sessions and incremental collection state.
//!
//! Anything that walks the heap (a collection, a verifier snapshot, a full
//! heap trace) runs inside a [`TraceSession`]. The session records what the
//! heap is busy with and puts the previous state back when it ends, even on
//! unwind.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// What the heap is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeapState {
    /// Mutator running; no walk in progress.
    #[default]
    Idle,
    /// A non-collecting heap walk.
    Tracing,
    /// Inside a major collection step.
    MajorCollecting,
    /// Inside a minor collection.
    MinorCollecting,
}

impl HeapState {
    /// Whether any heap walk is in progress.
    #[inline]
    pub fn is_busy(self) -> bool {
        self != HeapState::Idle
    }
}

/// Scope guard for a heap walk.
pub struct TraceSession {
    state: Rc<Cell<HeapState>>,
    prev: HeapState,
}

impl TraceSession {
    /// Enter `state`.
    pub fn new(state: &Rc<Cell<HeapState>>, next: HeapState) -> Self {
        let prev = state.replace(next);
        debug_assert!(
            !prev.is_busy(),
            "heap walk {next:?} started while {prev:?} is in progress"
        );
        Self {
            state: Rc::clone(state),
            prev,
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.state.set(self.prev);
    }
}

/// Progress of an incremental major collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncrementalState {
    /// No incremental collection or marking window is open.
    #[default]
    NotActive,
    /// Roots are being marked.
    MarkRoots,
    /// Marking; barriers are on in the collecting zones.
    Mark,
    /// Sweeping.
    Sweep,
}

/// Why incremental collection is not possible right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeReason {
    /// Incremental GC is switched off for the runtime.
    IncrementalDisabled,
    /// Atoms are pinned by a keep-atoms section.
    KeepAtoms,
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafeReason::IncrementalDisabled => f.write_str("incremental GC disabled"),
            UnsafeReason::KeepAtoms => f.write_str("keepAtoms set"),
        }
    }
}

/// Whether an incremental collection could run now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalSafety {
    /// Incremental collection may proceed.
    Safe,
    /// It may not, for the given reason.
    Unsafe(UnsafeReason),
}

impl IncrementalSafety {
    /// Whether incremental collection is allowed.
    #[inline]
    pub fn is_safe(self) -> bool {
        matches!(self, IncrementalSafety::Safe)
    }
}
