//! Write-barrier verification.
//!
//! Two debug-time verifiers check that the mutator's write barriers are
//! doing their job:
//!
//! - [`pre`]: snapshots the reachable heap, opens a marking window with
//!   barriers on, and at the end checks that every snapshot edge either
//!   still exists or had its target marked by the pre-barrier.
//! - [`post`]: at the end of a window, checks that every tenured→nursery
//!   edge in the heap was recorded in the store buffer.
//!
//! At most one verifier is armed at a time. The pre-barrier verifier needs
//! generational allocation off; the post-barrier verifier needs it on.
//! [`scheduler`] drives both from the zeal configuration.
//!
//! ```text
//!            start_verify_*            end_verify_*
//!   Idle ───────────────────▶ Armed ───────────────▶ Idle
//!     │                                                ▲
//!     └── snapshot arena exhausted ── Aborted ─────────┘
//! ```

pub mod arena;
pub mod post;
pub mod pre;
pub mod scheduler;

use crate::collector::UnsafeReason;
use crate::heap::cell::{CellId, CellKind};
use crate::trace::EdgeLocation;

use std::fmt;

pub use post::PostBarrierVerifier;
pub use pre::PreBarrierVerifier;

/// Which verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifierType {
    /// Incremental (SATB) pre-barrier verifier.
    PreBarrier,
    /// Generational post-barrier verifier.
    PostBarrier,
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierType::PreBarrier => f.write_str("pre-barrier verifier"),
            VerifierType::PostBarrier => f.write_str("post-barrier verifier"),
        }
    }
}

/// The runtime's verifier slot.
#[derive(Debug, Default)]
pub enum VerifierState {
    /// No pass armed.
    #[default]
    Idle,
    /// Pre-barrier pass armed.
    Pre(PreBarrierVerifier),
    /// Post-barrier pass armed.
    Post(PostBarrierVerifier),
}

impl VerifierState {
    /// The armed verifier, if any.
    pub fn active(&self) -> Option<VerifierType> {
        match self {
            VerifierState::Idle => None,
            VerifierState::Pre(_) => Some(VerifierType::PreBarrier),
            VerifierState::Post(_) => Some(VerifierType::PostBarrier),
        }
    }
}

/// Why a pass was not started or not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The same verifier is already armed.
    AlreadyActive,
    /// The other verifier is armed.
    OtherVerifierActive,
    /// An incremental collection is in progress.
    IncrementalGcActive,
    /// Incremental collection is unsafe right now.
    IncrementalUnsafe(UnsafeReason),
    /// Generational collection is off.
    GenerationalDisabled,
    /// A zone was created while the pass was armed; its cells were never
    /// under barriers.
    ZoneCreated,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyActive => f.write_str("verifier already active"),
            SkipReason::OtherVerifierActive => f.write_str("other verifier active"),
            SkipReason::IncrementalGcActive => f.write_str("incremental GC in progress"),
            SkipReason::IncrementalUnsafe(reason) => write!(f, "incremental GC unsafe: {reason}"),
            SkipReason::GenerationalDisabled => f.write_str("generational GC disabled"),
            SkipReason::ZoneCreated => f.write_str("zone created during verification"),
        }
    }
}

/// Why a pass was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The snapshot did not fit in the configured arena.
    ArenaExhausted,
}

/// Result of starting a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStart {
    /// The pass is armed.
    Armed,
    /// Nothing happened.
    Skipped(SkipReason),
    /// The pass was abandoned and all state rolled back.
    Aborted(AbortReason),
}

/// Result of ending a pass without a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The check ran and passed.
    Verified {
        /// Snapshot nodes (pre) or cells walked (post).
        nodes: usize,
        /// Edges checked.
        edges_checked: usize,
    },
    /// The pass was torn down without checking.
    CheckSkipped(SkipReason),
    /// No pass of this type was armed.
    NotActive,
}

/// A barrier invariant does not hold. The heap is already unsound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierViolation {
    /// A snapshot edge was overwritten but its old target is unmarked.
    UnmarkedEdge {
        /// Edge label.
        label: &'static str,
        /// Holder of the edge at snapshot time.
        source: CellId,
        /// Where the edge was.
        location: EdgeLocation,
        /// The unmarked target.
        target: CellId,
        /// Kind of the target.
        kind: CellKind,
    },
    /// A tenured→nursery edge is missing from the store buffer.
    MissingStoreBufferEdge {
        /// Edge label.
        label: &'static str,
        /// Tenured holder.
        source: CellId,
        /// Where the edge is.
        location: EdgeLocation,
        /// Nursery target.
        target: CellId,
    },
}

impl BarrierViolation {
    /// The verifier that found it.
    pub fn verifier(&self) -> VerifierType {
        match self {
            BarrierViolation::UnmarkedEdge { .. } => VerifierType::PreBarrier,
            BarrierViolation::MissingStoreBufferEdge { .. } => VerifierType::PostBarrier,
        }
    }

    /// Edge label.
    pub fn label(&self) -> &'static str {
        match self {
            BarrierViolation::UnmarkedEdge { label, .. }
            | BarrierViolation::MissingStoreBufferEdge { label, .. } => label,
        }
    }

    /// Source cell of the edge.
    pub fn source(&self) -> CellId {
        match self {
            BarrierViolation::UnmarkedEdge { source, .. }
            | BarrierViolation::MissingStoreBufferEdge { source, .. } => *source,
        }
    }

    /// Target cell of the edge.
    pub fn target(&self) -> CellId {
        match self {
            BarrierViolation::UnmarkedEdge { target, .. }
            | BarrierViolation::MissingStoreBufferEdge { target, .. } => *target,
        }
    }
}

impl fmt::Display for BarrierViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierViolation::UnmarkedEdge {
                label,
                source,
                location,
                target,
                kind,
            } => write!(
                f,
                "[barrier verifier] Unmarked edge: {label} {source} @ {location} -> {target} ({kind})"
            ),
            BarrierViolation::MissingStoreBufferEdge {
                label,
                source,
                location,
                target,
            } => write!(
                f,
                "[post-barrier verifier] Missing edge @ {location} to {target} ({label} from {source})"
            ),
        }
    }
}

impl std::error::Error for BarrierViolation {}
