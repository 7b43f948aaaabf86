//! Sable garbage collector core.
//!
//! A precise, incremental, generational tracing collector together with the
//! debug-time verifiers that check its write barriers.
//!
//! # Architecture
//!
//! - **Heap** ([`heap`]): an arena of typed cells grouped into zones and
//!   compartments. Objects may be allocated in the nursery; everything else
//!   is tenured.
//!
//! - **Tracing** ([`trace`]): every reference is reported to a [`Tracer`] as
//!   an [`Edge`]. Marking, snapshotting and checking are all tracers.
//!
//! - **Roots** ([`roots`]): stack roots, persistent roots, wrapper maps,
//!   runtime singletons, compartment tables and embedder callbacks,
//!   enumerated in a fixed order by [`RootEnumerator`].
//!
//! - **Collection** ([`collector`]): minor GC promotes reachable nursery
//!   cells in place; major GC marks incrementally (black, then gray) and
//!   sweeps unmarked tenured cells in the collecting zones.
//!
//! - **Barrier verification** ([`verify`]): the pre-barrier verifier
//!   snapshots the heap graph, runs a marking window with barriers on and
//!   checks that every snapshot edge still present was either unchanged or
//!   had its target marked. The post-barrier verifier checks that every
//!   tenured→nursery edge in the heap was recorded in the store buffer.
//!
//! # Write Barriers
//!
//! [`GcRuntime::set_slot`] runs both barriers: the incremental pre-barrier
//! marks the overwritten target while its zone needs barriers, and the
//! generational post-barrier records tenured→nursery stores in the store
//! buffer. [`GcRuntime::set_slot_unbarriered`] skips both and exists so that
//! tests can inject barrier bugs.
//!
//! # Usage
//!
//! ```ignore
//! use sable_gc::{CellKind, GcConfig, GcRuntime, GcScope, Value};
//!
//! let mut rt = GcRuntime::new(GcConfig::default())?;
//! let (_, compartment) = rt.heap_mut().new_zone_with_compartment();
//!
//! let obj = rt.alloc(CellKind::Object, compartment, [Value::Undefined]);
//! let _root = rt.roots().main_thread().root_object(obj);
//!
//! rt.collect(GcScope::All);
//! assert!(rt.heap().is_live(obj));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod collector;
pub mod config;
pub mod heap;
pub mod roots;
pub mod runtime;
pub mod trace;
pub mod verify;

mod stats;

// Re-exports for convenient access
pub use collector::{CollectionResult, GcProgress, GcScope, HeapState, IncrementalSafety};
pub use config::{ConfigError, GcConfig, ViolationAction, ZealMode, ZealSettings};
pub use heap::{CellId, CellKind, CompartmentId, GcHeap, Value, ZoneId};
pub use roots::{RootEnumerator, RootsSource, TraceOrMark};
pub use runtime::GcRuntime;
pub use stats::GcStats;
pub use trace::{Edge, EdgeLocation, RootCategory, Trace, Tracer};
pub use verify::{BarrierViolation, VerifierType, VerifyOutcome, VerifyStart};

/// Mark color.
///
/// Black cells are reachable from black roots; gray cells were reached
/// only from gray roots, which are marked in a separate, later phase.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Reachable from black roots.
    Black = 0,
    /// Reachable only from gray roots.
    Gray = 1,
}

/// Generation identifier for generational collection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Generation {
    /// Young generation: collected by every minor GC.
    Nursery = 0,
    /// Old generation: collected by major GC only.
    Tenured = 1,
}

impl Generation {
    /// Check if this generation is in the young space.
    #[inline]
    pub fn is_young(self) -> bool {
        matches!(self, Generation::Nursery)
    }

    /// Check if this generation is in the old space.
    #[inline]
    pub fn is_old(self) -> bool {
        matches!(self, Generation::Tenured)
    }
}
