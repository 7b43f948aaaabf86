//! Garbage collection algorithms.
//!
//! - [`minor`]: nursery collection, promoting survivors in place
//! - [`major`]: incremental mark-sweep over a set of zones
//! - [`marker`]: the mark stack shared by major GC, the pre-barrier and the
//!   pre-barrier verifier's marking window
//! - [`session`]: heap-walk guards and incremental state

pub mod major;
pub mod marker;
pub mod minor;
pub mod session;

pub use major::{CollectionResult, GcProgress, GcScope, MajorCollection};
pub use marker::{DrainResult, GcMarker, MarkingTracer};
pub use minor::{MinorCollector, MinorResult};
pub use session::{HeapState, IncrementalSafety, IncrementalState, TraceSession, UnsafeReason};
