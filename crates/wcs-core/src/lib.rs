#![forbid(unsafe_code)]

//! Addressing core for the wcs state runtime.
//!
//! - [`path`]: interned dotted paths with wildcard segments.
//! - [`list_index`]: arena-backed hierarchical list indices.
//! - [`list_diff`]: identity-preserving diff between two list values.
//! - [`address`]: `(path, list index)` cell addresses.
//! - [`loop_context`]: nesting-checked stack of active repetitions.
//! - [`deps`]: per-path versions, dependency edges, computed-value cache.
//!
//! Nothing here knows about document trees; `wcs-runtime` combines these
//! pieces with `wcs-dom` to reconcile rendered content.

pub mod address;
pub mod deps;
pub mod error;
pub mod list_diff;
pub mod list_index;
pub mod loop_context;
pub mod path;

pub use address::{AbsoluteStateAddress, StateAddress};
pub use deps::{CachedValue, ComputedCache, DependencyGraph, VersionMap};
pub use error::{CoreError, Result};
pub use list_diff::{ItemFingerprint, ListDiff, create_list_diff};
pub use list_index::{ListIndexArena, ListIndexId};
pub use loop_context::{
    DEFAULT_MAX_LOOP_DEPTH, LoopChainGuard, LoopContext, LoopContextGuard, LoopContextStack,
};
pub use path::{PathId, PathInfo, PathRegistry, WILDCARD};
