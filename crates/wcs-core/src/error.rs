#![forbid(unsafe_code)]

//! Errors raised by the addressing core.
//!
//! Every variant except [`CoreError::StaleListIndex`] signals a template or
//! integration defect (a wildcard path used outside any repetition, a loop
//! pushed at the wrong depth). They are meant to surface while authoring, so
//! callers propagate them instead of recovering.

use std::fmt;

/// Errors from path resolution, list indices and loop contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A wildcard (or positional) path was resolved with no enclosing loop
    /// context that covers its wildcards.
    UnresolvableAddress { path: String },
    /// A loop context was pushed at the wrong depth or under the wrong parent.
    InvalidNesting {
        path: String,
        expected_parent: Option<String>,
    },
    /// A loop context or wildcard address was built without a list index.
    MissingListIndex { path: String },
    /// The list index chain depth does not match the path's wildcard count.
    ListIndexDepthMismatch {
        path: String,
        wildcard_count: usize,
        depth: usize,
    },
    /// The loop context stack hit its configured maximum depth.
    LoopDepthExceeded { max_depth: usize },
    /// A list index handle refers to a released arena slot.
    StaleListIndex,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvableAddress { path } => {
                write!(f, "no enclosing loop context for wildcard path '{path}'")
            }
            Self::InvalidNesting {
                path,
                expected_parent: Some(parent),
            } => write!(
                f,
                "loop context '{path}' is not a direct child of active loop '{parent}'"
            ),
            Self::InvalidNesting {
                path,
                expected_parent: None,
            } => write!(
                f,
                "loop context '{path}' must have exactly one wildcard at top level"
            ),
            Self::MissingListIndex { path } => {
                write!(f, "address for '{path}' requires a list index")
            }
            Self::ListIndexDepthMismatch {
                path,
                wildcard_count,
                depth,
            } => write!(
                f,
                "path '{path}' has {wildcard_count} wildcard(s) but list index depth is {depth}"
            ),
            Self::LoopDepthExceeded { max_depth } => {
                write!(f, "loop context nesting exceeded maximum depth {max_depth}")
            }
            Self::StaleListIndex => write!(f, "list index handle has been released"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Convenience alias for core results.
pub type Result<T> = std::result::Result<T, CoreError>;
