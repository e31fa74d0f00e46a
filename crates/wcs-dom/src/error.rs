#![forbid(unsafe_code)]

//! Errors raised by document operations.

use std::fmt;

use crate::node::NodeId;

/// Errors from tree manipulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The handle refers to a destroyed node.
    StaleNode(NodeId),
    /// A sibling-relative operation was given a detached reference node.
    NoParent(NodeId),
    /// The insertion would put a node inside itself, under a character node,
    /// or move the document root.
    HierarchyRequest { parent: NodeId, child: NodeId },
    /// Text was read or written on a node that holds no character data.
    NotACharacterNode(NodeId),
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleNode(id) => write!(f, "node {id:?} has been destroyed"),
            Self::NoParent(id) => write!(f, "reference node {id:?} is not attached"),
            Self::HierarchyRequest { parent, child } => {
                write!(f, "cannot insert {child:?} under {parent:?}")
            }
            Self::NotACharacterNode(id) => {
                write!(f, "node {id:?} is not a text or comment node")
            }
        }
    }
}

impl std::error::Error for DomError {}

/// Convenience alias for document results.
pub type Result<T> = std::result::Result<T, DomError>;
