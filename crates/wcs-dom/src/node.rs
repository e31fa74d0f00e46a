#![forbid(unsafe_code)]

//! Node handles and node kinds.

use std::fmt;
use std::rc::Rc;

/// Generational handle to a node in a [`Document`](crate::Document).
///
/// Handles are plain copyable values; a handle to a destroyed node is
/// rejected with [`DomError::StaleNode`](crate::DomError::StaleNode) rather
/// than aliasing whatever reuses the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.slot, self.generation)
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The document root. Exactly one per document, never movable.
    Document,
    Element { tag: Rc<str> },
    Text,
    Comment,
    /// A detached container whose children move out when it is inserted.
    Fragment,
}

impl NodeKind {
    /// Text and comment nodes hold character data and have no children.
    #[must_use]
    pub fn is_character_data(&self) -> bool {
        matches!(self, Self::Text | Self::Comment)
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Element { tag } => Some(tag),
            _ => None,
        }
    }
}
