#![forbid(unsafe_code)]

//! State addresses: which reactive cell a binding reads or writes.
//!
//! A [`StateAddress`] pairs an interned path with the list index that pins
//! its wildcards; an [`AbsoluteStateAddress`] additionally names the state
//! scope. Both are plain values: equality and hashing look only at the path
//! id, the list index handle and (for the absolute form) the scope name, so
//! they can key change-notification tables directly.
//!
//! # Invariants
//!
//! 1. A path with `n > 0` wildcards carries a list index of depth `n`.
//! 2. A positional path `$k` carries a list index of depth `>= k`.
//! 3. Plain paths may carry no list index.
//!
//! The checked constructors enforce these; [`StateAddress::new_unchecked`]
//! exists for callers that have already validated the pair.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::{CoreError, Result};
use crate::list_index::{ListIndexArena, ListIndexId};
use crate::path::{PathId, PathInfo};

/// A `(path, list index)` pair identifying one reactive cell.
#[derive(Clone)]
pub struct StateAddress {
    path_info: Rc<PathInfo>,
    list_index: Option<ListIndexId>,
}

impl StateAddress {
    /// Build an address, validating the list index depth against the path.
    pub fn new(
        path_info: Rc<PathInfo>,
        list_index: Option<ListIndexId>,
        arena: &ListIndexArena,
    ) -> Result<Self> {
        let required = path_info.required_depth();
        match list_index {
            None if required > 0 => {
                return Err(CoreError::MissingListIndex {
                    path: path_info.path().to_owned(),
                });
            }
            None => {}
            Some(id) => {
                let depth = arena.depth(id)?;
                let ok = if path_info.index_accessor().is_some() {
                    depth >= required
                } else {
                    path_info.wildcard_count() == 0 || depth == required
                };
                if !ok {
                    return Err(CoreError::ListIndexDepthMismatch {
                        path: path_info.path().to_owned(),
                        wildcard_count: path_info.wildcard_count(),
                        depth,
                    });
                }
            }
        }
        Ok(Self {
            path_info,
            list_index,
        })
    }

    /// Build an address without validation.
    #[must_use]
    pub fn new_unchecked(path_info: Rc<PathInfo>, list_index: Option<ListIndexId>) -> Self {
        Self {
            path_info,
            list_index,
        }
    }

    #[inline]
    #[must_use]
    pub fn path_info(&self) -> &Rc<PathInfo> {
        &self.path_info
    }

    #[inline]
    #[must_use]
    pub fn path_id(&self) -> PathId {
        self.path_info.id()
    }

    #[inline]
    #[must_use]
    pub fn list_index(&self) -> Option<ListIndexId> {
        self.list_index
    }

    /// Attach a scope name.
    #[must_use]
    pub fn absolute(self, state_name: impl Into<Rc<str>>) -> AbsoluteStateAddress {
        AbsoluteStateAddress {
            state_name: state_name.into(),
            address: self,
        }
    }
}

impl PartialEq for StateAddress {
    fn eq(&self, other: &Self) -> bool {
        self.path_info.id() == other.path_info.id() && self.list_index == other.list_index
    }
}

impl Eq for StateAddress {}

impl Hash for StateAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path_info.id().hash(state);
        self.list_index.hash(state);
    }
}

impl fmt::Debug for StateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateAddress")
            .field("path", &self.path_info.path())
            .field("list_index", &self.list_index)
            .finish()
    }
}

/// A [`StateAddress`] qualified by the name of its state scope.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AbsoluteStateAddress {
    state_name: Rc<str>,
    address: StateAddress,
}

impl AbsoluteStateAddress {
    #[must_use]
    pub fn new(state_name: impl Into<Rc<str>>, address: StateAddress) -> Self {
        Self {
            state_name: state_name.into(),
            address,
        }
    }

    #[inline]
    #[must_use]
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> &StateAddress {
        &self.address
    }

    #[inline]
    #[must_use]
    pub fn path_info(&self) -> &Rc<PathInfo> {
        self.address.path_info()
    }

    #[inline]
    #[must_use]
    pub fn list_index(&self) -> Option<ListIndexId> {
        self.address.list_index()
    }
}

impl fmt::Debug for AbsoluteStateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbsoluteStateAddress")
            .field("state", &&*self.state_name)
            .field("path", &self.address.path_info.path())
            .field("list_index", &self.address.list_index)
            .finish()
    }
}
