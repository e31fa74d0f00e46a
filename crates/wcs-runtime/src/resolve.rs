#![forbid(unsafe_code)]

//! Binding address resolution.
//!
//! A binding on a plain path addresses `(path, None)`. A binding on a
//! wildcard or `$n` path takes its list index from the nearest loop context
//! found by walking up from the bound node; every top-level node of a
//! repeated block is registered with its block's context, so the walk stops
//! at the innermost enclosing repetition.
//!
//! # Invariants
//!
//! 1. A wildcard binding resolves only against a context that shares all of
//!    its wildcards (`calc_wildcard_len >= wildcard_count`); its list index is
//!    the context's index trimmed to the binding's depth.
//! 2. `$n` bindings keep the full chain of the nearest context.
//! 3. Cached addresses are dropped whenever the owning block is recycled or
//!    destroyed.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | No context on the ancestor chain | Wildcard binding outside any repetition | `CoreError::UnresolvableAddress` |
//! | Context shares too few wildcards | Binding path from another list | `CoreError::UnresolvableAddress` |

use std::rc::Rc;

use ahash::AHashMap;
use wcs_core::{CoreError, ListIndexArena, LoopContext, PathRegistry, StateAddress};
use wcs_dom::{Document, NodeId};

use crate::binding::{BindingDescriptor, BindingId};
use crate::error::Result;

/// Loop context registered per node, read by the ancestor walk.
pub type ContextTable = AHashMap<NodeId, LoopContext>;

/// Nearest loop context on `node`'s inclusive ancestor chain.
pub fn context_for(
    doc: &Document,
    contexts: &ContextTable,
    node: NodeId,
) -> Result<Option<LoopContext>> {
    let mut cursor = Some(node);
    while let Some(n) = cursor {
        if let Some(ctx) = contexts.get(&n) {
            return Ok(Some(ctx.clone()));
        }
        cursor = doc.parent(n)?;
    }
    Ok(None)
}

/// Resolve `binding` without consulting any cache.
pub fn resolve_binding(
    doc: &Document,
    contexts: &ContextTable,
    registry: &PathRegistry,
    arena: &ListIndexArena,
    binding: &BindingDescriptor,
) -> Result<StateAddress> {
    let info = &binding.path_info;
    if !info.needs_list_index() {
        return Ok(StateAddress::new_unchecked(Rc::clone(info), None));
    }
    let unresolvable = || CoreError::UnresolvableAddress {
        path: info.path().to_owned(),
    };
    let ctx = context_for(doc, contexts, binding.node)?.ok_or_else(unresolvable)?;

    let list_index = if info.index_accessor().is_some() {
        ctx.list_index()
    } else {
        let count = info.wildcard_count();
        if registry.calc_wildcard_len(info, ctx.path_info()) < count {
            return Err(unresolvable().into());
        }
        arena
            .ancestor_at(ctx.list_index(), count - 1)
            .ok_or_else(unresolvable)?
    };
    Ok(StateAddress::new(Rc::clone(info), Some(list_index), arena)?)
}

/// Resolved addresses per binding.
#[derive(Debug, Default)]
pub struct AddressCache {
    by_binding: AHashMap<BindingId, StateAddress>,
}

impl AddressCache {
    #[must_use]
    pub fn get(&self, id: BindingId) -> Option<&StateAddress> {
        self.by_binding.get(&id)
    }

    pub fn insert(&mut self, id: BindingId, address: StateAddress) {
        self.by_binding.insert(id, address);
    }

    pub fn invalidate(&mut self, id: BindingId) {
        self.by_binding.remove(&id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_binding.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_binding.is_empty()
    }
}
