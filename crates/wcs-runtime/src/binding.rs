#![forbid(unsafe_code)]

//! Binding descriptors and the binding table.
//!
//! A binding ties one document node to one state path. Leaf kinds copy the
//! value onto the node; structural kinds (`For`, `If`) own content blocks
//! rendered after their anchor node.
//!
//! # Invariants
//!
//! 1. Ids are handed out in registration order and never reused, so sorting
//!    ids yields registration order.
//! 2. `bindings_for(state, path)` lists live bindings only, in registration
//!    order.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use wcs_core::{PathId, PathInfo};
use wcs_dom::NodeId;

use crate::content::ContentId;
use crate::template::TemplateId;

/// Handle to a registered binding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u32);

impl BindingId {
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingId({})", self.0)
    }
}

/// What a binding does with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Replace the character data of a text or comment node.
    Text,
    /// Set a property on the node to the raw value.
    Property { name: Rc<str> },
    /// Set an attribute to the value's display form; `null` and `false`
    /// remove it, `true` sets it empty.
    Attribute { name: Rc<str> },
    /// Render one block of `template` per list element after the anchor.
    For { template: TemplateId },
    /// Render one block of `template` while the value is truthy (falsy when
    /// `negate` is set).
    If { template: TemplateId, negate: bool },
}

impl BindingKind {
    /// `For` and `If` bindings own content blocks.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::For { .. } | Self::If { .. })
    }

    #[must_use]
    pub fn template(&self) -> Option<&TemplateId> {
        match self {
            Self::For { template } | Self::If { template, .. } => Some(template),
            _ => None,
        }
    }
}

/// A registered binding.
#[derive(Debug, Clone)]
pub struct BindingDescriptor {
    pub id: BindingId,
    pub path_info: Rc<PathInfo>,
    pub state_name: Rc<str>,
    pub node: NodeId,
    pub kind: BindingKind,
    /// Content block the binding was instantiated with, `None` at top level.
    pub owner: Option<ContentId>,
}

impl BindingDescriptor {
    #[must_use]
    pub fn path(&self) -> &str {
        self.path_info.path()
    }

    /// Bindings on `$n` paths, re-applied when their block moves.
    #[must_use]
    pub fn is_positional(&self) -> bool {
        self.path_info.index_accessor().is_some()
    }
}

/// All live bindings, indexed by id and by `(scope, path)`.
#[derive(Debug, Default)]
pub struct BindingTable {
    next_id: u32,
    bindings: AHashMap<BindingId, BindingDescriptor>,
    by_path: AHashMap<(Rc<str>, PathId), Vec<BindingId>>,
}

impl BindingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path_info: Rc<PathInfo>,
        state_name: Rc<str>,
        node: NodeId,
        kind: BindingKind,
        owner: Option<ContentId>,
    ) -> BindingId {
        let id = BindingId(self.next_id);
        self.next_id += 1;
        self.by_path
            .entry((Rc::clone(&state_name), path_info.id()))
            .or_default()
            .push(id);
        self.bindings.insert(
            id,
            BindingDescriptor {
                id,
                path_info,
                state_name,
                node,
                kind,
                owner,
            },
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: BindingId) -> Option<&BindingDescriptor> {
        self.bindings.get(&id)
    }

    pub fn remove(&mut self, id: BindingId) -> Option<BindingDescriptor> {
        let desc = self.bindings.remove(&id)?;
        let key = (Rc::clone(&desc.state_name), desc.path_info.id());
        if let Some(ids) = self.by_path.get_mut(&key) {
            ids.retain(|b| *b != id);
            if ids.is_empty() {
                self.by_path.remove(&key);
            }
        }
        Some(desc)
    }

    /// Live bindings on `path` in scope `state`, in registration order.
    #[must_use]
    pub fn bindings_for(&self, state: &str, path: PathId) -> &[BindingId] {
        self.by_path
            .get(&(Rc::from(state), path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Live bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BindingDescriptor> {
        let mut all: Vec<_> = self.bindings.values().collect();
        all.sort_unstable_by_key(|d| d.id);
        all.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wcs_core::PathRegistry;
    use wcs_dom::Document;

    #[test]
    fn registration_order_and_lookup() {
        let reg = PathRegistry::new();
        let mut doc = Document::new();
        let node = doc.create_text("");
        let mut table = BindingTable::new();
        let state: Rc<str> = Rc::from("default");
        let name = reg.get("user.name");

        let a = table.register(Rc::clone(&name), Rc::clone(&state), node, BindingKind::Text, None);
        let b = table.register(Rc::clone(&name), Rc::clone(&state), node, BindingKind::Text, None);
        assert!(a < b);
        assert_eq!(table.bindings_for("default", name.id()), &[a, b]);
        assert!(table.bindings_for("other", name.id()).is_empty());

        table.remove(a);
        assert_eq!(table.bindings_for("default", name.id()), &[b]);
        assert!(table.get(a).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn positional_and_structural_flags() {
        let reg = PathRegistry::new();
        let mut doc = Document::new();
        let node = doc.create_comment("");
        let mut table = BindingTable::new();
        let id = table.register(
            reg.get("$1"),
            Rc::from("default"),
            node,
            BindingKind::For {
                template: TemplateId::new("row"),
            },
            None,
        );
        let desc = table.get(id).unwrap();
        assert!(desc.is_positional());
        assert!(desc.kind.is_structural());
        assert_eq!(desc.kind.template().map(TemplateId::as_str), Some("row"));
    }
}
