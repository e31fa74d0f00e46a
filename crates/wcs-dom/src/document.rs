#![forbid(unsafe_code)]

//! Arena-backed document tree.
//!
//! Nodes live in a slot arena and link to each other through parent,
//! first/last child and sibling handles, so every structural operation
//! (insert, move, remove) is O(1) apart from the ancestor walk that guards
//! against cycles.
//!
//! # Invariants
//!
//! 1. A node has at most one parent; the sibling chain of a parent visits
//!    exactly its children, in order, and `child_count` matches it.
//! 2. Inserting a [`NodeKind::Fragment`] moves its children and leaves the
//!    fragment empty and detached.
//! 3. Inserting an attached node moves it: it is detached from its old
//!    parent first.
//! 4. The document root is never detached, moved, or destroyed.
//! 5. Only mutations of the tree reachable from the root are journaled.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Destroyed handle | Node freed earlier | `DomError::StaleNode` |
//! | Cycle or bad parent | Ancestor inserted into descendant, child under text | `DomError::HierarchyRequest`, tree untouched |
//! | Detached reference | `insert_after` on a node without parent | `DomError::NoParent` |

use std::fmt::Write as _;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{DomError, Result};
use crate::mutation::{Mutation, MutationLog};
use crate::node::{NodeId, NodeKind};

#[derive(Debug)]
struct NodeData {
    generation: u32,
    alive: bool,
    kind: NodeKind,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
    child_count: usize,
    text: String,
    attributes: Vec<(String, String)>,
    properties: AHashMap<String, Value>,
}

impl NodeData {
    fn new(kind: NodeKind, text: String) -> Self {
        Self {
            generation: 0,
            alive: true,
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            child_count: 0,
            text,
            attributes: Vec::new(),
            properties: AHashMap::new(),
        }
    }
}

/// A document: one root plus any number of detached subtrees.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<NodeData>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
    log: MutationLog,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                slot: 0,
                generation: 0,
            },
            live: 0,
            log: MutationLog::default(),
        };
        doc.root = doc.alloc(NodeKind::Document, String::new());
        doc
    }

    /// The document root.
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind, text: String) -> NodeId {
        let data = NodeData::new(kind, text);
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.nodes[slot as usize];
            let generation = entry.generation;
            *entry = NodeData { generation, ..data };
            NodeId { slot, generation }
        } else {
            let slot = self.nodes.len() as u32;
            self.nodes.push(data);
            NodeId {
                slot,
                generation: 0,
            }
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element { tag: Rc::from(tag) }, String::new())
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text, text.into())
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Comment, text.into())
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment, String::new())
    }

    fn data(&self, id: NodeId) -> Result<&NodeData> {
        match self.nodes.get(id.slot as usize) {
            Some(n) if n.alive && n.generation == id.generation => Ok(n),
            _ => Err(DomError::StaleNode(id)),
        }
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        match self.nodes.get_mut(id.slot as usize) {
            Some(n) if n.alive && n.generation == id.generation => Ok(n),
            _ => Err(DomError::StaleNode(id)),
        }
    }

    /// Whether `id` still refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.data(id).is_ok()
    }

    /// Number of live nodes, root included.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind> {
        Ok(&self.data(id)?.kind)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.parent)
    }

    pub fn first_child(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.first_child)
    }

    pub fn last_child(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.last_child)
    }

    pub fn next_sibling(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.next_sibling)
    }

    pub fn previous_sibling(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.data(id)?.prev_sibling)
    }

    pub fn child_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.data(id)?.child_count)
    }

    /// Children of `id`, in order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let data = self.data(id)?;
        let mut out = Vec::with_capacity(data.child_count);
        let mut cursor = data.first_child;
        while let Some(c) = cursor {
            out.push(c);
            cursor = self.data(c)?.next_sibling;
        }
        Ok(out)
    }

    /// Descendants of `id` in document order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id)?.into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n)?.into_iter().rev());
        }
        Ok(out)
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        self.data(ancestor)?;
        let mut cursor = Some(node);
        while let Some(c) = cursor {
            if c == ancestor {
                return Ok(true);
            }
            cursor = self.data(c)?.parent;
        }
        Ok(false)
    }

    /// Whether `id` is reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> Result<bool> {
        self.contains(self.root, id)
    }

    /// Position of `id` among its parent's children.
    pub fn index_in_parent(&self, id: NodeId) -> Result<Option<usize>> {
        let mut cursor = self.data(id)?.prev_sibling;
        let parent = self.data(id)?.parent;
        if parent.is_none() {
            return Ok(None);
        }
        let mut index = 0;
        while let Some(c) = cursor {
            index += 1;
            cursor = self.data(c)?.prev_sibling;
        }
        Ok(Some(index))
    }

    /// Follow child indices from `from`. `None` if any step is out of range.
    pub fn child_at_path(&self, from: NodeId, path: &[usize]) -> Result<Option<NodeId>> {
        let mut current = from;
        for &step in path {
            let mut cursor = self.data(current)?.first_child;
            for _ in 0..step {
                match cursor {
                    Some(c) => cursor = self.data(c)?.next_sibling,
                    None => return Ok(None),
                }
            }
            match cursor {
                Some(c) => current = c,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Child indices leading from `ancestor` down to `node`.
    pub fn path_from(&self, ancestor: NodeId, node: NodeId) -> Result<Option<Vec<usize>>> {
        let mut path = Vec::new();
        let mut cursor = node;
        while cursor != ancestor {
            match self.index_in_parent(cursor)? {
                Some(i) => path.push(i),
                None => return Ok(None),
            }
            match self.data(cursor)?.parent {
                Some(p) => cursor = p,
                None => return Ok(None),
            }
        }
        path.reverse();
        Ok(Some(path))
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Unlink `id` from its parent. Returns the old parent.
    fn unlink(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let (parent, prev, next) = {
            let d = self.data(id)?;
            (d.parent, d.prev_sibling, d.next_sibling)
        };
        let Some(parent) = parent else {
            return Ok(None);
        };
        match prev {
            Some(p) => self.data_mut(p)?.next_sibling = next,
            None => self.data_mut(parent)?.first_child = next,
        }
        match next {
            Some(n) => self.data_mut(n)?.prev_sibling = prev,
            None => self.data_mut(parent)?.last_child = prev,
        }
        self.data_mut(parent)?.child_count -= 1;
        let d = self.data_mut(id)?;
        d.parent = None;
        d.prev_sibling = None;
        d.next_sibling = None;
        Ok(Some(parent))
    }

    /// Link a detached `id` under `parent`, before `before` or at the end.
    fn link(&mut self, parent: NodeId, id: NodeId, before: Option<NodeId>) -> Result<()> {
        let prev = match before {
            Some(b) => self.data(b)?.prev_sibling,
            None => self.data(parent)?.last_child,
        };
        {
            let d = self.data_mut(id)?;
            d.parent = Some(parent);
            d.prev_sibling = prev;
            d.next_sibling = before;
        }
        match prev {
            Some(p) => self.data_mut(p)?.next_sibling = Some(id),
            None => self.data_mut(parent)?.first_child = Some(id),
        }
        match before {
            Some(b) => self.data_mut(b)?.prev_sibling = Some(id),
            None => self.data_mut(parent)?.last_child = Some(id),
        }
        self.data_mut(parent)?.child_count += 1;
        Ok(())
    }

    fn detach_recorded(&mut self, id: NodeId) -> Result<()> {
        if let Some(parent) = self.unlink(id)? {
            if self.is_connected(parent)? {
                self.log.record(Mutation::Remove { parent, node: id });
            }
        }
        Ok(())
    }

    /// Insert `child` under `parent` before `reference` (append when `None`).
    ///
    /// A fragment contributes its children instead of itself.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.insert_nodes_before(parent, &[child], reference)
    }

    /// Insert `nodes`, in order, as one contiguous run before `reference`.
    ///
    /// Fragments in `nodes` contribute their children. The run is journaled
    /// as a single [`Mutation::Insert`]. If `reference` is itself part of the
    /// run, the first following sibling outside the run is used instead.
    pub fn insert_nodes_before(
        &mut self,
        parent: NodeId,
        nodes: &[NodeId],
        reference: Option<NodeId>,
    ) -> Result<()> {
        let parent_is_leaf = self.data(parent)?.kind.is_character_data();
        for &child in nodes {
            if parent_is_leaf
                || self.data(child)?.kind == NodeKind::Document
                || self.contains(child, parent)?
            {
                return Err(DomError::HierarchyRequest { parent, child });
            }
        }
        let mut reference = reference;
        if let Some(r) = reference {
            if self.data(r)?.parent != Some(parent) {
                return Err(DomError::HierarchyRequest { parent, child: r });
            }
        }
        while let Some(r) = reference {
            if !nodes.contains(&r) {
                break;
            }
            reference = self.data(r)?.next_sibling;
        }

        let mut moving: SmallVec<[NodeId; 4]> = SmallVec::with_capacity(nodes.len());
        for &child in nodes {
            if self.data(child)?.kind == NodeKind::Fragment {
                moving.extend(self.children(child)?);
            } else {
                moving.push(child);
            }
        }
        for &node in &moving {
            self.detach_recorded(node)?;
            self.link(parent, node, reference)?;
        }

        if !moving.is_empty() && self.is_connected(parent)? {
            self.log.record(Mutation::Insert {
                parent,
                nodes: moving,
            });
        }
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` right after `reference` in `reference`'s parent.
    pub fn insert_after(&mut self, reference: NodeId, child: NodeId) -> Result<()> {
        self.insert_nodes_after(reference, &[child])
    }

    /// Insert `nodes` as one run right after `reference`.
    pub fn insert_nodes_after(&mut self, reference: NodeId, nodes: &[NodeId]) -> Result<()> {
        let parent = self
            .data(reference)?
            .parent
            .ok_or(DomError::NoParent(reference))?;
        let next = self.data(reference)?.next_sibling;
        self.insert_nodes_before(parent, nodes, next)
    }

    /// Detach `id` from its parent. A no-op for detached nodes.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(DomError::HierarchyRequest {
                parent: id,
                child: id,
            });
        }
        self.detach_recorded(id)
    }

    /// Detach every child of `parent` in one step. Returns how many.
    pub fn clear_children(&mut self, parent: NodeId) -> Result<usize> {
        let children = self.children(parent)?;
        for &c in &children {
            let d = self.data_mut(c)?;
            d.parent = None;
            d.prev_sibling = None;
            d.next_sibling = None;
        }
        let p = self.data_mut(parent)?;
        p.first_child = None;
        p.last_child = None;
        p.child_count = 0;
        if !children.is_empty() && self.is_connected(parent)? {
            self.log.record(Mutation::ClearChildren {
                parent,
                removed: children.len(),
            });
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(?parent, removed = children.len(), "clear children");
        Ok(children.len())
    }

    /// Copy `id` and its subtree. The copy is detached; cloning the root
    /// yields a fragment.
    pub fn deep_clone(&mut self, id: NodeId) -> Result<NodeId> {
        let (kind, text, attributes, properties) = {
            let d = self.data(id)?;
            let kind = match &d.kind {
                NodeKind::Document => NodeKind::Fragment,
                other => other.clone(),
            };
            (kind, d.text.clone(), d.attributes.clone(), d.properties.clone())
        };
        let copy = self.alloc(kind, text);
        {
            let d = self.data_mut(copy)?;
            d.attributes = attributes;
            d.properties = properties;
        }
        for child in self.children(id)? {
            let child_copy = self.deep_clone(child)?;
            self.link(copy, child_copy, None)?;
        }
        Ok(copy)
    }

    /// Detach `id` and free it with its whole subtree.
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        self.remove(id)?;
        let mut doomed = self.descendants(id)?;
        doomed.push(id);
        for node in doomed {
            let d = self.data_mut(node)?;
            d.alive = false;
            d.generation = d.generation.wrapping_add(1);
            d.parent = None;
            d.first_child = None;
            d.last_child = None;
            d.prev_sibling = None;
            d.next_sibling = None;
            d.child_count = 0;
            d.text = String::new();
            d.attributes = Vec::new();
            d.properties = AHashMap::new();
            self.free.push(node.slot);
            self.live -= 1;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Character data of a text or comment node.
    pub fn text(&self, id: NodeId) -> Result<&str> {
        let d = self.data(id)?;
        if d.kind.is_character_data() {
            Ok(&d.text)
        } else {
            Err(DomError::NotACharacterNode(id))
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<()> {
        let d = self.data_mut(id)?;
        if !d.kind.is_character_data() {
            return Err(DomError::NotACharacterNode(id));
        }
        d.text = text.into();
        if self.is_connected(id)? {
            self.log.record(Mutation::SetText { node: id });
        }
        Ok(())
    }

    /// Concatenated text of all descendant text nodes (comments excluded).
    pub fn text_content(&self, id: NodeId) -> Result<String> {
        let d = self.data(id)?;
        if d.kind.is_character_data() {
            return Ok(d.text.clone());
        }
        let mut out = String::new();
        for n in self.descendants(id)? {
            let nd = self.data(n)?;
            if nd.kind == NodeKind::Text {
                out.push_str(&nd.text);
            }
        }
        Ok(out)
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Result<Option<&str>> {
        Ok(self
            .data(id)?
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str()))
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        let value = value.into();
        let d = self.data_mut(id)?;
        match d.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => d.attributes.push((name.to_owned(), value)),
        }
        if self.is_connected(id)? {
            self.log.record(Mutation::SetAttribute {
                node: id,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Remove an attribute, returning its old value.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<Option<String>> {
        let d = self.data_mut(id)?;
        let Some(pos) = d.attributes.iter().position(|(n, _)| n == name) else {
            return Ok(None);
        };
        let (_, old) = d.attributes.remove(pos);
        if self.is_connected(id)? {
            self.log.record(Mutation::SetAttribute {
                node: id,
                name: name.to_owned(),
            });
        }
        Ok(Some(old))
    }

    pub fn property(&self, id: NodeId, name: &str) -> Result<Option<&Value>> {
        Ok(self.data(id)?.properties.get(name))
    }

    pub fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        self.data_mut(id)?.properties.insert(name.to_owned(), value);
        if self.is_connected(id)? {
            self.log.record(Mutation::SetProperty {
                node: id,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Whitespace-only text node.
    pub fn is_blank_text(&self, id: NodeId) -> Result<bool> {
        let d = self.data(id)?;
        Ok(d.kind == NodeKind::Text && d.text.trim().is_empty())
    }

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    /// Start recording connected mutations.
    pub fn record_mutations(&mut self) {
        self.log.enable();
    }

    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        self.log.entries()
    }

    /// Drain recorded mutations.
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        self.log.take()
    }

    // -----------------------------------------------------------------------
    // Debug rendering
    // -----------------------------------------------------------------------

    /// Compact markup for `id` and its subtree, for tests and diagnostics.
    ///
    /// Elements render as `<tag a="v">..</tag>`, comments as `<!--text-->`;
    /// documents and fragments render only their children. No escaping.
    pub fn markup(&self, id: NodeId) -> Result<String> {
        let mut out = String::new();
        self.write_markup(id, &mut out)?;
        Ok(out)
    }

    fn write_markup(&self, id: NodeId, out: &mut String) -> Result<()> {
        let d = self.data(id)?;
        match &d.kind {
            NodeKind::Text => out.push_str(&d.text),
            NodeKind::Comment => {
                let _ = write!(out, "<!--{}-->", d.text);
            }
            NodeKind::Element { tag } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in &d.attributes {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for c in self.children(id)? {
                    self.write_markup(c, out)?;
                }
                let _ = write!(out, "</{tag}>");
            }
            NodeKind::Document | NodeKind::Fragment => {
                for c in self.children(id)? {
                    self.write_markup(c, out)?;
                }
            }
        }
        Ok(())
    }
}
