#![forbid(unsafe_code)]

//! Content blocks and the per-template pool.
//!
//! A [`Content`] is one instantiated copy of a template: its top-level nodes,
//! the bindings created for it, and (inside a repetition) the list index and
//! loop context it renders for. Blocks are mounted after a reference node and
//! unmounted without being destroyed, which is what lets a reordered list
//! move blocks instead of rebuilding them.
//!
//! # Invariants
//!
//! 1. `nodes` is fixed at instantiation and never empty.
//! 2. While mounted, `nodes` are contiguous siblings, possibly followed by
//!    the blocks of nested structural bindings anchored at a top-level node.
//! 3. A pooled block is unmounted, has no list index and no nested blocks.
//! 4. The pool holds at most `capacity` blocks per template; inserting
//!    beyond that hands the oldest block back for destruction.

use std::collections::VecDeque;
use std::fmt;

use ahash::AHashMap;
use wcs_core::{ListIndexId, LoopContext};
use wcs_dom::{Document, NodeId};

use crate::binding::BindingId;
use crate::error::Result;
use crate::template::TemplateId;

/// Handle to a content block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(u32);

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

/// One instantiated template.
#[derive(Debug)]
pub struct Content {
    id: ContentId,
    template: TemplateId,
    nodes: Vec<NodeId>,
    pub(crate) bindings: Vec<BindingId>,
    pub(crate) list_index: Option<ListIndexId>,
    pub(crate) loop_context: Option<LoopContext>,
    pub(crate) mounted: bool,
}

impl Content {
    pub(crate) fn new(id: ContentId, template: TemplateId, nodes: Vec<NodeId>) -> Self {
        Self {
            id,
            template,
            nodes,
            bindings: Vec::new(),
            list_index: None,
            loop_context: None,
            mounted: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ContentId {
        self.id
    }

    #[must_use]
    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    /// Top-level nodes, in order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[must_use]
    pub fn first_node(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    /// Last top-level node. Nested blocks may follow it while mounted.
    #[must_use]
    pub fn last_node(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    #[must_use]
    pub fn bindings(&self) -> &[BindingId] {
        &self.bindings
    }

    #[must_use]
    pub fn list_index(&self) -> Option<ListIndexId> {
        self.list_index
    }

    #[must_use]
    pub fn loop_context(&self) -> Option<&LoopContext> {
        self.loop_context.as_ref()
    }

    /// Insert `run` (this block's nodes plus any nested blocks) after
    /// `reference` as one contiguous run.
    pub(crate) fn mount_after(
        &mut self,
        doc: &mut Document,
        reference: NodeId,
        run: &[NodeId],
    ) -> Result<()> {
        doc.insert_nodes_after(reference, run)?;
        self.mounted = true;
        Ok(())
    }

    /// Detach the top-level nodes. Nested blocks are the caller's concern.
    pub(crate) fn unmount(&mut self, doc: &mut Document, detach: bool) -> Result<()> {
        if detach {
            for &node in &self.nodes {
                doc.remove(node)?;
            }
        }
        self.mounted = false;
        Ok(())
    }
}

/// Owner of every live content block.
#[derive(Debug, Default)]
pub struct ContentStore {
    next_id: u32,
    contents: AHashMap<ContentId, Content>,
}

impl ContentStore {
    pub(crate) fn insert(&mut self, template: TemplateId, nodes: Vec<NodeId>) -> ContentId {
        let id = ContentId(self.next_id);
        self.next_id += 1;
        self.contents.insert(id, Content::new(id, template, nodes));
        id
    }

    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<&Content> {
        self.contents.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ContentId) -> Option<&mut Content> {
        self.contents.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: ContentId) -> Option<Content> {
        self.contents.remove(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Bounded free lists of unmounted blocks, per template.
#[derive(Debug)]
pub struct ContentPool {
    capacity: usize,
    free: AHashMap<TemplateId, VecDeque<ContentId>>,
}

impl ContentPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: AHashMap::new(),
        }
    }

    /// Return a block to the pool. Yields the block that no longer fits,
    /// which is `id` itself when pooling is disabled.
    pub fn put(&mut self, template: &TemplateId, id: ContentId) -> Option<ContentId> {
        if self.capacity == 0 {
            return Some(id);
        }
        let queue = self.free.entry(template.clone()).or_default();
        queue.push_back(id);
        if queue.len() > self.capacity {
            queue.pop_front()
        } else {
            None
        }
    }

    /// Most recently pooled block for `template`.
    pub fn take(&mut self, template: &TemplateId) -> Option<ContentId> {
        self.free.get_mut(template)?.pop_back()
    }

    #[must_use]
    pub fn len(&self, template: &TemplateId) -> usize {
        self.free.get(template).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
