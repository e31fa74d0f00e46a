#![forbid(unsafe_code)]

//! Structural reconciliation: `for` lists and `if` blocks.
//!
//! A `for` binding keeps the last list it rendered, the list index assigned
//! to each element and the block rendered for each index. A new list is
//! diffed against that snapshot ([`create_list_diff`]) and the plan is
//! applied with as few tree operations as the shape of the change allows:
//!
//! - **All-insert** (nothing rendered yet, anchor connected): every block is
//!   built into one detached fragment and spliced after the anchor at once.
//! - **All-remove**: when the anchor is alone in its parent apart from its
//!   own blocks and blank text, the parent is cleared in one step and the
//!   anchor re-appended; otherwise blocks are removed node by node.
//! - **Mixed**: removals first, then one walk over the new order mounting
//!   new blocks and moving kept ones that are out of place. Kept blocks whose
//!   slot changed only re-apply their `$n` bindings.
//!
//! Unmounted blocks go to a bounded per-template pool and are rebound when a
//! later slot takes them.
//!
//! # Invariants
//!
//! 1. After a pass, the blocks of a `for` binding follow its anchor in list
//!    order, each as one contiguous run including its nested blocks.
//! 2. Every mounted row block has a live list index and a loop context whose
//!    list index is that index; its top-level nodes are registered with it.
//! 3. Blocks are applied only after the structural pass that mounted them,
//!    inside their own loop context chain.
//! 4. A recycled block owns no list index, no nested blocks and no cached
//!    addresses.
//!
//! # Failure Modes
//!
//! - A template that is not registered aborts the pass with
//!   `RuntimeError::MissingTemplate`.
//! - A removed index with no recorded block is skipped with a debug event.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use serde_json::Value;
use tracing::{debug, debug_span, trace};
use wcs_core::{ListIndexId, LoopContext, PathInfo, StateAddress, WILDCARD, create_list_diff};
use wcs_dom::NodeId;

use crate::binding::{BindingDescriptor, BindingId, BindingKind};
use crate::content::{Content, ContentId};
use crate::error::{Result, RuntimeError};
use crate::resolve::context_for;
use crate::runtime::Runtime;
use crate::template::TemplateId;
use crate::value;

// ---------------------------------------------------------------------------
// Side tables
// ---------------------------------------------------------------------------

/// What a `for` binding rendered last.
#[derive(Debug, Default)]
pub(crate) struct ForState {
    pub(crate) list: Vec<Value>,
    pub(crate) indexes: Vec<ListIndexId>,
    pub(crate) contents: AHashMap<ListIndexId, ContentId>,
}

impl ForState {
    pub(crate) fn ordered_contents(&self) -> Vec<ContentId> {
        self.indexes
            .iter()
            .filter_map(|li| self.contents.get(li).copied())
            .collect()
    }
}

/// One cached isolation check: the verdict and the children of the parent
/// that were not part of the anchor's own run when it was taken.
#[derive(Debug, Clone)]
struct Verdict {
    isolated: bool,
    foreign: Vec<NodeId>,
}

/// Bounded memo of "anchor is alone in its parent" verdicts.
///
/// A verdict is trusted only while the parent still holds exactly the owned
/// run plus the foreign children recorded with it.
#[derive(Debug)]
pub(crate) struct IsolationCache {
    capacity: usize,
    verdicts: AHashMap<NodeId, Verdict>,
}

impl IsolationCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            verdicts: AHashMap::new(),
        }
    }

    fn get(&self, anchor: NodeId) -> Option<&Verdict> {
        self.verdicts.get(&anchor)
    }

    fn insert(&mut self, anchor: NodeId, verdict: Verdict) {
        if self.verdicts.len() < self.capacity || self.verdicts.contains_key(&anchor) {
            self.verdicts.insert(anchor, verdict);
        }
    }

    pub(crate) fn remove(&mut self, anchor: NodeId) {
        self.verdicts.remove(&anchor);
    }
}

// ---------------------------------------------------------------------------
// for
// ---------------------------------------------------------------------------

impl Runtime {
    pub(crate) fn apply_change_to_for(
        &mut self,
        desc: &BindingDescriptor,
        template: &TemplateId,
        value: Value,
    ) -> Result<()> {
        let new_list = match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        let anchor = desc.node;
        let mut state = self.for_states.remove(&desc.id).unwrap_or_default();

        let span = debug_span!(
            "reconcile_for",
            binding = desc.id.get(),
            path = desc.path(),
            old = state.list.len(),
            new = new_list.len()
        );
        let _enter = span.enter();

        let enclosing = context_for(&self.doc, &self.contexts, anchor)?;
        let _chain = enclosing
            .as_ref()
            .map(|ctx| self.loops.enter_chain(ctx))
            .transpose()?;

        let parent_index = self.binding_address(desc.id)?.list_index();
        let diff = create_list_diff(
            &mut self.arena,
            parent_index,
            &state.list,
            &new_list,
            &state.indexes,
        )?;
        if diff.is_same {
            state.list = new_list;
            self.for_states.insert(desc.id, state);
            return Ok(());
        }

        let element_path = self.paths.child(&desc.path_info, WILDCARD);
        let all_insert = state.indexes.is_empty()
            && !new_list.is_empty()
            && self.doc.is_connected(anchor)?;
        let mut fresh = Vec::new();

        if all_insert {
            trace!("all-insert");
            let fragment = self.doc.create_fragment();
            for &li in &diff.new_indexes {
                let ctx = self.row_context(&element_path, li, enclosing.as_ref())?;
                let cid = self.acquire_content(template, Some(li), Some(ctx))?;
                let nodes = self.own_nodes(cid)?;
                self.doc.insert_nodes_before(fragment, &nodes, None)?;
                self.set_mounted(cid);
                state.contents.insert(li, cid);
                fresh.push(cid);
            }
            self.record_for_state(desc.id, state, new_list, diff.new_indexes);
            for &cid in &fresh {
                self.apply_content_bindings(cid)?;
            }
            self.doc.insert_nodes_after(anchor, &[fragment])?;
            self.doc.destroy(fragment)?;
        } else if new_list.is_empty() {
            trace!("all-remove");
            self.remove_all(anchor, &mut state)?;
            self.record_for_state(desc.id, state, new_list, diff.new_indexes);
        } else {
            for li in &diff.removed {
                match state.contents.remove(li) {
                    Some(cid) => self.recycle_content(cid, true)?,
                    None => {
                        debug!(list_index = ?li, "no block recorded for removed index");
                        self.release_list_index(*li);
                    }
                }
            }

            let mut prev = anchor;
            let mut repositioned = Vec::new();
            for &li in &diff.new_indexes {
                let existing = state.contents.get(&li).copied();
                let cid = match existing {
                    Some(cid) if !diff.added.contains(&li) => {
                        let run = self.content_run(cid);
                        if self.doc.next_sibling(prev)? != run.first().copied() {
                            self.doc.insert_nodes_after(prev, &run)?;
                        }
                        if diff.moved.contains(&li) {
                            repositioned.push(cid);
                        }
                        cid
                    }
                    _ => {
                        let ctx = self.row_context(&element_path, li, enclosing.as_ref())?;
                        let cid = self.acquire_content(template, Some(li), Some(ctx))?;
                        let nodes = self.own_nodes(cid)?;
                        self.mount(cid, prev, &nodes)?;
                        state.contents.insert(li, cid);
                        fresh.push(cid);
                        cid
                    }
                };
                if let Some(&last) = self.content_run(cid).last() {
                    prev = last;
                }
            }

            self.record_for_state(desc.id, state, new_list, diff.new_indexes);
            for &cid in &fresh {
                self.apply_content_bindings(cid)?;
            }
            for cid in repositioned {
                self.reapply_positional(cid)?;
            }
        }
        Ok(())
    }

    fn record_for_state(
        &mut self,
        id: BindingId,
        mut state: ForState,
        list: Vec<Value>,
        indexes: Vec<ListIndexId>,
    ) {
        state.contents.retain(|li, _| indexes.contains(li));
        state.list = list;
        state.indexes = indexes;
        self.for_states.insert(id, state);
    }

    fn row_context(
        &self,
        element_path: &Rc<PathInfo>,
        list_index: ListIndexId,
        enclosing: Option<&LoopContext>,
    ) -> Result<LoopContext> {
        let address = StateAddress::new(Rc::clone(element_path), Some(list_index), &self.arena)?;
        Ok(LoopContext::new(address, enclosing.cloned())?)
    }

    fn remove_all(&mut self, anchor: NodeId, state: &mut ForState) -> Result<()> {
        let blocks = state.ordered_contents();
        let parent = match self.doc.parent(anchor)? {
            Some(parent) if self.anchor_is_isolated(anchor, parent, &blocks)? => Some(parent),
            _ => None,
        };

        if let Some(parent) = parent {
            debug!(?anchor, blocks = blocks.len(), "anchor isolated; clearing parent");
            self.doc.clear_children(parent)?;
            self.doc.append_child(parent, anchor)?;
            for cid in blocks {
                self.recycle_content(cid, false)?;
            }
        } else {
            for cid in blocks {
                self.recycle_content(cid, true)?;
            }
        }
        for li in &state.indexes {
            if !state.contents.contains_key(li) {
                self.release_list_index(*li);
            }
        }
        state.contents.clear();
        Ok(())
    }

    fn anchor_is_isolated(
        &mut self,
        anchor: NodeId,
        parent: NodeId,
        blocks: &[ContentId],
    ) -> Result<bool> {
        let mut owned: AHashSet<NodeId> = AHashSet::new();
        owned.insert(anchor);
        for &cid in blocks {
            owned.extend(self.content_run(cid));
        }
        if let Some(verdict) = self.isolation.get(anchor) {
            if self.verdict_holds(verdict, parent, owned.len())? {
                return Ok(verdict.isolated);
            }
            trace!(?anchor, "parent changed since isolation check");
        }

        let mut foreign = Vec::new();
        let mut isolated = true;
        for child in self.doc.children(parent)? {
            if owned.contains(&child) {
                continue;
            }
            if !self.doc.is_blank_text(child)? {
                isolated = false;
            }
            foreign.push(child);
        }
        self.isolation.insert(anchor, Verdict { isolated, foreign });
        Ok(isolated)
    }

    /// The parent's children are still the owned run plus the recorded
    /// foreign nodes, and blank ones are still blank.
    fn verdict_holds(&self, verdict: &Verdict, parent: NodeId, owned: usize) -> Result<bool> {
        if self.doc.child_count(parent)? != owned + verdict.foreign.len() {
            return Ok(false);
        }
        for &node in &verdict.foreign {
            if !self.doc.is_alive(node) || self.doc.parent(node)? != Some(parent) {
                return Ok(false);
            }
            if verdict.isolated && !self.doc.is_blank_text(node)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Re-apply the `$n` bindings of a block whose slot changed, and of every
    /// block nested in it.
    fn reapply_positional(&mut self, cid: ContentId) -> Result<()> {
        let content = self
            .contents
            .get(cid)
            .ok_or(RuntimeError::UnknownContent(cid))?;
        let ctx = content.loop_context.clone();
        let list_index = content.list_index;
        let bindings = content.bindings.clone();
        if let Some(li) = list_index {
            self.states.invalidate_list_index(li);
        }
        let _chain = ctx
            .as_ref()
            .map(|ctx| self.loops.enter_chain(ctx))
            .transpose()?;

        for id in bindings {
            let Some(desc) = self.bindings.get(id) else {
                continue;
            };
            if desc.is_positional() {
                self.apply_binding(id)?;
            } else if desc.kind.is_structural() {
                for nested in self.nested_contents(id) {
                    self.reapply_positional(nested)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // if
    // -----------------------------------------------------------------------

    pub(crate) fn apply_change_to_if(
        &mut self,
        desc: &BindingDescriptor,
        template: &TemplateId,
        negate: bool,
        value: &Value,
    ) -> Result<()> {
        let show = value::is_truthy(value) != negate;
        let anchor = desc.node;
        let current = self.if_content_by_node.get(&anchor).copied();
        let _span = debug_span!(
            "reconcile_if",
            binding = desc.id.get(),
            path = desc.path(),
            show
        )
        .entered();

        match (show, current) {
            (true, None) => {
                let enclosing = context_for(&self.doc, &self.contexts, anchor)?;
                let cid = self.acquire_content(template, None, enclosing)?;
                let nodes = self.own_nodes(cid)?;
                self.mount(cid, anchor, &nodes)?;
                self.if_content_by_node.insert(anchor, cid);
                self.apply_content_bindings(cid)?;
            }
            (false, Some(cid)) => {
                self.if_content_by_node.remove(&anchor);
                self.recycle_content(cid, true)?;
            }
            _ => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Block lifecycle
    // -----------------------------------------------------------------------

    /// Take a pooled block for `template` or instantiate one, and bind it to
    /// `list_index` and `ctx`.
    fn acquire_content(
        &mut self,
        template: &TemplateId,
        list_index: Option<ListIndexId>,
        ctx: Option<LoopContext>,
    ) -> Result<ContentId> {
        let cid = match self.pool.take(template) {
            Some(cid) => {
                trace!(template = %template, content = ?cid, "reusing pooled block");
                cid
            }
            None => self.instantiate(template)?,
        };
        let content = self
            .contents
            .get_mut(cid)
            .ok_or(RuntimeError::UnknownContent(cid))?;
        content.list_index = list_index;
        content.loop_context.clone_from(&ctx);
        let nodes = content.nodes().to_vec();
        let bindings = content.bindings.clone();

        for node in nodes {
            match &ctx {
                Some(ctx) => {
                    self.contexts.insert(node, ctx.clone());
                }
                None => {
                    self.contexts.remove(&node);
                }
            }
        }
        for id in bindings {
            self.addresses.invalidate(id);
        }
        Ok(cid)
    }

    /// Copy a template's fragment and register its bindings.
    fn instantiate(&mut self, template: &TemplateId) -> Result<ContentId> {
        let template = self.templates.get(template)?;
        let copy = self.doc.deep_clone(template.fragment)?;
        let nodes = self.doc.children(copy)?;
        let mut targets = Vec::with_capacity(template.bindings.len());
        for entry in &template.bindings {
            let node = self
                .doc
                .child_at_path(copy, &entry.node_path)?
                .ok_or_else(|| RuntimeError::InvalidTemplate {
                    template: template.id.to_string(),
                    reason: format!("no node at {:?}", entry.node_path),
                })?;
            targets.push(node);
        }
        self.doc.clear_children(copy)?;
        self.doc.destroy(copy)?;

        let cid = self.contents.insert(template.id.clone(), nodes);
        for (entry, node) in template.bindings.iter().zip(targets) {
            let id = self.register_binding(
                node,
                entry.kind.clone(),
                &entry.path,
                entry.state_name.as_deref(),
                Some(cid),
            )?;
            if let Some(content) = self.contents.get_mut(cid) {
                content.bindings.push(id);
            }
        }
        trace!(template = %template.id, content = ?cid, "instantiated block");
        Ok(cid)
    }

    fn apply_content_bindings(&mut self, cid: ContentId) -> Result<()> {
        let Some(content) = self.contents.get(cid) else {
            return Ok(());
        };
        let ctx = content.loop_context.clone();
        let bindings = content.bindings.clone();
        let _chain = ctx
            .as_ref()
            .map(|ctx| self.loops.enter_chain(ctx))
            .transpose()?;
        for id in bindings {
            if self.bindings.get(id).is_some() {
                self.apply_binding(id)?;
            }
        }
        Ok(())
    }

    fn own_nodes(&self, cid: ContentId) -> Result<Vec<NodeId>> {
        self.contents
            .get(cid)
            .map(|content| content.nodes().to_vec())
            .ok_or(RuntimeError::UnknownContent(cid))
    }

    fn mount(&mut self, cid: ContentId, after: NodeId, run: &[NodeId]) -> Result<()> {
        let content = self
            .contents
            .get_mut(cid)
            .ok_or(RuntimeError::UnknownContent(cid))?;
        content.mount_after(&mut self.doc, after, run)
    }

    fn set_mounted(&mut self, cid: ContentId) {
        if let Some(content) = self.contents.get_mut(cid) {
            content.mounted = true;
        }
    }

    /// Unmount a block, tear down its nested blocks and return it to the
    /// pool. With `detach` unset the caller has already detached its nodes.
    pub(crate) fn recycle_content(&mut self, cid: ContentId, detach: bool) -> Result<()> {
        let Some(content) = self.contents.get_mut(cid) else {
            debug!(content = ?cid, "recycling a missing block");
            return Ok(());
        };
        content.unmount(&mut self.doc, detach)?;
        self.teardown_nested(cid)?;

        let Some(content) = self.contents.get_mut(cid) else {
            return Ok(());
        };
        let list_index = content.list_index.take();
        content.loop_context = None;
        let template = content.template().clone();
        let nodes = content.nodes().to_vec();
        let bindings = content.bindings.clone();

        for node in nodes {
            self.contexts.remove(&node);
        }
        for id in bindings {
            self.addresses.invalidate(id);
        }
        if let Some(li) = list_index {
            self.release_list_index(li);
        }
        if let Some(evicted) = self.pool.put(&template, cid) {
            debug!(template = %template, content = ?evicted, "pool full; destroying block");
            self.destroy_content(evicted)?;
        }
        Ok(())
    }

    /// Recycle every block owned by the structural bindings of `cid`.
    fn teardown_nested(&mut self, cid: ContentId) -> Result<()> {
        let Some(content) = self.contents.get(cid) else {
            return Ok(());
        };
        for id in content.bindings.clone() {
            let Some(desc) = self.bindings.get(id) else {
                continue;
            };
            let anchor = desc.node;
            let is_for = matches!(desc.kind, BindingKind::For { .. });
            let is_if = matches!(desc.kind, BindingKind::If { .. });
            if is_for {
                let Some(state) = self.for_states.remove(&id) else {
                    continue;
                };
                for li in &state.indexes {
                    match state.contents.get(li) {
                        Some(&nested) => self.recycle_content(nested, true)?,
                        None => self.release_list_index(*li),
                    }
                }
            } else if is_if {
                if let Some(nested) = self.if_content_by_node.remove(&anchor) {
                    self.recycle_content(nested, true)?;
                }
            }
        }
        Ok(())
    }

    /// Free a block: its nodes, bindings and every side-table entry.
    pub(crate) fn destroy_content(&mut self, cid: ContentId) -> Result<()> {
        self.teardown_nested(cid)?;
        let Some(content) = self.contents.remove(cid) else {
            return Ok(());
        };
        for &id in content.bindings() {
            self.addresses.invalidate(id);
            self.for_states.remove(&id);
            if let Some(desc) = self.bindings.remove(id) {
                if desc.kind.is_structural() {
                    self.structural_by_node.remove(&desc.node);
                    self.if_content_by_node.remove(&desc.node);
                    self.isolation.remove(desc.node);
                }
            }
        }
        for &node in content.nodes() {
            self.contexts.remove(&node);
            if self.doc.is_alive(node) {
                self.doc.destroy(node)?;
            }
        }
        if let Some(li) = content.list_index() {
            self.release_list_index(li);
        }
        Ok(())
    }

    pub(crate) fn release_list_index(&mut self, list_index: ListIndexId) {
        self.states.invalidate_list_index(list_index);
        self.arena.release(list_index);
    }

    /// Blocks currently owned by a structural binding, in render order.
    pub(crate) fn nested_contents(&self, id: BindingId) -> Vec<ContentId> {
        let Some(desc) = self.bindings.get(id) else {
            return Vec::new();
        };
        match desc.kind {
            BindingKind::For { .. } => self
                .for_states
                .get(&id)
                .map(ForState::ordered_contents)
                .unwrap_or_default(),
            BindingKind::If { .. } => self
                .if_content_by_node
                .get(&desc.node)
                .copied()
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A block's top-level nodes followed, per node, by the mounted blocks of
    /// a structural binding anchored there.
    pub(crate) fn content_run(&self, cid: ContentId) -> Vec<NodeId> {
        let mut run = Vec::new();
        self.collect_run(cid, &mut run);
        run
    }

    fn collect_run(&self, cid: ContentId, run: &mut Vec<NodeId>) {
        let Some(content) = self.contents.get(cid) else {
            return;
        };
        for &node in content.nodes() {
            run.push(node);
            let Some(&anchored) = self.structural_by_node.get(&node) else {
                continue;
            };
            for nested in self.nested_contents(anchored) {
                if self.contents.get(nested).is_some_and(Content::is_mounted) {
                    self.collect_run(nested, run);
                }
            }
        }
    }
}
