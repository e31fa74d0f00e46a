#![forbid(unsafe_code)]

//! The runtime: one document, its state scopes and every binding between
//! them.
//!
//! [`Runtime`] owns all registries (paths, list indices, templates, scopes,
//! bindings, content blocks) so independent runtimes never share caches.
//! Bindings are applied once when registered and again whenever
//! [`Runtime::set_value`] writes a path they depend on.
//!
//! # Invariants
//!
//! 1. One propagation applies each affected binding at most once, in
//!    registration order.
//! 2. A binding inside an unmounted (pooled) block is never applied.
//! 3. A write under a list index only reaches bindings whose own list index
//!    agrees with it on every wildcard level the two paths share.
//! 4. A binding applied by a reconciliation during a propagation (a fresh or
//!    rebound block, a repositioned `$n`) is not applied again by it. In rows
//!    a `for` pass kept, non-getter bindings at or below the element path
//!    are settled too: the row was kept because its element compared equal.
//!    Every other binding in a kept row stays eligible.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown scope | Binding or address names an unregistered scope | `RuntimeError::MissingStateScope` |
//! | Unknown template | Structural binding names an unregistered template | `RuntimeError::MissingTemplate`, pass aborted |
//! | Unresolvable binding | Wildcard binding outside a matching repetition | `CoreError::UnresolvableAddress` |
//! | Write through a scalar | `set_value` on `a.b` where `a` is a number | `RuntimeError::InvalidPath` |
//!
//! A failed pass is not rolled back; already applied bindings keep their
//! new values.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use serde_json::Value;
use tracing::{debug, debug_span, trace};
use wcs_core::{
    AbsoluteStateAddress, ListIndexArena, ListIndexId, LoopContextStack, PathInfo,
    PathRegistry, StateAddress, WILDCARD,
};
use wcs_dom::{Document, NodeId};

use crate::binding::{BindingDescriptor, BindingId, BindingKind, BindingTable};
use crate::config::RuntimeConfig;
use crate::content::{Content, ContentId, ContentPool, ContentStore};
use crate::error::{Result, RuntimeError};
use crate::reconcile::{ForState, IsolationCache};
use crate::resolve::{AddressCache, ContextTable, resolve_binding};
use crate::state::{ScopeState, StateRegistry, StateScope};
use crate::template::{NodeBindingSpec, TemplateId, TemplateRegistry};
use crate::value;

// ---------------------------------------------------------------------------
// ApplyStats
// ---------------------------------------------------------------------------

/// How often each binding was applied since the last reset.
#[derive(Debug, Clone, Default)]
pub struct ApplyStats {
    per_binding: AHashMap<BindingId, u64>,
    total: u64,
}

impl ApplyStats {
    fn record(&mut self, id: BindingId) {
        *self.per_binding.entry(id).or_insert(0) += 1;
        self.total += 1;
    }

    #[must_use]
    pub fn count(&self, id: BindingId) -> u64 {
        self.per_binding.get(&id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reset(&mut self) {
        self.per_binding.clear();
        self.total = 0;
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) doc: Document,
    pub(crate) paths: PathRegistry,
    pub(crate) arena: ListIndexArena,
    pub(crate) loops: LoopContextStack,
    pub(crate) states: StateRegistry,
    pub(crate) templates: TemplateRegistry,
    pub(crate) bindings: BindingTable,
    pub(crate) addresses: AddressCache,
    pub(crate) contents: ContentStore,
    pub(crate) pool: ContentPool,
    pub(crate) contexts: ContextTable,
    pub(crate) structural_by_node: AHashMap<NodeId, BindingId>,
    pub(crate) for_states: AHashMap<BindingId, ForState>,
    pub(crate) if_content_by_node: AHashMap<NodeId, ContentId>,
    pub(crate) isolation: IsolationCache,
    pub(crate) stats: ApplyStats,
    /// Bindings applied during the running propagation, if one is running.
    pub(crate) pass_applied: Option<AHashSet<BindingId>>,
}

impl Runtime {
    /// Create a runtime with an empty document.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            doc: Document::new(),
            paths: PathRegistry::new(),
            arena: ListIndexArena::new(),
            loops: LoopContextStack::new(config.max_loop_depth),
            states: StateRegistry::default(),
            templates: TemplateRegistry::new(),
            bindings: BindingTable::new(),
            addresses: AddressCache::default(),
            contents: ContentStore::default(),
            pool: ContentPool::new(config.pool_capacity),
            contexts: ContextTable::default(),
            structural_by_node: AHashMap::new(),
            for_states: AHashMap::new(),
            if_content_by_node: AHashMap::new(),
            isolation: IsolationCache::new(config.isolation_cache_capacity),
            stats: ApplyStats::default(),
            pass_applied: None,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutable access for building static markup and template fragments.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    #[must_use]
    pub fn paths(&self) -> &PathRegistry {
        &self.paths
    }

    #[must_use]
    pub fn arena(&self) -> &ListIndexArena {
        &self.arena
    }

    #[must_use]
    pub fn stats(&self) -> &ApplyStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a state scope, replacing one with the same name.
    ///
    /// Bindings already registered against the name keep working; their
    /// static dependency edges are carried over to the new scope.
    pub fn register_state(&mut self, scope: StateScope) {
        let name = scope.name().to_owned();
        if self.states.register(scope).is_none() {
            return;
        }
        debug!(state = %name, "replaced state scope");
        let infos: Vec<_> = self
            .bindings
            .iter()
            .filter(|d| *d.state_name == *name)
            .map(|d| Rc::clone(&d.path_info))
            .collect();
        if let Ok(state) = self.states.get_mut(&name) {
            for info in infos {
                state.graph.add_static_path(&self.paths, &info);
            }
        }
    }

    pub fn state(&self, name: &str) -> Result<&ScopeState> {
        self.states.get(name)
    }

    /// Register a template built in this runtime's document.
    pub fn register_template(
        &mut self,
        id: impl Into<TemplateId>,
        fragment: NodeId,
        bindings: Vec<NodeBindingSpec>,
    ) -> Result<()> {
        let id = id.into();
        if self.templates.register(&self.doc, id.clone(), fragment, bindings)?.is_some() {
            debug!(template = %id, "replaced template");
        }
        Ok(())
    }

    /// Bind `node` to `path` and apply the binding immediately.
    ///
    /// `state` defaults to the configured default scope.
    pub fn bind(
        &mut self,
        node: NodeId,
        kind: BindingKind,
        path: &str,
        state: Option<&str>,
    ) -> Result<BindingId> {
        self.doc.kind(node)?;
        let id = self.register_binding(node, kind, path, state, None)?;
        self.apply_binding(id)?;
        Ok(id)
    }

    pub(crate) fn register_binding(
        &mut self,
        node: NodeId,
        kind: BindingKind,
        path: &str,
        state: Option<&str>,
        owner: Option<ContentId>,
    ) -> Result<BindingId> {
        let state_name: Rc<str> = Rc::from(state.unwrap_or(&self.config.default_state_name));
        let info = self.paths.get(path);
        self.states
            .get_mut(&state_name)?
            .graph
            .add_static_path(&self.paths, &info);
        let structural = kind.is_structural();
        let id = self.bindings.register(info, state_name, node, kind, owner);
        if structural {
            self.structural_by_node.insert(node, id);
        }
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn binding(&self, id: BindingId) -> Option<&BindingDescriptor> {
        self.bindings.get(id)
    }

    #[must_use]
    pub fn content(&self, id: ContentId) -> Option<&Content> {
        self.contents.get(id)
    }

    /// Blocks rendered by a `for` binding, in list order.
    #[must_use]
    pub fn for_contents(&self, id: BindingId) -> Vec<ContentId> {
        self.for_states
            .get(&id)
            .map(ForState::ordered_contents)
            .unwrap_or_default()
    }

    /// List indices assigned by a `for` binding, in list order.
    #[must_use]
    pub fn for_list_indexes(&self, id: BindingId) -> &[ListIndexId] {
        self.for_states
            .get(&id)
            .map_or(&[], |state| state.indexes.as_slice())
    }

    /// Block currently mounted by an `if` binding.
    #[must_use]
    pub fn if_content(&self, id: BindingId) -> Option<ContentId> {
        let desc = self.bindings.get(id)?;
        self.if_content_by_node.get(&desc.node).copied()
    }

    /// Checked address of `path` under `list_index`.
    pub fn address(&self, path: &str, list_index: Option<ListIndexId>) -> Result<StateAddress> {
        Ok(StateAddress::new(self.paths.get(path), list_index, &self.arena)?)
    }

    pub fn absolute_address(
        &self,
        state: &str,
        path: &str,
        list_index: Option<ListIndexId>,
    ) -> Result<AbsoluteStateAddress> {
        Ok(self.address(path, list_index)?.absolute(state))
    }

    /// Resolved address of a binding, cached until its block is recycled.
    pub fn binding_address(&mut self, id: BindingId) -> Result<StateAddress> {
        if let Some(address) = self.addresses.get(id) {
            return Ok(address.clone());
        }
        let desc = self.bindings.get(id).ok_or(RuntimeError::UnknownBinding(id))?;
        let address = resolve_binding(&self.doc, &self.contexts, &self.paths, &self.arena, desc)?;
        self.addresses.insert(id, address.clone());
        Ok(address)
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    pub fn get_value(&mut self, address: &AbsoluteStateAddress) -> Result<Value> {
        self.states
            .get_mut(address.state_name())?
            .read(&self.paths, &self.arena, address.address())
    }

    /// Read a plain path from the default scope.
    pub fn get(&mut self, path: &str) -> Result<Value> {
        let address = self.absolute_address(&self.config.default_state_name, path, None)?;
        self.get_value(&address)
    }

    /// Write a plain path in the default scope.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let address = self.absolute_address(&self.config.default_state_name, path, None)?;
        self.set_value(&address, value)
    }

    /// Write `value` and re-apply every binding that depends on it.
    pub fn set_value(&mut self, address: &AbsoluteStateAddress, value: Value) -> Result<()> {
        let state_name = address.state_name();
        let written = address.address();
        let span = debug_span!(
            "set_value",
            state = state_name,
            path = written.path_info().path(),
            affected = tracing::field::Empty
        );
        let _enter = span.enter();

        let dependents = {
            let state = self.states.get_mut(state_name)?;
            state.write(&self.arena, written, value)?;
            state.graph.dependents(written.path_id())
        };
        self.refresh_list_snapshots(state_name, written)?;

        let mut affected: Vec<BindingId> = dependents
            .iter()
            .flat_map(|&path| self.bindings.bindings_for(state_name, path).iter().copied())
            .collect();
        affected.sort_unstable();
        affected.dedup();
        span.record("affected", affected.len());

        self.pass_applied = Some(AHashSet::new());
        let result = self.propagate(written, affected);
        self.pass_applied = None;
        result
    }

    fn propagate(&mut self, written: &StateAddress, affected: Vec<BindingId>) -> Result<()> {
        for id in affected {
            if self.pass_applied.as_ref().is_some_and(|pass| pass.contains(&id)) {
                continue;
            }
            let Some(desc) = self.bindings.get(id) else {
                trace!(binding = id.get(), "binding torn down during propagation");
                continue;
            };
            let owner_mounted = desc
                .owner
                .is_none_or(|owner| self.contents.get(owner).is_some_and(Content::is_mounted));
            if !owner_mounted {
                continue;
            }
            let is_for = matches!(desc.kind, BindingKind::For { .. });
            let target = self.binding_address(id)?;
            if !self.indexes_agree(written, &target) {
                continue;
            }
            self.apply_binding(id)?;
            if is_for {
                self.settle_kept_rows(id);
            }
        }
        Ok(())
    }

    /// Two-way glue: write `value` to the address `id` is bound to.
    pub fn write_binding(&mut self, id: BindingId, value: Value) -> Result<()> {
        let state_name = Rc::clone(
            &self
                .bindings
                .get(id)
                .ok_or(RuntimeError::UnknownBinding(id))?
                .state_name,
        );
        let address = self.binding_address(id)?.absolute(state_name);
        self.set_value(&address, value)
    }

    /// Whether a write at `written` can affect the cell at `target`.
    fn indexes_agree(&self, written: &StateAddress, target: &StateAddress) -> bool {
        let (Some(w), Some(t)) = (written.list_index(), target.list_index()) else {
            return true;
        };
        let shared = self
            .paths
            .calc_wildcard_len(written.path_info(), target.path_info());
        if shared == 0 {
            return true;
        }
        self.arena.ancestor_at(w, shared - 1) == self.arena.ancestor_at(t, shared - 1)
    }

    /// Keep the list snapshots of `for` bindings in step with writes that
    /// land inside their lists, so the next diff sees current elements.
    fn refresh_list_snapshots(&mut self, state_name: &str, written: &StateAddress) -> Result<()> {
        let Some(list_index) = written.list_index() else {
            return Ok(());
        };
        let info = Rc::clone(written.path_info());
        if info.index_accessor().is_some() {
            return Ok(());
        }
        for (level, list_path) in info.wildcard_parent_paths().iter().enumerate() {
            let parent_index = match level {
                0 => None,
                _ => match self.arena.ancestor_at(list_index, level - 1) {
                    Some(li) => Some(li),
                    None => continue,
                },
            };
            let list_info = self.paths.get(list_path);
            let candidates = self.bindings.bindings_for(state_name, list_info.id()).to_vec();
            for id in candidates {
                if !self.for_states.contains_key(&id) {
                    continue;
                }
                let address = self.binding_address(id)?;
                if address.list_index() != parent_index {
                    continue;
                }
                let list = self
                    .states
                    .get_mut(state_name)?
                    .read(&self.paths, &self.arena, &address)?;
                if let (Some(state), Value::Array(items)) = (self.for_states.get_mut(&id), list) {
                    state.list = items;
                }
            }
        }
        Ok(())
    }

    /// Mark the element bindings of every row of `id` as applied.
    ///
    /// Fresh rows were applied by the pass already; kept rows hold an element
    /// equal to the one they rendered.
    fn settle_kept_rows(&mut self, id: BindingId) {
        let Some(desc) = self.bindings.get(id) else {
            return;
        };
        let element = self.paths.child(&desc.path_info, WILDCARD);
        let state_name = Rc::clone(&desc.state_name);
        let mut settled = Vec::new();
        for cid in self.nested_contents(id) {
            self.collect_element_bindings(cid, &state_name, &element, &mut settled);
        }
        if let Some(pass) = self.pass_applied.as_mut() {
            pass.extend(settled);
        }
    }

    fn collect_element_bindings(
        &self,
        cid: ContentId,
        state_name: &str,
        element: &PathInfo,
        out: &mut Vec<BindingId>,
    ) {
        let Some(content) = self.contents.get(cid) else {
            return;
        };
        for &binding in content.bindings() {
            let Some(desc) = self.bindings.get(binding) else {
                continue;
            };
            let computed = self
                .states
                .get(&desc.state_name)
                .is_ok_and(|state| state.scope().is_getter(desc.path()));
            if *desc.state_name == *state_name
                && !computed
                && is_within(desc.path_info.path(), element.path())
            {
                out.push(binding);
            }
            if desc.kind.is_structural() {
                for nested in self.nested_contents(binding) {
                    self.collect_element_bindings(nested, state_name, element, out);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Applying
    // -----------------------------------------------------------------------

    /// Read the binding's value and push it onto its node.
    pub(crate) fn apply_binding(&mut self, id: BindingId) -> Result<()> {
        let desc = self
            .bindings
            .get(id)
            .cloned()
            .ok_or(RuntimeError::UnknownBinding(id))?;
        let address = self.binding_address(id)?;
        let value = self
            .states
            .get_mut(&desc.state_name)?
            .read(&self.paths, &self.arena, &address)?;
        self.stats.record(id);
        if let Some(pass) = self.pass_applied.as_mut() {
            pass.insert(id);
        }
        trace!(binding = id.get(), path = desc.path(), "apply binding");

        match &desc.kind {
            BindingKind::Text => self.doc.set_text(desc.node, value::display(&value))?,
            BindingKind::Attribute { name } => match value {
                Value::Null | Value::Bool(false) => {
                    self.doc.remove_attribute(desc.node, name)?;
                }
                Value::Bool(true) => self.doc.set_attribute(desc.node, name, "")?,
                other => self.doc.set_attribute(desc.node, name, value::display(&other))?,
            },
            BindingKind::Property { name } => self.doc.set_property(desc.node, name, value)?,
            BindingKind::For { template } => self.apply_change_to_for(&desc, template, value)?,
            BindingKind::If { template, negate } => {
                self.apply_change_to_if(&desc, template, *negate, &value)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content handles
    // -----------------------------------------------------------------------

    /// Mount a block (and its nested blocks) right after `reference`.
    pub fn mount_content_after(&mut self, id: ContentId, reference: NodeId) -> Result<()> {
        let run = self.content_run(id);
        let content = self
            .contents
            .get_mut(id)
            .ok_or(RuntimeError::UnknownContent(id))?;
        content.mount_after(&mut self.doc, reference, &run)
    }

    /// Detach a block and its nested blocks without destroying them.
    pub fn unmount_content(&mut self, id: ContentId) -> Result<()> {
        let run = self.content_run(id);
        let content = self
            .contents
            .get_mut(id)
            .ok_or(RuntimeError::UnknownContent(id))?;
        content.unmount(&mut self.doc, true)?;
        for node in run {
            self.doc.remove(node)?;
        }
        Ok(())
    }
}

/// Whether `path` is `prefix` or one of its descendants.
fn is_within(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}
