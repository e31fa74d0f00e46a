#![forbid(unsafe_code)]

//! State scopes.
//!
//! A [`StateScope`] is a named JSON document plus computed getters keyed by
//! path. Getters may sit on wildcard paths (`users.*.label`); they run with
//! the list index of the cell being read and can read other paths through
//! [`GetterContext`], which records each read as a dynamic dependency.
//!
//! Each registered scope gets its own [`ScopeState`] bookkeeping: version
//! counters, dependency graph and computed cache.
//!
//! # Invariants
//!
//! 1. A getter result is served from cache only while no path it read (nor
//!    any prefix of those, nor its own path) was written after it ran.
//! 2. `$n` reads return the n-th entry (1-based, outermost first) of the
//!    address's list index chain.
//! 3. Writes never target getters or `$n` paths.
//!
//! # Failure Modes
//!
//! - A getter that reads itself, directly or through other getters, sees
//!   `null` for the cyclic read; a debug event is emitted.
//! - A getter read that cannot be resolved against the getter's list index
//!   yields `null`.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::debug;
use wcs_core::{
    CachedValue, ComputedCache, CoreError, DependencyGraph, ListIndexArena, ListIndexId, PathId,
    PathInfo, PathRegistry, StateAddress, VersionMap,
};

use crate::error::{Result, RuntimeError};
use crate::value::{self, WriteError};

/// A computed getter.
pub type Getter = Rc<dyn Fn(&mut GetterContext<'_>) -> Value>;

/// User-facing definition of a state scope.
#[derive(Clone)]
pub struct StateScope {
    name: Rc<str>,
    data: Value,
    getters: AHashMap<Rc<str>, Getter>,
}

impl StateScope {
    pub fn new(name: impl Into<Rc<str>>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            getters: AHashMap::new(),
        }
    }

    /// Add a getter on `path`.
    #[must_use]
    pub fn with_getter(
        mut self,
        path: impl Into<Rc<str>>,
        getter: impl Fn(&mut GetterContext<'_>) -> Value + 'static,
    ) -> Self {
        self.getters.insert(path.into(), Rc::new(getter));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn is_getter(&self, path: &str) -> bool {
        self.getters.contains_key(path)
    }

    fn getter(&self, path: &str) -> Option<Getter> {
        self.getters.get(path).cloned()
    }
}

impl fmt::Debug for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateScope")
            .field("name", &self.name)
            .field("getters", &self.getters.len())
            .finish()
    }
}

/// A scope plus its change-tracking state.
#[derive(Debug)]
pub struct ScopeState {
    scope: StateScope,
    pub(crate) versions: VersionMap,
    pub(crate) graph: DependencyGraph,
    pub(crate) cache: ComputedCache<Value>,
    evaluating: Vec<StateAddress>,
}

impl ScopeState {
    #[must_use]
    pub fn new(scope: StateScope) -> Self {
        Self {
            scope,
            versions: VersionMap::new(),
            graph: DependencyGraph::new(),
            cache: ComputedCache::new(),
            evaluating: Vec::new(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &StateScope {
        &self.scope
    }

    #[must_use]
    pub fn versions(&self) -> &VersionMap {
        &self.versions
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Read the cell at `address`.
    pub fn read(
        &mut self,
        registry: &PathRegistry,
        arena: &ListIndexArena,
        address: &StateAddress,
    ) -> Result<Value> {
        let info = address.path_info();

        if let Some(level) = info.index_accessor() {
            let list_index = address.list_index().ok_or_else(|| CoreError::MissingListIndex {
                path: info.path().to_owned(),
            })?;
            let indexes = arena.indexes(list_index)?;
            return Ok(indexes
                .get(level.saturating_sub(1))
                .map_or(Value::Null, |&i| Value::from(i)));
        }

        if let Some(getter) = self.scope.getter(info.path()) {
            return self.evaluate(registry, arena, address, &getter);
        }

        let indexes = match address.list_index() {
            Some(li) if info.wildcard_count() > 0 => arena.indexes(li)?,
            _ => Rc::from([]),
        };
        let steps = value::concrete_steps(info, &indexes).ok_or_else(|| {
            CoreError::ListIndexDepthMismatch {
                path: info.path().to_owned(),
                wildcard_count: info.wildcard_count(),
                depth: indexes.len(),
            }
        })?;
        Ok(value::get_at(&self.scope.data, &steps)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn evaluate(
        &mut self,
        registry: &PathRegistry,
        arena: &ListIndexArena,
        address: &StateAddress,
        getter: &Getter,
    ) -> Result<Value> {
        if let Some(value) = self.cache.get_fresh(address, &self.versions, registry) {
            return Ok(value.clone());
        }
        if self.evaluating.contains(address) {
            debug!(path = address.path_info().path(), "cyclic getter read yields null");
            return Ok(Value::Null);
        }

        let revision = self.versions.revision();
        self.evaluating.push(address.clone());
        let (value, reads) = {
            let mut cx = GetterContext {
                registry,
                arena,
                scope: self,
                owner: Rc::clone(address.path_info()),
                list_index: address.list_index(),
                reads: SmallVec::new(),
            };
            let value = getter(&mut cx);
            (value, cx.reads)
        };
        self.evaluating.pop();

        let owner = address.path_info().id();
        for &read in &reads {
            self.graph.add_dynamic_dependency(read, owner);
        }
        self.cache.insert(
            address.clone(),
            CachedValue {
                value: value.clone(),
                revision,
                deps: reads,
            },
        );
        Ok(value)
    }

    /// Write `value` at `address` and bump the path's version.
    pub fn write(
        &mut self,
        arena: &ListIndexArena,
        address: &StateAddress,
        value: Value,
    ) -> Result<()> {
        let info = address.path_info();
        if info.index_accessor().is_some() || self.scope.is_getter(info.path()) {
            return Err(RuntimeError::NotWritable {
                path: info.path().to_owned(),
            });
        }
        let indexes = match address.list_index() {
            Some(li) if info.wildcard_count() > 0 => arena.indexes(li)?,
            _ => Rc::from([]),
        };
        let steps = value::concrete_steps(info, &indexes).ok_or_else(|| {
            CoreError::MissingListIndex {
                path: info.path().to_owned(),
            }
        })?;
        value::set_at(&mut self.scope.data, &steps, value).map_err(|WriteError::NotAContainer| {
            RuntimeError::InvalidPath {
                path: info.path().to_owned(),
            }
        })?;
        self.versions.bump(info.id());
        Ok(())
    }
}

/// What a getter sees while it runs.
pub struct GetterContext<'a> {
    registry: &'a PathRegistry,
    arena: &'a ListIndexArena,
    scope: &'a mut ScopeState,
    owner: Rc<PathInfo>,
    list_index: Option<ListIndexId>,
    reads: SmallVec<[PathId; 4]>,
}

impl GetterContext<'_> {
    /// Read `path`, resolving wildcards against the getter's own list index.
    pub fn get(&mut self, path: &str) -> Value {
        let info = self.registry.get(path);
        self.reads.push(info.id());
        match self.address_for(&info) {
            Some(address) => self
                .scope
                .read(self.registry, self.arena, &address)
                .unwrap_or_else(|e| {
                    debug!(path, error = %e, "getter read failed");
                    Value::Null
                }),
            None => {
                debug!(path, owner = self.owner.path(), "getter read is unresolvable");
                Value::Null
            }
        }
    }

    fn address_for(&self, info: &Rc<PathInfo>) -> Option<StateAddress> {
        if !info.needs_list_index() {
            return Some(StateAddress::new_unchecked(Rc::clone(info), None));
        }
        let li = self.list_index?;
        let list_index = if info.index_accessor().is_some() {
            li
        } else {
            let count = info.wildcard_count();
            if self.registry.calc_wildcard_len(info, &self.owner) < count {
                return None;
            }
            self.arena.ancestor_at(li, count - 1)?
        };
        StateAddress::new(Rc::clone(info), Some(list_index), self.arena).ok()
    }

    /// The n-th list index (1-based, outermost first) of the cell being
    /// computed.
    #[must_use]
    pub fn index(&self, level: usize) -> Option<usize> {
        let li = self.list_index?;
        let indexes = self.arena.indexes(li).ok()?;
        indexes.get(level.checked_sub(1)?).copied()
    }

    /// Path of the getter being computed.
    #[must_use]
    pub fn path(&self) -> &str {
        self.owner.path()
    }
}

/// Scopes registered with a runtime, by name.
#[derive(Debug, Default)]
pub struct StateRegistry {
    scopes: AHashMap<Rc<str>, ScopeState>,
}

impl StateRegistry {
    /// Register `scope`, replacing one with the same name.
    pub fn register(&mut self, scope: StateScope) -> Option<ScopeState> {
        let name = Rc::clone(&scope.name);
        self.scopes.insert(name, ScopeState::new(scope))
    }

    pub fn get(&self, name: &str) -> Result<&ScopeState> {
        self.scopes
            .get(name)
            .ok_or_else(|| RuntimeError::MissingStateScope {
                name: name.to_owned(),
            })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut ScopeState> {
        self.scopes
            .get_mut(name)
            .ok_or_else(|| RuntimeError::MissingStateScope {
                name: name.to_owned(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    /// Drop cached getter results addressed through `list_index`.
    pub fn invalidate_list_index(&mut self, list_index: ListIndexId) {
        for state in self.scopes.values_mut() {
            state.cache.invalidate_list_index(list_index);
        }
    }
}
