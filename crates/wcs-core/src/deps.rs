#![forbid(unsafe_code)]

//! Version counters and dependency maps.
//!
//! Three pieces decide what a write invalidates:
//!
//! - [`VersionMap`]: a revision counter plus the revision at which each path
//!   was last written.
//! - [`DependencyGraph`]: *static* edges from every bound path's prefix to the
//!   path (`users` → `users.*` → `users.*.name`), and *dynamic* edges from a
//!   path read by a getter to the getter's path, recorded while it runs.
//! - [`ComputedCache`]: getter results stamped with the revision they were
//!   computed at and the paths they read.
//!
//! # Invariants
//!
//! 1. `bump` strictly increases the revision; a path's version is the
//!    revision of its last write, `0` if never written.
//! 2. A cached value is fresh iff neither its own path, nor any dependency,
//!    nor any prefix of those has a version newer than the cached revision.
//!    Writing `users` therefore invalidates everything computed from
//!    `users.*.name`.
//! 3. `dependents(p)` starts with `p`, lists each path once, and is in
//!    breadth-first order over both edge kinds.
//!
//! # Failure Modes
//!
//! - Ids from a different registry: lookups miss and the entry counts as
//!   fresh only if no known path changed. Use one registry per runtime.

use std::collections::VecDeque;
use std::fmt;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use crate::address::StateAddress;
use crate::list_index::ListIndexId;
use crate::path::{PathId, PathInfo, PathRegistry};

/// Per-path write versions.
#[derive(Debug, Default, Clone)]
pub struct VersionMap {
    revision: u64,
    versions: AHashMap<PathId, u64>,
}

impl VersionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest revision handed out.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Revision of the last write to `path`.
    #[must_use]
    pub fn version(&self, path: PathId) -> u64 {
        self.versions.get(&path).copied().unwrap_or(0)
    }

    /// Record a write to `path`, returning its new version.
    pub fn bump(&mut self, path: PathId) -> u64 {
        self.revision += 1;
        self.versions.insert(path, self.revision);
        self.revision
    }

    /// Newest version among `info` and all of its prefixes.
    pub fn newest_along(&self, registry: &PathRegistry, info: &PathInfo) -> u64 {
        let mut newest = self.version(info.id());
        let mut parent = registry.parent(info);
        while let Some(p) = parent {
            newest = newest.max(self.version(p.id()));
            parent = registry.parent(&p);
        }
        newest
    }
}

/// Static and dynamic dependency edges between paths.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    static_children: AHashMap<PathId, SmallVec<[PathId; 4]>>,
    dynamic: AHashMap<PathId, SmallVec<[PathId; 4]>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register prefix edges for every ancestor of `info`.
    pub fn add_static_path(&mut self, registry: &PathRegistry, info: &PathInfo) {
        let mut child = info.id();
        let mut parent = registry.parent(info);
        while let Some(p) = parent {
            let children = self.static_children.entry(p.id()).or_default();
            if children.contains(&child) {
                // The rest of the chain was registered with this edge.
                return;
            }
            children.push(child);
            child = p.id();
            parent = registry.parent(&p);
        }
    }

    /// Record that the getter at `dependent` read `source`.
    ///
    /// Returns `false` if the edge already existed.
    pub fn add_dynamic_dependency(&mut self, source: PathId, dependent: PathId) -> bool {
        if source == dependent {
            return false;
        }
        let targets = self.dynamic.entry(source).or_default();
        if targets.contains(&dependent) {
            return false;
        }
        targets.push(dependent);
        true
    }

    #[must_use]
    pub fn static_children(&self, path: PathId) -> &[PathId] {
        self.static_children
            .get(&path)
            .map(SmallVec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn dynamic_dependents(&self, path: PathId) -> &[PathId] {
        self.dynamic
            .get(&path)
            .map(SmallVec::as_slice)
            .unwrap_or(&[])
    }

    /// `path` followed by every path reachable over static or dynamic edges.
    #[must_use]
    pub fn dependents(&self, path: PathId) -> Vec<PathId> {
        let mut seen = AHashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([path]);
        while let Some(p) = queue.pop_front() {
            if !seen.insert(p) {
                continue;
            }
            order.push(p);
            queue.extend(self.static_children(p).iter().copied());
            queue.extend(self.dynamic_dependents(p).iter().copied());
        }
        order
    }
}

/// One cached getter result.
#[derive(Debug, Clone)]
pub struct CachedValue<V> {
    pub value: V,
    pub revision: u64,
    pub deps: SmallVec<[PathId; 4]>,
}

/// Getter results keyed by address.
pub struct ComputedCache<V> {
    entries: AHashMap<StateAddress, CachedValue<V>>,
}

impl<V> Default for ComputedCache<V> {
    fn default() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }
}

impl<V> ComputedCache<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value for `address`, if still fresh.
    pub fn get_fresh(
        &self,
        address: &StateAddress,
        versions: &VersionMap,
        registry: &PathRegistry,
    ) -> Option<&V> {
        let entry = self.entries.get(address)?;
        if versions.newest_along(registry, address.path_info()) > entry.revision {
            return None;
        }
        for dep in &entry.deps {
            let info = registry.by_id(*dep)?;
            if versions.newest_along(registry, &info) > entry.revision {
                return None;
            }
        }
        Some(&entry.value)
    }

    pub fn insert(&mut self, address: StateAddress, entry: CachedValue<V>) {
        self.entries.insert(address, entry);
    }

    pub fn invalidate(&mut self, address: &StateAddress) -> Option<CachedValue<V>> {
        self.entries.remove(address)
    }

    /// Drop every entry addressed through `list_index`.
    pub fn invalidate_list_index(&mut self, list_index: ListIndexId) {
        self.entries
            .retain(|address, _| address.list_index() != Some(list_index));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> fmt::Debug for ComputedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
