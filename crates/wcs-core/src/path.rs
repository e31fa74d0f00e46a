#![forbid(unsafe_code)]

//! Interned path descriptors.
//!
//! A path is a dotted string naming a location in reactive state, e.g.
//! `users.*.name`. The `*` segment means "the current slot of this
//! repetition"; a path with `n` wildcards needs an `n`-deep list index to
//! address a single value.
//!
//! [`PathRegistry`] interns one [`PathInfo`] per distinct string. Everything
//! that identifies a path downstream (addresses, dependency edges, version
//! counters) uses the cheap [`PathId`] instead of the string.
//!
//! # Invariants
//!
//! 1. `registry.get(p)` returns the same `Rc` for the same string for the
//!    lifetime of the registry.
//! 2. A `PathInfo` never changes after construction; only its lazily computed
//!    parent link is filled in once.
//! 3. Ids are assigned in creation order. Wildcard prefixes of a path are
//!    interned before the path itself, so they always have lower ids.
//! 4. `calc_wildcard_len(a, b) == calc_wildcard_len(b, a)`.
//!
//! # Failure Modes
//!
//! None. Any string is a valid, if degenerate, path: `""` has no segments and
//! no parent.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

/// Segment delimiter.
pub const DELIMITER: char = '.';

/// Wildcard segment token.
pub const WILDCARD: &str = "*";

/// Prefix of positional accessor paths (`$1`, `$2`, ...).
pub const INDEX_ACCESSOR_PREFIX: char = '$';

/// Registry-unique identifier of an interned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(u32);

impl PathId {
    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Immutable descriptor for one distinct path string.
pub struct PathInfo {
    id: PathId,
    path: Rc<str>,
    segments: Vec<Rc<str>>,
    wildcard_positions: SmallVec<[usize; 4]>,
    wildcard_paths: Vec<Rc<str>>,
    wildcard_parent_paths: Vec<Rc<str>>,
    wildcard_path_ids: SmallVec<[PathId; 4]>,
    index_accessor: Option<usize>,
    parent: OnceCell<Option<PathId>>,
}

impl PathInfo {
    #[inline]
    #[must_use]
    pub fn id(&self) -> PathId {
        self.id
    }

    /// The full path string.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn segments(&self) -> &[Rc<str>] {
        &self.segments
    }

    /// Last segment, or `""` for the empty path.
    #[must_use]
    pub fn last_segment(&self) -> &str {
        self.segments.last().map_or("", |s| &**s)
    }

    /// Segment indices holding the wildcard token.
    #[must_use]
    pub fn wildcard_positions(&self) -> &[usize] {
        &self.wildcard_positions
    }

    /// Prefix paths ending at each wildcard (`a.*.b.*` → `a.*`, `a.*.b.*`).
    #[must_use]
    pub fn wildcard_paths(&self) -> &[Rc<str>] {
        &self.wildcard_paths
    }

    /// Prefix paths ending just before each wildcard (`a.*.b.*` → `a`, `a.*.b`).
    #[must_use]
    pub fn wildcard_parent_paths(&self) -> &[Rc<str>] {
        &self.wildcard_parent_paths
    }

    /// Interned ids of [`wildcard_paths`](Self::wildcard_paths), same order.
    #[must_use]
    pub fn wildcard_path_ids(&self) -> &[PathId] {
        &self.wildcard_path_ids
    }

    #[inline]
    #[must_use]
    pub fn wildcard_count(&self) -> usize {
        self.wildcard_positions.len()
    }

    /// For `$n` paths, the 1-based loop level they read.
    #[inline]
    #[must_use]
    pub fn index_accessor(&self) -> Option<usize> {
        self.index_accessor
    }

    /// Whether resolving this path needs a list index.
    #[inline]
    #[must_use]
    pub fn needs_list_index(&self) -> bool {
        self.wildcard_count() > 0 || self.index_accessor.is_some()
    }

    /// List index depth required to address one value of this path.
    #[inline]
    #[must_use]
    pub fn required_depth(&self) -> usize {
        self.index_accessor.unwrap_or(0).max(self.wildcard_count())
    }
}

impl fmt::Debug for PathInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathInfo")
            .field("id", &self.id.0)
            .field("path", &&*self.path)
            .field("wildcard_count", &self.wildcard_count())
            .finish()
    }
}

impl PartialEq for PathInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PathInfo {}

/// Pieces of a path computed before interning.
struct ParsedPath {
    segments: Vec<Rc<str>>,
    wildcard_positions: SmallVec<[usize; 4]>,
    wildcard_paths: Vec<Rc<str>>,
    wildcard_parent_paths: Vec<Rc<str>>,
    index_accessor: Option<usize>,
}

impl ParsedPath {
    fn parse(path: &str) -> Self {
        let segments: Vec<Rc<str>> = if path.is_empty() {
            Vec::new()
        } else {
            path.split(DELIMITER).map(Rc::from).collect()
        };

        let mut wildcard_positions = SmallVec::new();
        let mut wildcard_paths = Vec::new();
        let mut wildcard_parent_paths = Vec::new();
        for (pos, segment) in segments.iter().enumerate() {
            if &**segment == WILDCARD {
                wildcard_positions.push(pos);
                wildcard_paths.push(Rc::from(join(&segments[..=pos])));
                wildcard_parent_paths.push(Rc::from(join(&segments[..pos])));
            }
        }

        let index_accessor = match segments.as_slice() {
            [only] => only
                .strip_prefix(INDEX_ACCESSOR_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|&n| n > 0),
            _ => None,
        };

        Self {
            segments,
            wildcard_positions,
            wildcard_paths,
            wildcard_parent_paths,
            index_accessor,
        }
    }
}

fn join(segments: &[Rc<str>]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(segment);
    }
    out
}

#[derive(Default)]
struct RegistryInner {
    by_path: AHashMap<Rc<str>, Rc<PathInfo>>,
    by_id: Vec<Rc<PathInfo>>,
    wildcard_len_memo: AHashMap<(PathId, PathId), usize>,
}

/// Interning registry for [`PathInfo`] descriptors.
///
/// Single-threaded: uses interior mutability so lookups take `&self` and can
/// be made while other runtime state is borrowed.
#[derive(Default)]
pub struct PathRegistry {
    inner: RefCell<RegistryInner>,
}

impl PathRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the interned descriptor for `path`, creating it on first use.
    pub fn get(&self, path: &str) -> Rc<PathInfo> {
        if let Some(info) = self.inner.borrow().by_path.get(path) {
            return Rc::clone(info);
        }

        let parsed = ParsedPath::parse(path);

        // Intern strict wildcard prefixes first; the last wildcard path may be
        // the path itself and gets this path's own id below.
        let prefix_ids: SmallVec<[Option<PathId>; 4]> = parsed
            .wildcard_paths
            .iter()
            .map(|wp| (&**wp != path).then(|| self.get(wp).id))
            .collect();

        let mut inner = self.inner.borrow_mut();
        let id = PathId(inner.by_id.len() as u32);
        let info = Rc::new(PathInfo {
            id,
            path: Rc::from(path),
            segments: parsed.segments,
            wildcard_positions: parsed.wildcard_positions,
            wildcard_paths: parsed.wildcard_paths,
            wildcard_parent_paths: parsed.wildcard_parent_paths,
            wildcard_path_ids: prefix_ids.into_iter().map(|p| p.unwrap_or(id)).collect(),
            index_accessor: parsed.index_accessor,
            parent: OnceCell::new(),
        });
        inner.by_path.insert(Rc::clone(&info.path), Rc::clone(&info));
        inner.by_id.push(Rc::clone(&info));

        #[cfg(feature = "tracing")]
        tracing::trace!(path, id = id.0, "interned path");

        info
    }

    /// Look up a descriptor by id.
    #[must_use]
    pub fn by_id(&self, id: PathId) -> Option<Rc<PathInfo>> {
        self.inner.borrow().by_id.get(id.0 as usize).cloned()
    }

    /// Path with its last segment removed; `None` for single-segment or empty
    /// paths. Computed on first call and cached on the descriptor.
    pub fn parent(&self, info: &PathInfo) -> Option<Rc<PathInfo>> {
        let parent_id = *info.parent.get_or_init(|| {
            if info.segments.len() <= 1 {
                return None;
            }
            let cut = info.path.rfind(DELIMITER)?;
            Some(self.get(&info.path[..cut]).id)
        });
        parent_id.and_then(|id| self.by_id(id))
    }

    /// Descriptor for `info.path + "." + segment`.
    pub fn child(&self, info: &PathInfo, segment: &str) -> Rc<PathInfo> {
        if info.path.is_empty() {
            return self.get(segment);
        }
        let mut path = String::with_capacity(info.path.len() + 1 + segment.len());
        path.push_str(&info.path);
        path.push(DELIMITER);
        path.push_str(segment);
        self.get(&path)
    }

    /// Number of leading wildcard paths shared by `a` and `b`.
    ///
    /// This is how many ancestor list-index levels two paths have in common.
    /// Memoized under `(min id, max id)` so both argument orders share one
    /// entry.
    pub fn calc_wildcard_len(&self, a: &PathInfo, b: &PathInfo) -> usize {
        if a.id == b.id {
            return a.wildcard_count();
        }
        let key = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        if let Some(&len) = self.inner.borrow().wildcard_len_memo.get(&key) {
            return len;
        }
        let len = a
            .wildcard_path_ids
            .iter()
            .zip(b.wildcard_path_ids.iter())
            .take_while(|(x, y)| x == y)
            .count();
        self.inner.borrow_mut().wildcard_len_memo.insert(key, len);
        len
    }

    /// Number of interned paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PathRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRegistry")
            .field("paths", &self.len())
            .finish()
    }
}
