#![forbid(unsafe_code)]

//! Hierarchical list indices.
//!
//! A list index names "the i-th slot of one repetition". Nested repetitions
//! chain their indices to the enclosing slot, so the index of the third label
//! of the second user is `[1, 2]` read from the root.
//!
//! Indices live in a [`ListIndexArena`] and are referenced by generational
//! [`ListIndexId`] handles; a handle's identity *is* the slot identity. When a
//! list is reordered the diff keeps the handle and only rewrites its `index`,
//! which is what lets rendered content survive the move.
//!
//! # Invariants
//!
//! 1. `position` (depth) is fixed at creation: `parent.position + 1`, or `0`.
//! 2. The arena version increases on every creation and every effective
//!    `set_index`; the touched record is stamped with it.
//! 3. `indexes()` is cached per record and recomputed whenever the record or
//!    any ancestor carries a version newer than the cached snapshot. It is
//!    never returned stale.
//! 4. A released handle is never resolved again: its slot generation moves on.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Released handle | Slot freed by the reconciler | `CoreError::StaleListIndex` |
//! | Released ancestor | Parent freed before child | `CoreError::StaleListIndex` on `indexes()` |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{CoreError, Result};

/// Generational handle to a list index record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListIndexId {
    slot: u32,
    generation: u32,
}

impl fmt::Debug for ListIndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListIndexId({}v{})", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct IndexesCache {
    snapshot: u64,
    indexes: Rc<[usize]>,
}

#[derive(Debug)]
struct Record {
    generation: u32,
    alive: bool,
    parent: Option<ListIndexId>,
    position: usize,
    index: usize,
    version: u64,
    cache: RefCell<Option<IndexesCache>>,
}

/// Arena of list index records.
#[derive(Debug, Default)]
pub struct ListIndexArena {
    records: Vec<Record>,
    free: Vec<u32>,
    version: u64,
    live: usize,
}

impl ListIndexArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: ListIndexId) -> Result<&Record> {
        match self.records.get(id.slot as usize) {
            Some(rec) if rec.alive && rec.generation == id.generation => Ok(rec),
            _ => Err(CoreError::StaleListIndex),
        }
    }

    fn record_mut(&mut self, id: ListIndexId) -> Result<&mut Record> {
        match self.records.get_mut(id.slot as usize) {
            Some(rec) if rec.alive && rec.generation == id.generation => Ok(rec),
            _ => Err(CoreError::StaleListIndex),
        }
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Create a new index chained under `parent`.
    pub fn create(&mut self, parent: Option<ListIndexId>, index: usize) -> Result<ListIndexId> {
        let position = match parent {
            Some(p) => self.record(p)?.position + 1,
            None => 0,
        };
        let version = self.next_version();
        let record = Record {
            generation: 0,
            alive: true,
            parent,
            position,
            index,
            version,
            cache: RefCell::new(None),
        };
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let rec = &mut self.records[slot as usize];
            let generation = rec.generation;
            *rec = Record {
                generation,
                ..record
            };
            Ok(ListIndexId { slot, generation })
        } else {
            let slot = self.records.len() as u32;
            self.records.push(record);
            Ok(ListIndexId {
                slot,
                generation: 0,
            })
        }
    }

    /// Move a slot to a new position without changing its identity.
    ///
    /// A no-op when the index is unchanged; otherwise stamps a fresh version
    /// so cached `indexes()` of this record and all descendants go stale.
    pub fn set_index(&mut self, id: ListIndexId, index: usize) -> Result<()> {
        if self.record(id)?.index == index {
            return Ok(());
        }
        let version = self.next_version();
        let rec = self.record_mut(id)?;
        rec.index = index;
        rec.version = version;
        Ok(())
    }

    /// Current slot number.
    pub fn index(&self, id: ListIndexId) -> Result<usize> {
        Ok(self.record(id)?.index)
    }

    /// Depth in the repetition chain, `0` at top level.
    pub fn position(&self, id: ListIndexId) -> Result<usize> {
        Ok(self.record(id)?.position)
    }

    /// Number of levels in the chain (`position + 1`).
    pub fn depth(&self, id: ListIndexId) -> Result<usize> {
        Ok(self.record(id)?.position + 1)
    }

    pub fn parent(&self, id: ListIndexId) -> Result<Option<ListIndexId>> {
        Ok(self.record(id)?.parent)
    }

    /// Version stamped on the last creation or move of this record.
    pub fn version(&self, id: ListIndexId) -> Result<u64> {
        Ok(self.record(id)?.version)
    }

    /// Arena-wide version counter.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.version
    }

    /// The ancestor (or self) at `position`, or `None` when `position` is
    /// deeper than this record or the handle is stale.
    #[must_use]
    pub fn ancestor_at(&self, id: ListIndexId, position: usize) -> Option<ListIndexId> {
        let mut current = id;
        loop {
            let rec = self.record(current).ok()?;
            if rec.position == position {
                return Some(current);
            }
            if rec.position < position {
                return None;
            }
            current = rec.parent?;
        }
    }

    /// Full index path from the root repetition down to this slot.
    pub fn indexes(&self, id: ListIndexId) -> Result<Rc<[usize]>> {
        let rec = self.record(id)?;
        if let Some(cache) = rec.cache.borrow().as_ref() {
            if !self.is_dirty(rec, cache.snapshot)? {
                return Ok(Rc::clone(&cache.indexes));
            }
        }

        let mut chain = vec![0; rec.position + 1];
        let mut current = Some(id);
        while let Some(cur) = current {
            let r = self.record(cur)?;
            chain[r.position] = r.index;
            current = r.parent;
        }
        let indexes: Rc<[usize]> = Rc::from(chain);
        *rec.cache.borrow_mut() = Some(IndexesCache {
            snapshot: self.version,
            indexes: Rc::clone(&indexes),
        });
        Ok(indexes)
    }

    fn is_dirty(&self, rec: &Record, snapshot: u64) -> Result<bool> {
        if rec.version > snapshot {
            return Ok(true);
        }
        let mut parent = rec.parent;
        while let Some(p) = parent {
            let r = self.record(p)?;
            if r.version > snapshot {
                return Ok(true);
            }
            parent = r.parent;
        }
        Ok(false)
    }

    /// Whether the handle still refers to a live record.
    #[must_use]
    pub fn is_alive(&self, id: ListIndexId) -> bool {
        self.record(id).is_ok()
    }

    /// Free the record. Releasing an already released handle is a no-op.
    pub fn release(&mut self, id: ListIndexId) {
        if let Ok(rec) = self.record_mut(id) {
            rec.alive = false;
            rec.generation = rec.generation.wrapping_add(1);
            rec.parent = None;
            *rec.cache.get_mut() = None;
            self.free.push(id.slot);
            self.live -= 1;
        }
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }
}
