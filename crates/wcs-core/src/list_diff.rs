#![forbid(unsafe_code)]

//! List diffing with identity reuse.
//!
//! [`create_list_diff`] compares the previous list (and the indices assigned
//! to it) with a new list and returns a [`ListDiff`]: the plan a reconciler
//! applies. The diff itself touches nothing but the [`ListIndexArena`]:
//! reused indices have their slot number rewritten in place, new slots get
//! fresh indices, and dropped slots are only reported.
//!
//! # Matching policy
//!
//! 1. If old and new are element-wise equal, every index is reused as is.
//! 2. Otherwise items are matched by value. Each old item is bucketed under
//!    its [`ItemFingerprint`]; a new item takes the first unclaimed old item in
//!    its bucket that compares equal. Duplicates therefore pair up in old
//!    order.
//! 3. New items without a match get fresh indices under `parent`.
//! 4. Old items left unclaimed are reported as removed, in old order.
//!
//! # Invariants
//!
//! 1. `new_indexes.len() == new_list.len()`.
//! 2. Every id in `moved` is also in `new_indexes` and its arena index equals
//!    its position in `new_indexes`.
//! 3. `added`, `removed` and the reused ids are pairwise disjoint.
//! 4. Deterministic: diffing the same pair again reuses the same ids.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `old_indexes` shorter than `old_list` | Caller lost track | Missing slots count as fresh inserts |
//! | Stale id in `old_indexes` | Released elsewhere | `CoreError::StaleListIndex` |

use std::hash::{Hash, Hasher};

use ahash::{AHashMap, AHashSet, AHasher};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::Result;
use crate::list_index::{ListIndexArena, ListIndexId};

/// Hash used to bucket list items before the equality check.
///
/// Values that compare equal must produce equal fingerprints.
pub trait ItemFingerprint {
    fn fingerprint<H: Hasher>(&self, state: &mut H);
}

macro_rules! fingerprint_via_hash {
    ($($t:ty),* $(,)?) => {
        $(impl ItemFingerprint for $t {
            #[inline]
            fn fingerprint<H: Hasher>(&self, state: &mut H) {
                self.hash(state);
            }
        })*
    };
}

fingerprint_via_hash!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, String, str);

impl<T: ItemFingerprint + ?Sized> ItemFingerprint for &T {
    fn fingerprint<H: Hasher>(&self, state: &mut H) {
        (**self).fingerprint(state);
    }
}

impl ItemFingerprint for Value {
    fn fingerprint<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                2u8.hash(state);
                // Numbers that compare equal share their f64 rendering.
                n.as_f64().map(f64::to_bits).hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Array(items) => {
                4u8.hash(state);
                items.len().hash(state);
                for item in items {
                    item.fingerprint(state);
                }
            }
            Value::Object(map) => {
                5u8.hash(state);
                map.len().hash(state);
                // serde_json keeps keys sorted unless preserve_order is on;
                // mixing keys order-independently keeps equal maps equal.
                let mut mix = 0u64;
                for (key, value) in map {
                    let mut h = AHasher::default();
                    key.hash(&mut h);
                    value.fingerprint(&mut h);
                    mix = mix.wrapping_add(h.finish());
                }
                mix.hash(state);
            }
        }
    }
}

fn fingerprint_of<T: ItemFingerprint + ?Sized>(item: &T) -> u64 {
    let mut hasher = AHasher::default();
    item.fingerprint(&mut hasher);
    hasher.finish()
}

/// Reuse plan produced by [`create_list_diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    /// One index per new item, in new order.
    pub new_indexes: Vec<ListIndexId>,
    /// Freshly created indices.
    pub added: AHashSet<ListIndexId>,
    /// Old indices with no counterpart in the new list, in old order.
    pub removed: Vec<ListIndexId>,
    /// Reused indices whose slot number changed.
    pub moved: AHashSet<ListIndexId>,
    /// Old and new lists were element-wise equal.
    pub is_same: bool,
}

impl ListDiff {
    /// Whether nothing was added, removed or moved.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }
}

/// Compute the reuse plan for `old_list -> new_list`.
///
/// `old_indexes[i]` is the index previously assigned to `old_list[i]`; pass an
/// empty slice on the first run.
pub fn create_list_diff<T>(
    arena: &mut ListIndexArena,
    parent: Option<ListIndexId>,
    old_list: &[T],
    new_list: &[T],
    old_indexes: &[ListIndexId],
) -> Result<ListDiff>
where
    T: ItemFingerprint + PartialEq,
{
    let old_len = old_list.len().min(old_indexes.len());
    let old_list = &old_list[..old_len];

    if old_len == new_list.len() && old_list == new_list {
        return Ok(ListDiff {
            new_indexes: old_indexes[..old_len].to_vec(),
            is_same: true,
            ..ListDiff::default()
        });
    }

    let mut buckets: AHashMap<u64, SmallVec<[usize; 2]>> = AHashMap::with_capacity(old_len);
    for (i, item) in old_list.iter().enumerate() {
        buckets.entry(fingerprint_of(item)).or_default().push(i);
    }

    let mut claimed = vec![false; old_len];
    let mut diff = ListDiff {
        new_indexes: Vec::with_capacity(new_list.len()),
        ..ListDiff::default()
    };

    for (new_pos, item) in new_list.iter().enumerate() {
        let matched = buckets.get_mut(&fingerprint_of(item)).and_then(|bucket| {
            let at = bucket
                .iter()
                .position(|&old_pos| !claimed[old_pos] && old_list[old_pos] == *item)?;
            Some(bucket.remove(at))
        });

        match matched {
            Some(old_pos) => {
                claimed[old_pos] = true;
                let id = old_indexes[old_pos];
                if arena.index(id)? != new_pos {
                    arena.set_index(id, new_pos)?;
                    diff.moved.insert(id);
                }
                diff.new_indexes.push(id);
            }
            None => {
                let id = arena.create(parent, new_pos)?;
                diff.added.insert(id);
                diff.new_indexes.push(id);
            }
        }
    }

    diff.removed = claimed
        .iter()
        .enumerate()
        .filter(|&(_, &was_claimed)| !was_claimed)
        .map(|(i, _)| old_indexes[i])
        .collect();

    #[cfg(feature = "tracing")]
    tracing::trace!(
        old = old_len,
        new = new_list.len(),
        added = diff.added.len(),
        removed = diff.removed.len(),
        moved = diff.moved.len(),
        "list diff"
    );

    Ok(diff)
}
