#![no_main]

//! Diffing arbitrary list pairs yields a consistent reuse plan.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wcs_core::{ListIndexArena, create_list_diff};

#[derive(Debug, Arbitrary)]
struct Input {
    old: Vec<u8>,
    new: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut arena = ListIndexArena::new();
    let Ok(first) = create_list_diff(&mut arena, None, &[], &input.old, &[]) else {
        return;
    };
    let Ok(diff) = create_list_diff(&mut arena, None, &input.old, &input.new, &first.new_indexes)
    else {
        return;
    };

    assert_eq!(diff.new_indexes.len(), input.new.len());
    let kept = diff.new_indexes.len() - diff.added.len();
    assert_eq!(kept + diff.removed.len(), input.old.len());
    for (slot, &id) in diff.new_indexes.iter().enumerate() {
        assert_eq!(arena.index(id).ok(), Some(slot));
    }
    for id in &diff.removed {
        assert!(!diff.new_indexes.contains(id));
    }
});
