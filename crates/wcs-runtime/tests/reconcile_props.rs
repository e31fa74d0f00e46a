#![forbid(unsafe_code)]

//! Property tests for list reconciliation over random list sequences.

use ahash::AHashMap;
use proptest::prelude::*;
use serde_json::json;
use wcs_core::ListIndexId;
use wcs_dom::NodeId;
use wcs_runtime::{
    BindingId, BindingKind, ContentId, NodeBindingSpec, Runtime, RuntimeConfig, StateScope,
};

fn small_list() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 0..6)
}

/// `<ul><!--for--></ul>` with rows `<li><b>{$1}</b><span>{items.*}</span><i>{count}</i></li>`
/// and `count = len(items)`.
fn counted_list(items: &[u8], pool_capacity: usize) -> (Runtime, NodeId, BindingId) {
    let scope = StateScope::new("default", json!({ "items": items }))
        .with_getter("count", |cx| json!(cx.get("items").as_array().map_or(0, Vec::len)));
    let config = RuntimeConfig::default().with_pool_capacity(pool_capacity);
    let mut rt = Runtime::new(config).unwrap();
    rt.register_state(scope);

    let doc = rt.document_mut();
    let frag = doc.create_fragment();
    let li = doc.create_element("li");
    for tag in ["b", "span", "i"] {
        let el = doc.create_element(tag);
        let text = doc.create_text("");
        doc.append_child(el, text).unwrap();
        doc.append_child(li, el).unwrap();
    }
    doc.append_child(frag, li).unwrap();
    let ul = doc.create_element("ul");
    let anchor = doc.create_comment("for");
    doc.append_child(ul, anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, ul).unwrap();

    rt.register_template(
        "row",
        frag,
        vec![
            NodeBindingSpec::new([0, 0, 0], BindingKind::Text, "$1"),
            NodeBindingSpec::new([0, 1, 0], BindingKind::Text, "items.*"),
            NodeBindingSpec::new([0, 2, 0], BindingKind::Text, "count"),
        ],
    )
    .unwrap();
    let binding = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "items", None)
        .unwrap();
    (rt, ul, binding)
}

fn expected_markup(items: &[u8]) -> String {
    let rows: String = items
        .iter()
        .enumerate()
        .map(|(pos, v)| format!("<li><b>{pos}</b><span>{v}</span><i>{}</i></li>", items.len()))
        .collect();
    format!("<ul><!--for-->{rows}</ul>")
}

/// Rows a diff keeps: per value, the smaller of its two counts.
fn kept_rows(old: &[u8], new: &[u8]) -> usize {
    let mut counts: AHashMap<u8, (usize, usize)> = AHashMap::new();
    for v in old {
        counts.entry(*v).or_default().0 += 1;
    }
    for v in new {
        counts.entry(*v).or_default().1 += 1;
    }
    counts.values().map(|(a, b)| (*a).min(*b)).sum()
}

fn blocks_by_index(rt: &Runtime, binding: BindingId) -> AHashMap<ListIndexId, ContentId> {
    rt.for_list_indexes(binding)
        .iter()
        .copied()
        .zip(rt.for_contents(binding))
        .collect()
}

proptest! {
    #[test]
    fn dom_follows_every_list(
        first in small_list(),
        steps in prop::collection::vec(small_list(), 1..6),
        pool_capacity in 0usize..3,
    ) {
        let (mut rt, ul, binding) = counted_list(&first, pool_capacity);
        prop_assert_eq!(rt.document().markup(ul).unwrap(), expected_markup(&first));

        let mut old = first;
        for new in steps {
            let before = blocks_by_index(&rt, binding);
            rt.set("items", json!(new)).unwrap();

            prop_assert_eq!(rt.document().markup(ul).unwrap(), expected_markup(&new));
            prop_assert_eq!(rt.arena().live_count(), new.len());

            let after = blocks_by_index(&rt, binding);
            let kept: Vec<_> = after.keys().filter(|li| before.contains_key(li)).collect();
            prop_assert_eq!(kept.len(), kept_rows(&old, &new));
            for li in kept {
                prop_assert_eq!(before[li], after[li], "kept row keeps its block");
                prop_assert!(rt.content(after[li]).unwrap().is_mounted());
            }
            old = new;
        }
    }
}
