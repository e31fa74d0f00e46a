#![forbid(unsafe_code)]

//! List reconciliation through the public runtime API.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use wcs_dom::{Mutation, NodeId};
use wcs_runtime::{BindingId, BindingKind, NodeBindingSpec, Runtime, RuntimeConfig, StateScope};

struct ListFixture {
    rt: Runtime,
    list: NodeId,
    anchor: NodeId,
    binding: BindingId,
}

/// `<ul>[static]<!--for--></ul>` with rows `<li><b>{$1}</b><span>{items.*}</span></li>`.
fn list_fixture(items: Value, with_static_sibling: bool) -> ListFixture {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    rt.register_state(StateScope::new("default", json!({ "items": items })));

    let doc = rt.document_mut();
    let frag = doc.create_fragment();
    let li = doc.create_element("li");
    let b = doc.create_element("b");
    let pos = doc.create_text("");
    let span = doc.create_element("span");
    let label = doc.create_text("");
    doc.append_child(b, pos).unwrap();
    doc.append_child(span, label).unwrap();
    doc.append_child(li, b).unwrap();
    doc.append_child(li, span).unwrap();
    doc.append_child(frag, li).unwrap();

    let list = doc.create_element("ul");
    if with_static_sibling {
        let fixed = doc.create_element("li");
        doc.append_child(list, fixed).unwrap();
    }
    let anchor = doc.create_comment("for");
    doc.append_child(list, anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, list).unwrap();

    rt.register_template(
        "row",
        frag,
        vec![
            NodeBindingSpec::new([0, 0, 0], BindingKind::Text, "$1"),
            NodeBindingSpec::new([0, 1, 0], BindingKind::Text, "items.*"),
        ],
    )
    .unwrap();
    let binding = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "items", None)
        .unwrap();
    ListFixture {
        rt,
        list,
        anchor,
        binding,
    }
}

fn structural(rt: &Runtime) -> Vec<Mutation> {
    rt.document()
        .mutations()
        .iter()
        .filter(|m| m.is_structural())
        .cloned()
        .collect()
}

#[test]
fn renders_rows_in_order() {
    let fx = list_fixture(json!(["A", "B"]), false);
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>A</span></li><li><b>1</b><span>B</span></li></ul>"
    );
}

#[test]
fn swap_keeps_nodes_and_reapplies_only_positions() {
    let mut fx = list_fixture(json!(["A", "B"]), false);
    let before = fx.rt.document().children(fx.list).unwrap();
    let blocks = fx.rt.for_contents(fx.binding);
    let indexes = fx.rt.for_list_indexes(fx.binding).to_vec();
    fx.rt.reset_stats();

    fx.rt.set("items", json!(["B", "A"])).unwrap();

    let after = fx.rt.document().children(fx.list).unwrap();
    assert_eq!(after, vec![fx.anchor, before[2], before[1]]);
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>B</span></li><li><b>1</b><span>A</span></li></ul>"
    );
    assert_eq!(
        fx.rt.for_list_indexes(fx.binding),
        &[indexes[1], indexes[0]][..]
    );

    let stats = fx.rt.stats();
    assert_eq!(stats.count(fx.binding), 1);
    for block in blocks {
        let bindings = fx.rt.content(block).unwrap().bindings().to_vec();
        assert_eq!(stats.count(bindings[0]), 1, "position re-applied once");
        assert_eq!(stats.count(bindings[1]), 0, "value binding untouched");
    }
    assert_eq!(stats.total(), 3);
}

#[test]
fn empty_to_three_is_one_insertion() {
    let mut fx = list_fixture(json!([]), false);
    fx.rt.document_mut().record_mutations();

    fx.rt.set("items", json!(["x", "y", "z"])).unwrap();

    let ops = structural(&fx.rt);
    assert_eq!(ops.len(), 1, "{ops:?}");
    match &ops[0] {
        Mutation::Insert { parent, nodes } => {
            assert_eq!(*parent, fx.list);
            assert_eq!(nodes.len(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>x</span></li><li><b>1</b><span>y</span></li><li><b>2</b><span>z</span></li></ul>"
    );
}

#[test]
fn clearing_an_isolated_list_takes_one_step() {
    let mut fx = list_fixture(json!(["x", "y", "z"]), false);
    fx.rt.document_mut().record_mutations();

    fx.rt.set("items", json!([])).unwrap();

    let ops = structural(&fx.rt);
    assert!(matches!(
        ops.as_slice(),
        [Mutation::ClearChildren { removed: 4, .. }, Mutation::Insert { .. }]
    ), "{ops:?}");
    assert_eq!(fx.rt.document().markup(fx.list).unwrap(), "<ul><!--for--></ul>");
    assert_eq!(fx.rt.arena().live_count(), 0);
}

#[test]
fn clearing_beside_siblings_removes_each_block() {
    let mut fx = list_fixture(json!(["x", "y", "z"]), true);
    fx.rt.document_mut().record_mutations();

    fx.rt.set("items", json!([])).unwrap();

    let ops = structural(&fx.rt);
    assert_eq!(ops.len(), 3);
    assert!(ops.iter().all(|m| matches!(m, Mutation::Remove { .. })));
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><li></li><!--for--></ul>"
    );
}

#[test]
fn siblings_added_after_a_clear_survive_the_next_one() {
    let mut fx = list_fixture(json!(["a"]), false);
    fx.rt.set("items", json!([])).unwrap();
    fx.rt.set("items", json!(["b"])).unwrap();
    let doc = fx.rt.document_mut();
    let extra = doc.create_element("p");
    doc.append_child(fx.list, extra).unwrap();
    doc.record_mutations();

    fx.rt.set("items", json!([])).unwrap();

    let ops = structural(&fx.rt);
    assert!(
        !ops.iter().any(|m| matches!(m, Mutation::ClearChildren { .. })),
        "{ops:?}"
    );
    assert_eq!(fx.rt.document().parent(extra).unwrap(), Some(fx.list));
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><p></p></ul>"
    );
}

#[test]
fn clearing_takes_one_step_again_once_siblings_leave() {
    let mut fx = list_fixture(json!(["x"]), true);
    let fixed = fx.rt.document().children(fx.list).unwrap()[0];
    fx.rt.set("items", json!([])).unwrap();
    fx.rt.set("items", json!(["y"])).unwrap();
    fx.rt.document_mut().remove(fixed).unwrap();
    fx.rt.document_mut().record_mutations();

    fx.rt.set("items", json!([])).unwrap();

    let ops = structural(&fx.rt);
    assert!(matches!(
        ops.as_slice(),
        [Mutation::ClearChildren { removed: 2, .. }, Mutation::Insert { .. }]
    ), "{ops:?}");
    assert_eq!(fx.rt.document().markup(fx.list).unwrap(), "<ul><!--for--></ul>");
}

#[test]
fn mixed_update_reuses_kept_rows() {
    let mut fx = list_fixture(json!(["a", "b", "c"]), false);
    let before = fx.rt.document().children(fx.list).unwrap();

    fx.rt.set("items", json!(["c", "d", "a"])).unwrap();

    let after = fx.rt.document().children(fx.list).unwrap();
    assert_eq!(after[1], before[3], "c kept");
    assert_eq!(after[3], before[1], "a kept");
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>c</span></li><li><b>1</b><span>d</span></li><li><b>2</b><span>a</span></li></ul>"
    );
}

#[test]
fn duplicates_keep_their_order() {
    let mut fx = list_fixture(json!(["a", "a", "b"]), false);
    let before = fx.rt.document().children(fx.list).unwrap();

    fx.rt.set("items", json!(["b", "a", "a"])).unwrap();

    let after = fx.rt.document().children(fx.list).unwrap();
    assert_eq!(after[1], before[3]);
    assert_eq!(after[2], before[1]);
    assert_eq!(after[3], before[2]);
}

#[test]
fn element_writes_update_one_row() {
    let mut fx = list_fixture(json!(["a", "b"]), false);
    let second = fx.rt.for_list_indexes(fx.binding)[1];
    let blocks = fx.rt.for_contents(fx.binding);
    fx.rt.reset_stats();

    let address = fx
        .rt
        .absolute_address("default", "items.*", Some(second))
        .unwrap();
    fx.rt.set_value(&address, json!("B")).unwrap();

    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>a</span></li><li><b>1</b><span>B</span></li></ul>"
    );
    let first_label = fx.rt.content(blocks[0]).unwrap().bindings()[1];
    assert_eq!(fx.rt.stats().count(first_label), 0);
    assert_eq!(fx.rt.stats().count(fx.binding), 0);

    // The list snapshot followed the write, so re-setting the same list is a
    // no-op.
    fx.rt.document_mut().record_mutations();
    fx.rt.set("items", json!(["a", "B"])).unwrap();
    assert!(structural(&fx.rt).is_empty());
}

#[test]
fn pooled_rows_are_rebound() {
    let mut fx = list_fixture(json!(["a", "b", "c"]), false);
    fx.rt.set("items", json!(["a"])).unwrap();
    fx.rt.set("items", json!(["a", "x", "y"])).unwrap();
    assert_eq!(
        fx.rt.document().markup(fx.list).unwrap(),
        "<ul><!--for--><li><b>0</b><span>a</span></li><li><b>1</b><span>x</span></li><li><b>2</b><span>y</span></li></ul>"
    );
    assert_eq!(fx.rt.arena().live_count(), 3);
}

#[test]
fn disabled_pool_destroys_removed_rows() {
    let mut rt = Runtime::new(RuntimeConfig::default().with_pool_capacity(0)).unwrap();
    rt.register_state(StateScope::new("default", json!({"items": [1, 2]})));
    let doc = rt.document_mut();
    let frag = doc.create_fragment();
    let p = doc.create_element("p");
    doc.append_child(frag, p).unwrap();
    let anchor = doc.create_comment("for");
    let root = doc.root();
    doc.append_child(root, anchor).unwrap();
    rt.register_template("p", frag, Vec::new()).unwrap();
    rt.bind(anchor, BindingKind::For { template: "p".into() }, "items", None)
        .unwrap();
    let live = rt.document().live_count();

    rt.set("items", json!([1])).unwrap();
    assert_eq!(rt.document().live_count(), live - 1);
}

// ---------------------------------------------------------------------------
// Nested lists
// ---------------------------------------------------------------------------

/// `<section><!--users--></section>`, users render
/// `<div><span>{users.*.name}</span><!--tags--></div>`, tags render
/// `<i>{users.*.tags.*}</i>`.
fn nested_fixture() -> (Runtime, NodeId, BindingId) {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    rt.register_state(StateScope::new(
        "default",
        json!({"users": [
            {"name": "ann", "tags": ["a", "b"]},
            {"name": "bob", "tags": ["c"]},
        ]}),
    ));
    let doc = rt.document_mut();

    let tag_frag = doc.create_fragment();
    let i = doc.create_element("i");
    let tag_text = doc.create_text("");
    doc.append_child(i, tag_text).unwrap();
    doc.append_child(tag_frag, i).unwrap();

    let user_frag = doc.create_fragment();
    let div = doc.create_element("div");
    let span = doc.create_element("span");
    let name = doc.create_text("");
    let tags_anchor = doc.create_comment("tags");
    doc.append_child(span, name).unwrap();
    doc.append_child(div, span).unwrap();
    doc.append_child(div, tags_anchor).unwrap();
    doc.append_child(user_frag, div).unwrap();

    let section = doc.create_element("section");
    let users_anchor = doc.create_comment("users");
    doc.append_child(section, users_anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, section).unwrap();

    rt.register_template(
        "tag",
        tag_frag,
        vec![NodeBindingSpec::new([0, 0], BindingKind::Text, "users.*.tags.*")],
    )
    .unwrap();
    rt.register_template(
        "user",
        user_frag,
        vec![
            NodeBindingSpec::new([0, 0, 0], BindingKind::Text, "users.*.name"),
            NodeBindingSpec::new(
                [0, 1],
                BindingKind::For { template: "tag".into() },
                "users.*.tags",
            ),
        ],
    )
    .unwrap();
    let users = rt
        .bind(users_anchor, BindingKind::For { template: "user".into() }, "users", None)
        .unwrap();
    (rt, section, users)
}

#[test]
fn nested_lists_render() {
    let (rt, section, _) = nested_fixture();
    assert_eq!(
        rt.document().markup(section).unwrap(),
        "<section><!--users-->\
         <div><span>ann</span><!--tags--><i>a</i><i>b</i></div>\
         <div><span>bob</span><!--tags--><i>c</i></div>\
         </section>"
    );
}

#[test]
fn inner_list_write_touches_one_row() {
    let (mut rt, section, users) = nested_fixture();
    let ann = rt.for_list_indexes(users)[0];
    let address = rt
        .absolute_address("default", "users.*.tags", Some(ann))
        .unwrap();

    rt.set_value(&address, json!(["b", "a", "z"])).unwrap();

    assert_eq!(
        rt.document().markup(section).unwrap(),
        "<section><!--users-->\
         <div><span>ann</span><!--tags--><i>b</i><i>a</i><i>z</i></div>\
         <div><span>bob</span><!--tags--><i>c</i></div>\
         </section>"
    );
    assert_eq!(rt.get("users").unwrap()[0]["tags"], json!(["b", "a", "z"]));
}

#[test]
fn outer_reorder_moves_whole_rows() {
    let (mut rt, section, users) = nested_fixture();
    let before = rt.document().children(section).unwrap();
    let blocks = rt.for_contents(users);

    rt.set(
        "users",
        json!([
            {"name": "bob", "tags": ["c"]},
            {"name": "ann", "tags": ["a", "b"]},
        ]),
    )
    .unwrap();

    let after = rt.document().children(section).unwrap();
    assert_eq!(after, vec![before[0], before[2], before[1]]);
    assert_eq!(rt.for_contents(users), vec![blocks[1], blocks[0]]);
    assert_eq!(
        rt.document().markup(section).unwrap(),
        "<section><!--users-->\
         <div><span>bob</span><!--tags--><i>c</i></div>\
         <div><span>ann</span><!--tags--><i>a</i><i>b</i></div>\
         </section>"
    );
}

#[test]
fn removing_an_outer_row_releases_inner_indexes() {
    let (mut rt, section, _) = nested_fixture();
    assert_eq!(rt.arena().live_count(), 5);

    rt.set("users", json!([{"name": "bob", "tags": ["c"]}])).unwrap();

    assert_eq!(rt.arena().live_count(), 2);
    assert_eq!(
        rt.document().markup(section).unwrap(),
        "<section><!--users--><div><span>bob</span><!--tags--><i>c</i></div></section>"
    );
}

/// Blocks whose top level holds another list's anchor move together with
/// that list's rows.
#[test]
fn top_level_nested_anchor_moves_with_its_block() {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    rt.register_state(StateScope::new(
        "default",
        json!({"groups": [
            {"title": "g1", "items": [1, 2]},
            {"title": "g2", "items": [3]},
        ]}),
    ));
    let doc = rt.document_mut();
    let item_frag = doc.create_fragment();
    let p = doc.create_element("p");
    let p_text = doc.create_text("");
    doc.append_child(p, p_text).unwrap();
    doc.append_child(item_frag, p).unwrap();

    let group_frag = doc.create_fragment();
    let h3 = doc.create_element("h3");
    let title = doc.create_text("");
    let items_anchor = doc.create_comment("items");
    doc.append_child(h3, title).unwrap();
    doc.append_child(group_frag, h3).unwrap();
    doc.append_child(group_frag, items_anchor).unwrap();

    let host = doc.create_element("div");
    let groups_anchor = doc.create_comment("groups");
    doc.append_child(host, groups_anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, host).unwrap();

    rt.register_template(
        "item",
        item_frag,
        vec![NodeBindingSpec::new([0, 0], BindingKind::Text, "groups.*.items.*")],
    )
    .unwrap();
    rt.register_template(
        "group",
        group_frag,
        vec![
            NodeBindingSpec::new([0, 0], BindingKind::Text, "groups.*.title"),
            NodeBindingSpec::new(
                [1],
                BindingKind::For { template: "item".into() },
                "groups.*.items",
            ),
        ],
    )
    .unwrap();
    rt.bind(groups_anchor, BindingKind::For { template: "group".into() }, "groups", None)
        .unwrap();
    assert_eq!(
        rt.document().markup(host).unwrap(),
        "<div><!--groups--><h3>g1</h3><!--items--><p>1</p><p>2</p><h3>g2</h3><!--items--><p>3</p></div>"
    );

    rt.set(
        "groups",
        json!([
            {"title": "g2", "items": [3]},
            {"title": "g1", "items": [1, 2]},
        ]),
    )
    .unwrap();
    assert_eq!(
        rt.document().markup(host).unwrap(),
        "<div><!--groups--><h3>g2</h3><!--items--><p>3</p><h3>g1</h3><!--items--><p>1</p><p>2</p></div>"
    );
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanNames(Arc<Mutex<Vec<&'static str>>>);

impl<S: Subscriber> Layer<S> for SpanNames {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        self.0.lock().unwrap().push(attrs.metadata().name());
    }
}

#[test]
fn reconciliation_opens_spans() {
    let names = SpanNames::default();
    let subscriber = tracing_subscriber::registry().with(names.clone());
    tracing::subscriber::with_default(subscriber, || {
        let mut fx = list_fixture(json!(["a"]), false);
        fx.rt.set("items", json!(["a", "b"])).unwrap();
    });
    let seen = names.0.lock().unwrap();
    assert!(seen.contains(&"set_value"));
    assert!(seen.contains(&"reconcile_for"));
}
