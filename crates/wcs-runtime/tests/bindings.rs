#![forbid(unsafe_code)]

//! Leaf bindings, conditionals, getters and error reporting.

use serde_json::{Value, json};
use wcs_core::CoreError;
use wcs_dom::NodeId;
use wcs_runtime::{
    BindingKind, NodeBindingSpec, Runtime, RuntimeConfig, RuntimeError, StateScope,
};

fn runtime_with(scope: StateScope) -> Runtime {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    rt.register_state(scope);
    rt
}

fn attach(rt: &mut Runtime, parent: NodeId, node: NodeId) {
    rt.document_mut().append_child(parent, node).unwrap();
}

/// Register a one-element template `<tag>{path}</tag>`.
fn element_template(rt: &mut Runtime, id: &str, tag: &str, path: &str) {
    let doc = rt.document_mut();
    let frag = doc.create_fragment();
    let el = doc.create_element(tag);
    let text = doc.create_text("");
    doc.append_child(el, text).unwrap();
    doc.append_child(frag, el).unwrap();
    rt.register_template(id, frag, vec![NodeBindingSpec::new([0, 0], BindingKind::Text, path)])
        .unwrap();
}

// ---------------------------------------------------------------------------
// if / else
// ---------------------------------------------------------------------------

#[test]
fn if_and_else_alternate() {
    let mut rt = runtime_with(StateScope::new("default", json!({"show": true, "msg": "hi"})));
    element_template(&mut rt, "yes", "b", "msg");
    element_template(&mut rt, "no", "i", "msg");

    let host = rt.document_mut().create_element("div");
    let root = rt.document().root();
    attach(&mut rt, root, host);
    let if_anchor = rt.document_mut().create_comment("if");
    let else_anchor = rt.document_mut().create_comment("else");
    attach(&mut rt, host, if_anchor);
    attach(&mut rt, host, else_anchor);

    let when = rt
        .bind(
            if_anchor,
            BindingKind::If { template: "yes".into(), negate: false },
            "show",
            None,
        )
        .unwrap();
    let otherwise = rt
        .bind(
            else_anchor,
            BindingKind::If { template: "no".into(), negate: true },
            "show",
            None,
        )
        .unwrap();
    assert_eq!(
        rt.document().markup(host).unwrap(),
        "<div><!--if--><b>hi</b><!--else--></div>"
    );
    let first = rt.if_content(when).unwrap();
    assert!(rt.if_content(otherwise).is_none());

    rt.set("show", json!(false)).unwrap();
    assert_eq!(
        rt.document().markup(host).unwrap(),
        "<div><!--if--><!--else--><i>hi</i></div>"
    );
    assert!(!rt.content(first).unwrap().is_mounted());

    rt.set("show", json!(1)).unwrap();
    assert_eq!(
        rt.document().markup(host).unwrap(),
        "<div><!--if--><b>hi</b><!--else--></div>"
    );
    assert_eq!(rt.if_content(when), Some(first), "pooled block reused");
}

#[test]
fn hidden_blocks_ignore_writes() {
    let mut rt = runtime_with(StateScope::new("default", json!({"show": true, "msg": "a"})));
    element_template(&mut rt, "yes", "b", "msg");
    let anchor = rt.document_mut().create_comment("if");
    let root = rt.document().root();
    attach(&mut rt, root, anchor);
    let id = rt
        .bind(anchor, BindingKind::If { template: "yes".into(), negate: false }, "show", None)
        .unwrap();
    let block = rt.if_content(id).unwrap();
    let msg = rt.content(block).unwrap().bindings()[0];

    rt.set("show", json!(false)).unwrap();
    rt.reset_stats();
    rt.set("msg", json!("b")).unwrap();
    assert_eq!(rt.stats().count(msg), 0);

    rt.set("show", json!(true)).unwrap();
    assert_eq!(rt.document().markup(root).unwrap(), "<!--if--><b>b</b>");
}

#[test]
fn conditionals_inside_rows_follow_their_element() {
    let mut rt = runtime_with(StateScope::new(
        "default",
        json!({"items": [
            {"name": "a", "done": true},
            {"name": "b", "done": false},
        ]}),
    ));
    element_template(&mut rt, "mark", "s", "items.*.name");

    let doc = rt.document_mut();
    let row = doc.create_fragment();
    let li = doc.create_element("li");
    let span = doc.create_element("span");
    let name = doc.create_text("");
    let if_anchor = doc.create_comment("if");
    doc.append_child(span, name).unwrap();
    doc.append_child(li, span).unwrap();
    doc.append_child(li, if_anchor).unwrap();
    doc.append_child(row, li).unwrap();
    let ul = doc.create_element("ul");
    let anchor = doc.create_comment("for");
    doc.append_child(ul, anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, ul).unwrap();
    rt.register_template(
        "row",
        row,
        vec![
            NodeBindingSpec::new([0, 0, 0], BindingKind::Text, "items.*.name"),
            NodeBindingSpec::new(
                [0, 1],
                BindingKind::If { template: "mark".into(), negate: false },
                "items.*.done",
            ),
        ],
    )
    .unwrap();
    let list = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "items", None)
        .unwrap();
    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li><span>a</span><!--if--><s>a</s></li><li><span>b</span><!--if--></li></ul>"
    );

    let rows = rt.for_contents(list);
    let first_if = rt.content(rows[0]).unwrap().bindings()[1];
    let second = rt.for_list_indexes(list)[1];
    rt.reset_stats();
    let address = rt
        .absolute_address("default", "items.*.done", Some(second))
        .unwrap();
    rt.set_value(&address, json!(true)).unwrap();

    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li><span>a</span><!--if--><s>a</s></li><li><span>b</span><!--if--><s>b</s></li></ul>"
    );
    assert_eq!(rt.stats().count(first_if), 0);
}

// ---------------------------------------------------------------------------
// Getters
// ---------------------------------------------------------------------------

#[test]
fn getters_recompute_when_their_reads_change() {
    let scope = StateScope::new("default", json!({"first": "ada", "last": "lovelace"}))
        .with_getter("full", |cx| {
            let first = cx.get("first");
            let last = cx.get("last");
            json!(format!(
                "{} {}",
                first.as_str().unwrap_or_default(),
                last.as_str().unwrap_or_default()
            ))
        });
    let mut rt = runtime_with(scope);
    let text = rt.document_mut().create_text("");
    rt.bind(text, BindingKind::Text, "full", None).unwrap();
    assert_eq!(rt.document().text(text).unwrap(), "ada lovelace");

    rt.set("last", json!("byron")).unwrap();
    assert_eq!(rt.document().text(text).unwrap(), "ada byron");
}

#[test]
fn wildcard_getters_use_the_row_index() {
    let scope = StateScope::new("default", json!({"items": [{"n": 1}, {"n": 2}]}))
        .with_getter("items.*.label", |cx| {
            let n = cx.get("items.*.n").as_i64().unwrap_or_default();
            let pos = cx.index(1).unwrap_or_default();
            json!(format!("#{pos}:{}", n * 10))
        });
    let mut rt = runtime_with(scope);
    element_template(&mut rt, "row", "li", "items.*.label");
    let ul = rt.document_mut().create_element("ul");
    let anchor = rt.document_mut().create_comment("for");
    attach(&mut rt, ul, anchor);
    let root = rt.document().root();
    attach(&mut rt, root, ul);
    let list = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "items", None)
        .unwrap();
    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li>#0:10</li><li>#1:20</li></ul>"
    );

    let second = rt.for_list_indexes(list)[1];
    let address = rt
        .absolute_address("default", "items.*.n", Some(second))
        .unwrap();
    rt.set_value(&address, json!(5)).unwrap();
    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li>#0:10</li><li>#1:50</li></ul>"
    );
}

/// Rows render `<li>{items.*}{count}</li>` with `count = len(items)`.
#[test]
fn kept_rows_reapply_bindings_outside_their_element() {
    let scope = StateScope::new("default", json!({"items": ["a", "b"]})).with_getter(
        "count",
        |cx| json!(cx.get("items").as_array().map_or(0, Vec::len)),
    );
    let mut rt = runtime_with(scope);
    let doc = rt.document_mut();
    let frag = doc.create_fragment();
    let li = doc.create_element("li");
    let label = doc.create_text("");
    let count = doc.create_text("");
    doc.append_child(li, label).unwrap();
    doc.append_child(li, count).unwrap();
    doc.append_child(frag, li).unwrap();
    rt.register_template(
        "row",
        frag,
        vec![
            NodeBindingSpec::new([0, 0], BindingKind::Text, "items.*"),
            NodeBindingSpec::new([0, 1], BindingKind::Text, "count"),
        ],
    )
    .unwrap();
    let ul = rt.document_mut().create_element("ul");
    let anchor = rt.document_mut().create_comment("for");
    attach(&mut rt, ul, anchor);
    let root = rt.document().root();
    attach(&mut rt, root, ul);
    let list = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "items", None)
        .unwrap();
    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li>a2</li><li>b2</li></ul>"
    );
    let kept = rt.for_contents(list);
    rt.reset_stats();

    rt.set("items", json!(["a", "b", "c"])).unwrap();

    assert_eq!(
        rt.document().markup(ul).unwrap(),
        "<ul><!--for--><li>a3</li><li>b3</li><li>c3</li></ul>"
    );
    for block in kept {
        let bindings = rt.content(block).unwrap().bindings().to_vec();
        assert_eq!(rt.stats().count(bindings[0]), 0, "element unchanged");
        assert_eq!(rt.stats().count(bindings[1]), 1, "getter re-read once");
    }
    let fresh = *rt.for_contents(list).last().unwrap();
    for id in rt.content(fresh).unwrap().bindings().to_vec() {
        assert_eq!(rt.stats().count(id), 1);
    }
}

#[test]
fn positional_reads_are_one_based_outermost_first() {
    let mut rt = runtime_with(StateScope::new("default", json!({"rows": [[0, 0], [0, 0, 0]]})));
    element_template(&mut rt, "cell", "td", "$2");

    let doc = rt.document_mut();
    let row = doc.create_fragment();
    let tr = doc.create_element("tr");
    let cells = doc.create_comment("cells");
    doc.append_child(tr, cells).unwrap();
    doc.append_child(row, tr).unwrap();
    let table = doc.create_element("table");
    let anchor = doc.create_comment("rows");
    doc.append_child(table, anchor).unwrap();
    let root = doc.root();
    doc.append_child(root, table).unwrap();
    rt.register_template(
        "row",
        row,
        vec![NodeBindingSpec::new([0, 0], BindingKind::For { template: "cell".into() }, "rows.*")],
    )
    .unwrap();
    rt.bind(anchor, BindingKind::For { template: "row".into() }, "rows", None)
        .unwrap();
    assert_eq!(
        rt.document().markup(table).unwrap(),
        "<table><!--rows--><tr><!--cells--><td>0</td><td>1</td></tr>\
         <tr><!--cells--><td>0</td><td>1</td><td>2</td></tr></table>"
    );
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

#[test]
fn bindings_read_their_own_scope() {
    let mut rt = runtime_with(StateScope::new("default", json!({"title": "main"})));
    rt.register_state(StateScope::new("side", json!({"title": "aside"})));
    let a = rt.document_mut().create_text("");
    let b = rt.document_mut().create_text("");
    rt.bind(a, BindingKind::Text, "title", None).unwrap();
    let side = rt.bind(b, BindingKind::Text, "title", Some("side")).unwrap();
    rt.reset_stats();

    let address = rt.absolute_address("side", "title", None).unwrap();
    rt.set_value(&address, json!("changed")).unwrap();
    assert_eq!(rt.document().text(a).unwrap(), "main");
    assert_eq!(rt.document().text(b).unwrap(), "changed");
    assert_eq!(rt.stats().total(), 1);
    assert_eq!(rt.stats().count(side), 1);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn missing_template_is_fatal() {
    let mut rt = runtime_with(StateScope::new("default", json!({"items": [1]})));
    let anchor = rt.document_mut().create_comment("for");
    let root = rt.document().root();
    attach(&mut rt, root, anchor);
    let err = rt
        .bind(anchor, BindingKind::For { template: "nope".into() }, "items", None)
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::MissingTemplate {
            template: "nope".into()
        }
    );
}

#[test]
fn wildcard_binding_outside_a_list_is_unresolvable() {
    let mut rt = runtime_with(StateScope::new("default", json!({"items": [1]})));
    let text = rt.document_mut().create_text("");
    let err = rt.bind(text, BindingKind::Text, "items.*", None).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::UnresolvableAddress { .. })
    ));
    let err = rt.bind(text, BindingKind::Text, "$1", None).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::UnresolvableAddress { .. })
    ));
}

#[test]
fn getters_are_not_writable() {
    let scope = StateScope::new("default", json!({})).with_getter("now", |_| json!(1));
    let mut rt = runtime_with(scope);
    assert!(matches!(
        rt.set("now", json!(2)),
        Err(RuntimeError::NotWritable { .. })
    ));
}

#[test]
fn writes_through_scalars_fail() {
    let mut rt = runtime_with(StateScope::new("default", json!({"title": "x"})));
    assert!(matches!(
        rt.set("title.inner", json!(1)),
        Err(RuntimeError::InvalidPath { .. })
    ));
    rt.set("fresh.nested", json!(true)).unwrap();
    assert_eq!(rt.get("fresh").unwrap(), json!({"nested": true}));
    assert_eq!(rt.get("missing.path").unwrap(), Value::Null);
}

#[test]
fn unknown_scope_is_reported() {
    let mut rt = runtime_with(StateScope::new("default", json!({})));
    let address = rt.absolute_address("ghost", "x", None).unwrap();
    assert_eq!(
        rt.get_value(&address).unwrap_err(),
        RuntimeError::MissingStateScope {
            name: "ghost".into()
        }
    );
}

#[test]
fn loop_depth_limit_applies_to_nested_lists() {
    let mut rt = Runtime::new(RuntimeConfig::default().with_max_loop_depth(1)).unwrap();
    rt.register_state(StateScope::new("default", json!({"rows": [[1]]})));
    element_template(&mut rt, "cell", "td", "rows.*.*");
    let doc = rt.document_mut();
    let row = doc.create_fragment();
    let tr = doc.create_element("tr");
    let cells = doc.create_comment("cells");
    doc.append_child(tr, cells).unwrap();
    doc.append_child(row, tr).unwrap();
    let anchor = doc.create_comment("rows");
    let root = doc.root();
    doc.append_child(root, anchor).unwrap();
    rt.register_template(
        "row",
        row,
        vec![NodeBindingSpec::new([0, 0], BindingKind::For { template: "cell".into() }, "rows.*")],
    )
    .unwrap();
    let err = rt
        .bind(anchor, BindingKind::For { template: "row".into() }, "rows", None)
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::LoopDepthExceeded { max_depth: 1 })
    ));
}
