#![forbid(unsafe_code)]

//! End-to-end undo/redo scenarios over keyed containers and sequences.
//!
//! Each test drives real containers through an [`Engine`], calling
//! `flush_pending` wherever a caller would hand control back between edits,
//! and compares JSON snapshots of the tree.
//!
//! Run:
//!   cargo test -p revtree --test tree_scenarios

use revtree::{Engine, EngineError, IndexedSequence, KeyedContainer, Value};
use serde_json::{Value as Json, json};

// ============================================================================
// Helpers
// ============================================================================

fn map(json: Json) -> KeyedContainer {
    match Value::from_json(json) {
        Value::Map(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

fn seq(json: Json) -> IndexedSequence {
    match Value::from_json(json) {
        Value::Seq(seq) => seq,
        other => panic!("expected array, got {other:?}"),
    }
}

fn child(map: &KeyedContainer, key: &str) -> KeyedContainer {
    map.get(key)
        .and_then(|v| v.as_keyed().cloned())
        .unwrap_or_else(|| panic!("no keyed child at {key:?}"))
}

fn snapshot(map: &KeyedContainer) -> Json {
    map.to_json().expect("acyclic tree")
}

// ============================================================================
// Keyed containers
// ============================================================================

#[test]
fn add_update_delete_walk_back_and_forth() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("a", 2);
    engine.flush_pending();
    doc.set("b", "x");
    engine.flush_pending();
    doc.remove("a");
    engine.flush_pending();
    assert_eq!(snapshot(&doc), json!({"b": "x"}));

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 2, "b": "x"}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 2}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 1}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({}));
    assert_eq!(engine.undo(), Ok(false));

    for _ in 0..4 {
        assert!(engine.redo().unwrap());
    }
    assert_eq!(snapshot(&doc), json!({"b": "x"}));
    assert_eq!(engine.redo(), Ok(false));
}

#[test]
fn nested_subtree_written_later_is_tracked() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);

    doc.set("a", Value::from_json(json!({"b": {}})));
    engine.flush_pending();
    let b = child(&child(&doc, "a"), "b");
    b.set("c", Value::from_json(json!({"d": 4})));
    engine.flush_pending();
    child(&b, "c").set("d", 5);
    engine.flush_pending();
    assert_eq!(snapshot(&doc), json!({"a": {"b": {"c": {"d": 5}}}}));

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": {"b": {"c": {"d": 4}}}}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": {"b": {}}}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({}));

    engine.redo().unwrap();
    engine.redo().unwrap();
    engine.redo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": {"b": {"c": {"d": 5}}}}));
}

#[test]
fn deleted_container_comes_back_by_identity() {
    let doc = map(json!({"inner": {"x": 1}}));
    let inner = child(&doc, "inner");
    let mut engine = Engine::with_root(&doc);

    doc.remove("inner");
    engine.flush_pending();
    engine.undo().unwrap();

    let restored = child(&doc, "inner");
    assert_eq!(restored, inner, "same container handle, not a copy");

    restored.set("x", 2);
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"inner": {"x": 1}}));
}

#[test]
fn null_is_a_value_not_a_deletion() {
    let doc = map(json!({"a": 1}));
    let mut engine = Engine::with_root(&doc);

    doc.set("a", Value::Null);
    engine.flush_pending();
    assert_eq!(snapshot(&doc), json!({"a": null}));
    assert!(doc.contains_key("a"));

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 1}));
    engine.redo().unwrap();
    assert_eq!(doc.get("a"), Some(Value::Null));
}

#[test]
fn self_reference_is_tracked_and_undone() {
    let doc = map(json!({"n": 1}));
    let mut engine = Engine::with_root(&doc);

    doc.set("me", doc.clone());
    engine.flush_pending();
    assert!(doc.to_json().is_err());

    doc.set("n", 2);
    engine.undo().unwrap();
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"n": 1}));

    engine.redo().unwrap();
    assert_eq!(doc.get("me").and_then(|v| v.as_keyed().cloned()), Some(doc.clone()));
}

#[test]
fn several_roots_share_one_history() {
    let left = map(json!({}));
    let right = map(json!({}));
    let mut engine = Engine::new();
    engine.observe(&left);
    engine.observe(&right);

    left.set("a", 1);
    engine.flush_pending();
    right.set("b", 2);
    engine.flush_pending();
    left.set("c", 3);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&left), json!({"a": 1}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&right), json!({}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&left), json!({}));
}

#[test]
fn new_write_after_undo_discards_redo() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("b", 2);
    engine.undo().unwrap();
    assert!(engine.can_redo());

    doc.set("c", 3);
    engine.flush_pending();
    assert!(!engine.can_redo());
    assert_eq!(engine.redo(), Ok(false));
    assert_eq!(snapshot(&doc), json!({"a": 1, "c": 3}));
}

// ============================================================================
// Sequences
// ============================================================================

#[test]
fn sequence_operations_undo_in_order() {
    let list = seq(json!([1, 2, 3]));
    let mut engine = Engine::with_root(&list);
    let states = [
        json!([1, 2, 3]),
        json!([1, 2, 3, 4, 5, 6]),
        json!([0, 1, 2, 3, 1, 2, 3, 4, 5, 6]),
        json!([0, 1, 2, 3, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
        json!([1, 2, 3, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
        json!([1, 2, 3, 1, 2, 3, 4, 5, 6, 7, 8, 9]),
        json!([1, 2, -1, -2, -3, 3, 4, 5, 6, 7, 8, 9]),
    ];

    list.extend([4, 5, 6]);
    engine.flush_pending();
    list.unshift([0, 1, 2, 3]);
    engine.flush_pending();
    list.extend([7, 8, 9, 10]);
    engine.flush_pending();
    list.shift();
    engine.flush_pending();
    list.pop();
    engine.flush_pending();
    list.splice(2, 3, [Value::Int(-1), Value::Int(-2), Value::Int(-3)]).unwrap();
    engine.flush_pending();
    assert_eq!(list.to_json().unwrap(), states[6]);

    for expected in states.iter().rev().skip(1) {
        assert!(engine.undo().unwrap());
        assert_eq!(&list.to_json().unwrap(), expected);
    }
    assert_eq!(engine.undo(), Ok(false));

    for expected in states.iter().skip(1) {
        assert!(engine.redo().unwrap());
        assert_eq!(&list.to_json().unwrap(), expected);
    }
}

#[test]
fn index_writes_update_in_place() {
    let list = seq(json!([1, 2, 3]));
    let mut engine = Engine::with_root(&list);

    list.set(1, 20).unwrap();
    engine.flush_pending();
    list.set(2, 30).unwrap();
    engine.flush_pending();
    assert_eq!(list.to_json().unwrap(), json!([1, 20, 30]));

    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([1, 20, 3]));
    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([1, 2, 3]));
}

#[test]
fn sparse_write_fills_gap_and_undoes_as_one() {
    let list = seq(json!([1]));
    let mut engine = Engine::with_root(&list);

    list.set(3, 9).unwrap();
    engine.flush_pending();
    assert_eq!(list.len(), 4);
    assert_eq!(list.get(1), Some(Value::Absent));
    assert_eq!(list.to_json().unwrap(), json!([1, null, null, 9]));

    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([1]));
    engine.redo().unwrap();
    assert_eq!(list.get(3), Some(Value::Int(9)));
}

#[test]
fn containers_pushed_into_a_sequence_are_tracked() {
    let list = seq(json!([]));
    let mut engine = Engine::with_root(&list);
    let item = map(json!({"done": false}));

    list.push(item.clone());
    engine.flush_pending();
    item.set("done", true);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([{"done": false}]));
    engine.undo().unwrap();
    assert!(list.is_empty());
}

#[test]
fn sequence_shrunk_outside_history_fails_reversal() {
    let list = seq(json!([]));
    let mut engine = Engine::with_root(&list);

    list.extend([1, 2, 3]);
    engine.flush_pending();
    engine.unobserve(&list);
    list.clear();

    let err = engine.undo().unwrap_err();
    assert!(matches!(err, EngineError::Reversal(_)));
    assert!(err.is_corruption());
    assert!(engine.can_undo(), "cursor stays on the failed record");
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn flagged_edits_undo_together() {
    let doc = map(json!({"a": 0}));
    let mut engine = Engine::with_root(&doc);

    let end = engine.start_flag();
    doc.set("a", 1);
    doc.set("b", 2);
    doc.remove("a");
    engine.end_flag(end);
    doc.set("c", 3);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"b": 2}));
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 0}));
    assert!(!engine.can_undo());

    engine.redo().unwrap();
    assert_eq!(snapshot(&doc), json!({"b": 2}));
    engine.redo().unwrap();
    assert_eq!(snapshot(&doc), json!({"b": 2, "c": 3}));
}

#[test]
fn reverse_and_sort_inside_a_transaction() {
    let list = seq(json!([1, 0, 2]));
    let mut engine = Engine::with_root(&list);

    engine.transaction(|_| {
        for (i, item) in list.to_vec().into_iter().enumerate() {
            let n = item.as_i64().unwrap_or_default();
            list.set(i, n + 1).unwrap();
        }
    });
    assert_eq!(list.to_json().unwrap(), json!([2, 1, 3]));

    engine.transaction(|_| list.reverse());
    assert_eq!(list.to_json().unwrap(), json!([3, 1, 2]));

    engine.transaction(|_| list.sort_by(|a, b| a.as_i64().cmp(&b.as_i64())));
    assert_eq!(list.to_json().unwrap(), json!([1, 2, 3]));

    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([3, 1, 2]));
    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([2, 1, 3]));
    engine.undo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([1, 0, 2]));
    assert_eq!(engine.undo(), Ok(false));

    engine.redo().unwrap();
    engine.redo().unwrap();
    engine.redo().unwrap();
    assert_eq!(list.to_json().unwrap(), json!([1, 2, 3]));
}

#[test]
fn nested_transactions_undo_as_the_outer_unit() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);

    let outer = engine.start_flag();
    doc.set("a", 1);
    let inner = engine.start_flag();
    doc.set("b", 2);
    engine.end_flag(inner);
    doc.set("c", 3);
    engine.end_flag(outer);

    assert!(engine.undo().unwrap());
    assert_eq!(snapshot(&doc), json!({}));
    assert!(!engine.can_undo());
    assert!(engine.redo().unwrap());
    assert_eq!(snapshot(&doc), json!({"a": 1, "b": 2, "c": 3}));
}

#[test]
fn empty_transaction_is_a_noop_unit() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);
    doc.set("a", 1);
    engine.transaction(|_| {});

    assert!(engine.undo().unwrap(), "the empty unit is a step");
    assert_eq!(snapshot(&doc), json!({"a": 1}));
    assert!(engine.undo().unwrap());
    assert_eq!(snapshot(&doc), json!({}));
}

#[test]
fn scope_guard_closes_on_drop() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);
    {
        let scope = engine.transaction_scope();
        assert!(scope.end_id().is_some());
        doc.set("a", 1);
        doc.set("b", 2);
    }

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({}));
}

#[test]
fn undo_into_open_transaction_reports_corruption() {
    let doc = map(json!({}));
    let mut engine = Engine::with_root(&doc);

    let _end = engine.start_flag();
    doc.set("a", 1);
    assert!(engine.undo().unwrap());

    let err = engine.undo().unwrap_err();
    assert!(matches!(err, EngineError::UnpairedBoundary { index: 0, .. }));
    assert_eq!(snapshot(&doc), json!({}));
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn allow_list_restricts_tracked_keys() {
    let doc = map(json!({"a": 0, "b": 0}));
    let mut engine = Engine::new();
    engine.filters_mut().set_allow_list(doc.id(), ["a"]);
    engine.observe(&doc);

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("b", 1);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"a": 0, "b": 1}));
    assert_eq!(engine.undo(), Ok(false));
}

#[test]
fn deny_list_skips_keys_and_subtrees() {
    let doc = map(json!({"d": {"e": 0}}));
    let mut engine = Engine::new();
    engine.filters_mut().set_deny_list(doc.id(), ["a", "b"]);
    engine.observe(&doc);

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("b", 3);
    engine.flush_pending();
    doc.set("c", 7);
    engine.flush_pending();
    child(&doc, "d").set("e", 12);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&child(&doc, "d")), json!({"e": 0}));
    engine.undo().unwrap();
    assert!(!doc.contains_key("c"));
    assert_eq!(engine.undo(), Ok(false));
    assert_eq!(snapshot(&doc), json!({"a": 1, "b": 3, "d": {"e": 0}}));
}

#[test]
fn denied_key_hides_its_subtree() {
    let doc = map(json!({"cache": {"hits": 0}}));
    let mut engine = Engine::new();
    engine.filters_mut().set_deny_list(doc.id(), ["cache"]);
    engine.observe(&doc);

    child(&doc, "cache").set("hits", 1);
    engine.flush_pending();
    assert!(engine.history().is_empty());
}

#[test]
fn global_allow_list_applies_everywhere() {
    let doc = map(json!({"d": {}}));
    let mut engine = Engine::new();
    engine.filters_mut().add_global_allow(["a", "b", "d"]);
    engine.observe(&doc);
    let d = child(&doc, "d");

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("b", 3);
    engine.flush_pending();
    d.set("c", 5);
    engine.flush_pending();
    d.set("a", 12);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&d), json!({"c": 5}));
    engine.undo().unwrap();
    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"d": {"c": 5}}));
    assert_eq!(engine.undo(), Ok(false));
}

#[test]
fn global_deny_list_applies_everywhere() {
    let doc = map(json!({"b": 4, "d": {}}));
    let mut engine = Engine::new();
    engine.filters_mut().add_global_deny(["a"]);
    engine.observe(&doc);
    let d = child(&doc, "d");

    doc.set("a", 1);
    engine.flush_pending();
    doc.set("b", 3);
    engine.flush_pending();
    d.set("c", 5);
    engine.flush_pending();
    d.set("a", 12);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&d), json!({"a": 12}));
    engine.undo().unwrap();
    assert_eq!(doc.get("b"), Some(Value::Int(4)));
    assert_eq!(engine.undo(), Ok(false));
}

#[test]
fn local_and_global_lists_combine_with_and() {
    let doc = map(json!({}));
    let mut engine = Engine::new();
    engine.filters_mut().set_allow_list(doc.id(), ["a", "b"]);
    engine.filters_mut().add_global_deny(["b"]);
    engine.observe(&doc);

    doc.set("a", 1);
    doc.set("b", 1);
    doc.set("c", 1);
    engine.flush_pending();

    engine.undo().unwrap();
    assert_eq!(snapshot(&doc), json!({"b": 1, "c": 1}));
    assert!(!engine.can_undo());
}
