#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use revtree::{Engine, IndexedSequence, KeyedContainer, Value};
use serde_json::{Value as Json, json};

const KEYS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Arbitrary)]
enum Edit {
    MapSet(u8, i8),
    MapRemove(u8),
    SeqPush(i8),
    SeqPop,
    SeqSet(u8, i8),
    SeqSplice(u8, u8, Vec<i8>),
    SeqReverse,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Edit(Edit),
    Transaction(Vec<Edit>),
    Undo,
    Redo,
}

fn apply(doc: &KeyedContainer, list: &IndexedSequence, edit: &Edit) {
    match edit {
        Edit::MapSet(k, v) => doc.set(KEYS[*k as usize % KEYS.len()], i64::from(*v)),
        Edit::MapRemove(k) => {
            doc.remove(KEYS[*k as usize % KEYS.len()]);
        }
        Edit::SeqPush(v) => list.push(i64::from(*v)),
        Edit::SeqPop => {
            list.pop();
        }
        Edit::SeqSet(i, v) => {
            let _ = list.set(usize::from(*i % 16), i64::from(*v));
        }
        Edit::SeqSplice(i, n, items) => {
            let index = usize::from(*i) % (list.len() + 1);
            let items = items.iter().take(8).map(|v| Value::from(i64::from(*v)));
            let _ = list.splice(index, usize::from(*n % 8), items);
        }
        Edit::SeqReverse => list.reverse(),
    }
}

fn snapshot(doc: &KeyedContainer, list: &IndexedSequence) -> Json {
    json!([doc.to_json().unwrap(), list.to_json().unwrap()])
}

fuzz_target!(|ops: Vec<Op>| {
    let doc = KeyedContainer::new();
    let list = IndexedSequence::new();
    let mut engine = Engine::new();
    engine.observe(&doc);
    engine.observe(&list);

    // Model: every state reachable by undo/redo, and the current position.
    let mut states = vec![snapshot(&doc, &list)];
    let mut pos = 0usize;

    for op in ops.iter().take(256) {
        match op {
            Op::Edit(edit) => {
                apply(&doc, &list, edit);
                if engine.flush_pending() > 0 {
                    states.truncate(pos + 1);
                    states.push(snapshot(&doc, &list));
                    pos += 1;
                }
            }
            Op::Transaction(edits) => {
                engine.transaction(|_| {
                    for edit in edits.iter().take(32) {
                        apply(&doc, &list, edit);
                    }
                });
                states.truncate(pos + 1);
                states.push(snapshot(&doc, &list));
                pos += 1;
            }
            Op::Undo => {
                let moved = engine.undo().expect("well-formed history");
                assert_eq!(moved, pos > 0, "undo availability");
                if moved {
                    pos -= 1;
                }
            }
            Op::Redo => {
                let moved = engine.redo().expect("well-formed history");
                assert_eq!(moved, pos + 1 < states.len(), "redo availability");
                if moved {
                    pos += 1;
                }
            }
        }
        assert_eq!(snapshot(&doc, &list), states[pos], "state after {op:?}");
    }
});
