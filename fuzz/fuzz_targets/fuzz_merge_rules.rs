#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use revtree::{Engine, KeyedContainer};

const KEYS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

#[derive(Debug, Arbitrary)]
enum Rule {
    LocalAllow(Vec<u8>),
    LocalDeny(Vec<u8>),
    LocalGroup(Vec<u8>),
    GlobalAllow(Vec<u8>),
    GlobalDeny(Vec<u8>),
    GlobalGroup(Vec<u8>),
}

#[derive(Debug, Arbitrary)]
struct Input {
    rules: Vec<Rule>,
    writes: Vec<(u8, u8, i8)>,
}

fn keys(raw: &[u8]) -> Vec<&'static str> {
    raw.iter().take(4).map(|k| KEYS[*k as usize % KEYS.len()]).collect()
}

fuzz_target!(|input: Input| {
    let maps = [KeyedContainer::new(), KeyedContainer::new()];
    let mut engine = Engine::new();
    for rule in input.rules.iter().take(8) {
        let merges = engine.merges_mut();
        match rule {
            Rule::LocalAllow(k) => merges.set_allow_list(maps[0].id(), keys(k)),
            Rule::LocalDeny(k) => merges.set_deny_list(maps[0].id(), keys(k)),
            Rule::LocalGroup(k) => merges.set_groups(maps[1].id(), [keys(k)]),
            Rule::GlobalAllow(k) => merges.add_global_allow(keys(k)),
            Rule::GlobalDeny(k) => merges.add_global_deny(keys(k)),
            Rule::GlobalGroup(k) => {
                merges.add_global_group(keys(k));
            }
        }
    }
    for map in &maps {
        engine.observe(map);
    }

    let mut mutations = 0;
    for (m, k, v) in input.writes.iter().take(128) {
        let map = &maps[usize::from(*m % 2)];
        map.set(KEYS[*k as usize % KEYS.len()], i64::from(*v));
        mutations += engine.flush_pending();
    }
    assert!(engine.history().len() <= mutations);

    while engine.undo().expect("well-formed history") {}
    for map in &maps {
        assert!(map.is_empty(), "undo all restores the empty start");
    }
});
