#![cfg(test)]

// Property tests for the dictionary engine kept inside the crate so they can
// check layout invariants that are not part of the public surface.

use crate::dict::Dict;
use proptest::prelude::*;
use std::collections::HashMap;

// Keys are drawn from a small pool so inserts, overwrites and removals of
// the same key interleave often; the pool also produces many collisions in
// a small index.
#[derive(Clone, Debug)]
enum Op {
    Insert(i64, i64),
    Remove(i64),
    Get(i64),
    Alias,
    DropAlias,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let key = -20i64..20;
    let op = prop_oneof![
        4 => (key.clone(), any::<i64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => key.clone().prop_map(Op::Remove),
        2 => key.prop_map(Op::Get),
        1 => Just(Op::Alias),
        1 => Just(Op::DropAlias),
    ];
    proptest::collection::vec(op, 1..200)
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - lookup parity with the model after every op, through every alias.
// - `len` equals the model size; `slot_count >= len`.
// - every populated slot is a live entry and vice versa (no leaked slots).
// - index load factor stays within bounds.
// - removing frees the lowest slot first, so capacity never exceeds the
//   smallest power-of-two growth step above the peak size.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        let dict = Dict::of::<i64, i64>();
        let mut aliases: Vec<Dict> = Vec::new();
        let mut model: HashMap<i64, i64> = HashMap::new();
        let mut peak = 0usize;

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    dict.insert(&k, &v).unwrap();
                    model.insert(k, v);
                }
                Op::Remove(k) => {
                    let removed = dict.remove(&k).unwrap();
                    prop_assert_eq!(removed, model.remove(&k).is_some());
                }
                Op::Get(k) => {
                    let got: Option<i64> = dict.get(&k).unwrap();
                    prop_assert_eq!(got, model.get(&k).copied());
                }
                Op::Alias => aliases.push(dict.clone()),
                Op::DropAlias => {
                    aliases.pop();
                }
            }

            peak = peak.max(model.len());
            prop_assert_eq!(dict.len(), model.len());
            prop_assert!(dict.slot_count() >= dict.len());
            prop_assert!(dict.slot_count() <= (peak.max(1) * 2).max(crate::MIN_ARENA_SLOTS));
            prop_assert_eq!(dict.refcount(), aliases.len() + 1);
            dict.raw_layout().assert_consistent();

            for alias in &aliases {
                prop_assert!(alias.ptr_eq(&dict));
                prop_assert_eq!(alias.len(), model.len());
            }
        }

        for (k, v) in &model {
            let got: Option<i64> = dict.get(k).unwrap();
            prop_assert_eq!(got, Some(*v));
        }
        let mut entries: Vec<(i64, i64)> = dict.entries().unwrap();
        entries.sort();
        let mut expected: Vec<(i64, i64)> = model.into_iter().collect();
        expected.sort();
        prop_assert_eq!(entries, expected);
    }
}

// Property: equality ignores insertion order and storage layout.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_equality_is_order_independent(
        pairs in proptest::collection::hash_map(-50i64..50, any::<i64>(), 0..40),
        seed in any::<u64>(),
    ) {
        let a = Dict::of::<i64, i64>();
        let b = Dict::of::<i64, i64>();

        let mut forward: Vec<(i64, i64)> = pairs.into_iter().collect();
        forward.sort();
        for (k, v) in &forward {
            a.insert(k, v).unwrap();
        }

        // Insert into `b` in a shuffled order, with churn that leaves holes.
        let mut shuffled = forward.clone();
        let n = shuffled.len();
        let mut s = seed;
        for i in (1..n).rev() {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
            shuffled.swap(i, (s >> 33) as usize % (i + 1));
        }
        for (k, _) in &shuffled {
            b.insert(k, &0i64).unwrap();
            b.remove(k).unwrap();
        }
        for (k, v) in &shuffled {
            b.insert(k, v).unwrap();
        }

        prop_assert!(a == b);
        if let Some((k, v)) = forward.first() {
            b.insert(k, &v.wrapping_add(1)).unwrap();
            prop_assert!(a != b);
        }
    }
}
