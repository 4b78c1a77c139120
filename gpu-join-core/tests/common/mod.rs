//! Shared helpers for the join integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::Hash;

use gpu_join_core::{EngineConfig, JoinEngine, JoinKind, JoinResult};

pub fn engine() -> JoinEngine {
    JoinEngine::new(EngineConfig {
        threads_per_block: 32,
        ..EngineConfig::default()
    })
    .unwrap()
}

pub fn engine_with(config: EngineConfig) -> JoinEngine {
    JoinEngine::new(config).unwrap()
}

/// Result pairs sorted by `(left, right)`.
pub fn sorted_pairs(result: &JoinResult) -> Vec<(i32, i32)> {
    let mut pairs = result.pairs().unwrap();
    pairs.sort_unstable();
    pairs
}

/// Textbook multimap build/probe over host rows.
pub fn reference_join<K: Eq + Hash + Clone>(
    kind: JoinKind,
    left: &[K],
    right: &[K],
) -> Vec<(i32, i32)> {
    let mut right_index: HashMap<K, Vec<i32>> = HashMap::new();
    for (i, key) in right.iter().enumerate() {
        right_index.entry(key.clone()).or_default().push(i as i32);
    }

    let mut pairs = Vec::new();
    for (i, key) in left.iter().enumerate() {
        match right_index.get(key) {
            Some(rows) => pairs.extend(rows.iter().map(|&r| (i as i32, r))),
            None if kind != JoinKind::Inner => pairs.push((i as i32, -1)),
            None => {}
        }
    }

    if kind == JoinKind::Outer {
        let mut left_keys: HashMap<K, ()> = HashMap::new();
        for key in left {
            left_keys.insert(key.clone(), ());
        }
        for (i, key) in right.iter().enumerate() {
            if !left_keys.contains_key(key) {
                pairs.push((-1, i as i32));
            }
        }
    }

    pairs.sort_unstable();
    pairs
}
