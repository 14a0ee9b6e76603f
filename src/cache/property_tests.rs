//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key encoding, dependency cascades and group removal.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::cache::{Cache, ExpirationPolicy, FullKey, GetOptions, GroupIndex};
use crate::CacheConfig;

// == Strategies ==
/// Arbitrary non-empty key parts, including separators and path characters
fn key_part_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./~ -]{1,24}".prop_map(|s| s)
}

/// Small group names so that generated graphs share nodes
fn group_name_strategy() -> impl Strategy<Value = String> {
    "g[0-5]".prop_map(|s| s)
}

/// Dependency graphs over the small group alphabet, cycles included
fn dependency_graph_strategy() -> impl Strategy<Value = HashMap<String, Vec<String>>> {
    prop::collection::hash_map(
        group_name_strategy(),
        prop::collection::vec(group_name_strategy(), 0..4),
        0..6,
    )
}

fn index_with(graph: &HashMap<String, Vec<String>>) -> GroupIndex {
    let mut index = GroupIndex::new();
    for (group, deps) in graph {
        index.set_dependencies(group, deps.clone());
    }
    index
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Property 1: File Stems Are Injective**
    // Two full keys share a file stem only if they are the same key.
    #[test]
    fn prop_file_stem_injective(
        g1 in key_part_strategy(),
        k1 in key_part_strategy(),
        g2 in key_part_strategy(),
        k2 in key_part_strategy()
    ) {
        let a = FullKey::new(&g1, &k1).unwrap();
        let b = FullKey::new(&g2, &k2).unwrap();
        prop_assert_eq!(a.file_stem() == b.file_stem(), a == b);
    }

    // **Property 2: File Stems Are Filesystem Safe**
    #[test]
    fn prop_file_stem_safe(group in key_part_strategy(), key in key_part_strategy()) {
        let stem = FullKey::new(&group, &key).unwrap().file_stem();
        prop_assert!(stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '~'));
        prop_assert_eq!(stem.matches('~').count(), 1);
    }

    // **Property 3: Cascade Terminates And Is Closed**
    // For any dependency graph, cycles included, the cascade lists every root,
    // lists no group twice, and contains every dependency of a listed group.
    #[test]
    fn prop_cascade_closed(
        graph in dependency_graph_strategy(),
        roots in prop::collection::vec(group_name_strategy(), 1..3)
    ) {
        let index = index_with(&graph);
        let cascade = index.cascade(&roots);
        let listed: HashSet<&String> = cascade.iter().collect();

        prop_assert_eq!(listed.len(), cascade.len(), "Duplicate group in cascade");
        for root in &roots {
            prop_assert!(listed.contains(root));
        }
        for group in &cascade {
            for dep in index.dependencies(group) {
                prop_assert!(listed.contains(&dep), "Cascade not closed over {}", dep);
            }
        }
    }

    // **Property 4: Group Membership Round-trip**
    // Removing a group returns exactly the distinct keys added to it.
    #[test]
    fn prop_remove_group_returns_members(
        members in prop::collection::vec((group_name_strategy(), key_part_strategy()), 1..30)
    ) {
        let mut index = GroupIndex::new();
        let mut expected: HashMap<String, HashSet<FullKey>> = HashMap::new();
        for (group, key) in &members {
            let full = FullKey::new(group, key).unwrap();
            index.add_member(&full);
            expected.entry(group.clone()).or_default().insert(full);
        }

        for (group, keys) in expected {
            let removed: HashSet<FullKey> = index.remove_group(&group).into_iter().collect();
            prop_assert_eq!(removed, keys);
        }
        prop_assert!(index.group_names().is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // **Property 5: Group Removal Empties Exactly The Cascade**
    // After remove_group, groups in the cascade are empty and every other
    // group keeps all of its entries.
    #[test]
    fn prop_cache_remove_group_matches_cascade(
        graph in dependency_graph_strategy(),
        entries in prop::collection::vec((group_name_strategy(), "[a-z]{1,6}"), 1..20),
        root in group_name_strategy()
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let cache: Cache<String> = Cache::new(CacheConfig::default());
            for (group, deps) in &graph {
                cache.set_dependencies(group, deps).unwrap();
            }
            for (group, key) in &entries {
                let value = format!("{}:{}", group, key);
                cache
                    .get_with(key, group, GetOptions::new(ExpirationPolicy::never()), move || {
                        let value = value.clone();
                        async move { anyhow::Ok(value) }
                    })
                    .await
                    .unwrap();
            }

            let cascade: HashSet<String> = index_with(&graph).cascade(&[root.as_str()]).into_iter().collect();
            cache.remove_group(&[root.as_str()]).unwrap();

            let mut expected_left: HashMap<&str, HashSet<&str>> = HashMap::new();
            for (group, key) in &entries {
                if !cascade.contains(group) {
                    expected_left.entry(group.as_str()).or_default().insert(key.as_str());
                }
            }

            for group in ["g0", "g1", "g2", "g3", "g4", "g5"] {
                let remaining = cache.get_all_by_group(group).unwrap();
                let expected = expected_left.get(group).map_or(0, |keys| keys.len());
                assert_eq!(remaining.len(), expected, "Group {} has wrong entry count", group);
            }
        });
    }
}
