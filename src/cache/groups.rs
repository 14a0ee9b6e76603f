//! Group Index
//!
//! Group membership and group-to-group dependency edges.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cache::FullKey;

// == Group Index ==
/// Pure bookkeeping behind group invalidation.
///
/// Not synchronized on its own; the engine mutates it under its structural
/// lock. Dependency edges are directed and may form cycles.
#[derive(Debug, Default)]
pub struct GroupIndex {
    /// Group name -> member keys
    members: HashMap<String, HashSet<FullKey>>,
    /// Group name -> groups removed along with it
    dependencies: HashMap<String, Vec<String>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Membership ==
    /// Records `key` as a member of its own group.
    pub fn add_member(&mut self, key: &FullKey) {
        self.members
            .entry(key.group().to_string())
            .or_default()
            .insert(key.clone());
    }

    /// Forgets a single key; drops the group's member set once it is empty.
    pub fn remove_member(&mut self, key: &FullKey) {
        if let Some(set) = self.members.get_mut(key.group()) {
            set.remove(key);
            if set.is_empty() {
                self.members.remove(key.group());
            }
        }
    }

    /// Drops the group's member set and returns what it held.
    ///
    /// Dependency edges of the group are kept.
    pub fn remove_group(&mut self, group: &str) -> Vec<FullKey> {
        self.members
            .remove(group)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn members(&self, group: &str) -> Vec<FullKey> {
        self.members
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    // == Dependencies ==
    /// Replaces the dependency list of `group`.
    ///
    /// Calling it again overwrites, it does not accumulate. An empty list
    /// removes the edges.
    pub fn set_dependencies(&mut self, group: &str, dependencies: Vec<String>) {
        if dependencies.is_empty() {
            self.dependencies.remove(group);
        } else {
            self.dependencies.insert(group.to_string(), dependencies);
        }
    }

    pub fn dependencies(&self, group: &str) -> Vec<String> {
        self.dependencies.get(group).cloned().unwrap_or_default()
    }

    // == Cascade ==
    /// Every group reachable from `roots` over dependency edges, roots
    /// included, each listed once in breadth-first order.
    ///
    /// Cycles are cut by the visited set.
    pub fn cascade<S: AsRef<str>>(&self, roots: &[S]) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = roots
            .iter()
            .map(|g| {
                let name: &str = g.as_ref();
                name.to_string()
            })
            .collect();

        while let Some(group) = queue.pop_front() {
            if !visited.insert(group.clone()) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(&group) {
                queue.extend(deps.iter().filter(|d| !visited.contains(*d)).cloned());
            }
            order.push(group);
        }
        order
    }
}
