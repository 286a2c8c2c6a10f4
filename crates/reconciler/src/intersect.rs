//! Three-way set comparison, the diff kernel of every reconciler.

use std::collections::HashSet;
use std::hash::Hash;

/// Partition of the union of two key collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intersection<K> {
    /// Keys present on both sides.
    pub both: Vec<K>,
    /// Keys only present in the current state: candidates for revoke or disable.
    pub only_current: Vec<K>,
    /// Keys only present in the desired state: candidates for grant or create.
    pub only_desired: Vec<K>,
}

impl<K> Intersection<K> {
    /// Whether the two sides already hold the same keys.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.only_current.is_empty() && self.only_desired.is_empty()
    }
}

impl<K> Default for Intersection<K> {
    fn default() -> Self {
        Self {
            both: Vec::new(),
            only_current: Vec::new(),
            only_desired: Vec::new(),
        }
    }
}

/// Compare `current` against `desired` in O(n + m).
///
/// Duplicates are collapsed. Output order follows first appearance, current
/// side first, and carries no meaning.
pub fn intersect<K, C, D>(current: C, desired: D) -> Intersection<K>
where
    K: Eq + Hash + Clone,
    C: IntoIterator<Item = K>,
    D: IntoIterator<Item = K>,
{
    let desired: Vec<K> = dedup(desired);
    let desired_set: HashSet<&K> = desired.iter().collect();
    let current: Vec<K> = dedup(current);
    let current_set: HashSet<&K> = current.iter().collect();

    let (both, only_current): (Vec<K>, Vec<K>) = current
        .iter()
        .cloned()
        .partition(|key| desired_set.contains(key));
    let only_desired = desired
        .iter()
        .filter(|key| !current_set.contains(key))
        .cloned()
        .collect();

    Intersection {
        both,
        only_current,
        only_desired,
    }
}

fn dedup<K, I>(keys: I) -> Vec<K>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = K>,
{
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}
