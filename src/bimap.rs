// src/bimap.rs

//! A small bidirectional map.
//!
//! The task manager uses this to translate between task handles and their
//! dense graph ids in both directions without keeping two maps in sync by
//! hand. Inserting a pairing evicts any stale pairing either key was part of.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Default)]
pub struct BiMap<L, R> {
    left_to_right: HashMap<L, R>,
    right_to_left: HashMap<R, L>,
}

impl<L, R> BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            left_to_right: HashMap::new(),
            right_to_left: HashMap::new(),
        }
    }

    /// Insert a pairing, removing any existing pairing involving either key.
    pub fn insert(&mut self, left: L, right: R) {
        if let Some(old_right) = self.left_to_right.remove(&left) {
            self.right_to_left.remove(&old_right);
        }
        if let Some(old_left) = self.right_to_left.remove(&right) {
            self.left_to_right.remove(&old_left);
        }
        self.left_to_right.insert(left.clone(), right.clone());
        self.right_to_left.insert(right, left);
    }

    pub fn get_by_left(&self, left: &L) -> Option<&R> {
        self.left_to_right.get(left)
    }

    pub fn get_by_right(&self, right: &R) -> Option<&L> {
        self.right_to_left.get(right)
    }

    pub fn contains_left(&self, left: &L) -> bool {
        self.left_to_right.contains_key(left)
    }

    pub fn remove_by_left(&mut self, left: &L) -> Option<R> {
        let right = self.left_to_right.remove(left)?;
        self.right_to_left.remove(&right);
        Some(right)
    }

    pub fn remove_by_right(&mut self, right: &R) -> Option<L> {
        let left = self.right_to_left.remove(right)?;
        self.left_to_right.remove(&left);
        Some(left)
    }

    pub fn len(&self) -> usize {
        self.left_to_right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left_to_right.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_work_both_ways() {
        let mut map: BiMap<&str, u64> = BiMap::new();
        map.insert("a", 1);
        map.insert("b", 2);

        assert_eq!(map.get_by_left(&"a"), Some(&1));
        assert_eq!(map.get_by_right(&2), Some(&"b"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn insert_evicts_stale_pairings() {
        let mut map: BiMap<&str, u64> = BiMap::new();
        map.insert("a", 1);
        map.insert("a", 2);
        assert_eq!(map.get_by_right(&1), None);
        assert_eq!(map.get_by_left(&"a"), Some(&2));

        map.insert("b", 2);
        assert_eq!(map.get_by_left(&"a"), None);
        assert_eq!(map.get_by_right(&2), Some(&"b"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn removals_clear_both_directions() {
        let mut map: BiMap<&str, u64> = BiMap::new();
        map.insert("a", 1);

        assert_eq!(map.remove_by_left(&"a"), Some(1));
        assert_eq!(map.get_by_right(&1), None);
        assert!(map.is_empty());
        assert_eq!(map.remove_by_right(&1), None);
    }
}
