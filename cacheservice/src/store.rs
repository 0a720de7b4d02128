//! The LRU-ordered cache map (§4.7 "Eviction"). Grounded in the same `HashMap` + recency-order
//! `VecDeque` shape used by other in-memory caches in the corpus; evicted `Modified` lines are
//! handed back to the caller to write back, everything else is dropped without I/O.

use std::collections::{HashMap, VecDeque};

use crate::line::{CacheLine, CacheState};

pub struct CacheStore {
    lines: HashMap<String, CacheLine>,
    access_order: VecDeque<String>,
    capacity: usize,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: HashMap::new(),
            access_order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the line for `key` if present and not `Invalid`, promoting it to most-recently-used.
    pub fn get(&mut self, key: &str, now: u64) -> Option<&CacheLine> {
        let hit = matches!(self.lines.get(key), Some(line) if line.state != CacheState::Invalid);
        if !hit {
            return None;
        }
        self.touch(key);
        let line = self.lines.get_mut(key).unwrap();
        line.last_access = now;
        Some(&*line)
    }

    pub fn peek(&self, key: &str) -> Option<&CacheLine> {
        self.lines.get(key)
    }

    /// Inserts or replaces `key`'s line, promoting it to most-recently-used and evicting the
    /// least-recently-used entry if capacity is now exceeded. Returns the evicted `(key, line)` if
    /// an eviction occurred, so the caller can write back a `Modified` victim.
    pub fn install(&mut self, key: &str, line: CacheLine) -> Option<(String, CacheLine)> {
        let is_new = !self.lines.contains_key(key);
        self.lines.insert(key.to_string(), line);
        self.touch(key);

        if is_new && self.lines.len() > self.capacity {
            self.evict_lru(key)
        } else {
            None
        }
    }

    pub fn set_state(&mut self, key: &str, state: CacheState) {
        if let Some(line) = self.lines.get_mut(key) {
            line.state = state;
        }
    }

    /// Removes `key` entirely, returning its line if present (used by `delete`).
    pub fn remove(&mut self, key: &str) -> Option<CacheLine> {
        self.access_order.retain(|k| k != key);
        self.lines.remove(key)
    }

    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push_back(key.to_string());
    }

    fn evict_lru(&mut self, just_inserted: &str) -> Option<(String, CacheLine)> {
        let victim = self
            .access_order
            .iter()
            .find(|k| k.as_str() != just_inserted)
            .cloned()?;
        self.access_order.retain(|k| k != &victim);
        self.lines.remove(&victim).map(|line| (victim, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_picks_least_recently_used() {
        let mut store = CacheStore::new(2);
        store.install("a", CacheLine::new(vec![1], CacheState::Exclusive, 1));
        store.install("b", CacheLine::new(vec![2], CacheState::Exclusive, 2));
        // touch "a" so "b" becomes LRU
        store.get("a", 3);
        let evicted = store.install("c", CacheLine::new(vec![3], CacheState::Exclusive, 4));
        assert_eq!(evicted.map(|(k, _)| k), Some("b".to_string()));
    }

    #[test]
    fn invalid_lines_are_not_returned_as_hits() {
        let mut store = CacheStore::new(2);
        store.install("a", CacheLine::new(vec![1], CacheState::Shared, 1));
        store.set_state("a", CacheState::Invalid);
        assert!(store.get("a", 2).is_none());
    }
}
