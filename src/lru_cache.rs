//! # Artifact Memo
//!
//! Bounded map of recently served artifacts. Decoding an artifact costs a
//! full read of its blob, and plotting code asks for the same recording or
//! range many times in a row, so the service keeps the decoded form here.
//! Entries are evicted least-recently-served first.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Least-recently-used map.
///
/// Every access stamps the entry with a fresh tick; `recency` orders keys by
/// their latest tick so eviction pops the smallest one.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Memo holding at most `capacity` artifacts; 0 turns memoization off.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Entry for `key`, now the most recently served.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (value, stamp) = self.entries.get_mut(key)?;
        self.recency.remove(stamp);
        *stamp = tick;
        self.recency.insert(tick, key.clone());
        Some(value)
    }

    /// Store `value`, replacing any entry for `key`. When full, the
    /// least recently served artifact makes room.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some((_, stamp)) = self.entries.get(&key) {
            self.recency.remove(stamp);
        } else if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
            }
        }
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
    }

    /// Forget `key`, returning what was memoized for it.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.recency.remove(&stamp);
        Some(value)
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let recency = &mut self.recency;
        self.entries.retain(|key, (value, stamp)| {
            let kept = keep(key, value);
            if !kept {
                recency.remove(stamp);
            }
            kept
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }
}
