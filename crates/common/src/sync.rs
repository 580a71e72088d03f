//! Lock helpers, striped locks, TTL caches and hysteresis timers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::MapId;

/// Stripe count for boundary and visibility sets.
pub const DEFAULT_STRIPES: usize = 16;

/// Shared lock that keeps working after a panicking writer.
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive lock that keeps working after a panicking writer.
pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Mutex lock that keeps working after a panicking holder.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fixed array of reader/writer locks selected by `map_id % stripes`.
///
/// Two maps landing on different stripes never contend; `write_all` takes
/// every stripe in index order so concurrent global scans cannot deadlock.
pub struct StripedLock<T> {
    stripes: Box<[RwLock<T>]>,
}

impl<T: Default> StripedLock<T> {
    pub fn new(stripe_count: usize) -> Self {
        assert!(stripe_count > 0, "stripe_count must be positive");
        Self {
            stripes: (0..stripe_count).map(|_| RwLock::new(T::default())).collect(),
        }
    }
}

impl<T: Default> Default for StripedLock<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl<T> StripedLock<T> {
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_index(&self, map: MapId) -> usize {
        map.0 as usize % self.stripes.len()
    }

    pub fn read(&self, map: MapId) -> RwLockReadGuard<'_, T> {
        read(&self.stripes[self.stripe_index(map)])
    }

    pub fn write(&self, map: MapId) -> RwLockWriteGuard<'_, T> {
        write(&self.stripes[self.stripe_index(map)])
    }

    /// Lock every stripe for a consistent global view.
    pub fn write_all(&self) -> Vec<RwLockWriteGuard<'_, T>> {
        self.stripes.iter().map(write).collect()
    }

    /// Shared view of every stripe, acquired in index order.
    pub fn read_all(&self) -> Vec<RwLockReadGuard<'_, T>> {
        self.stripes.iter().map(read).collect()
    }
}

/// Small bounded map whose entries expire `ttl_ms` after insertion.
///
/// Owned by a call site rather than shared; lookups that miss or hit an
/// expired entry must fall through to the authoritative state.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl_ms: u64,
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl_ms: u64, capacity: usize) -> Self {
        Self {
            ttl_ms,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live value for `key`. Expired entries are dropped on access.
    pub fn get(&mut self, key: &K, now_ms: u64) -> Option<V> {
        match self.entries.get(key) {
            Some((value, expires_at)) if now_ms < *expires_at => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: K, value: V, now_ms: u64) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.purge_expired(now_ms);
            if self.entries.len() >= self.capacity {
                let soonest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, (_, expires_at))| *expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    self.entries.remove(&k);
                }
            }
        }
        self.entries
            .insert(key, (value, now_ms.saturating_add(self.ttl_ms)));
    }

    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep only the entries whose key and value satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, (v, _)| keep(k, v));
        before - self.entries.len()
    }

    /// Drop every expired entry; returns how many went.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| now_ms < *expires_at);
        before - self.entries.len()
    }
}

/// Damping timer: a condition must hold continuously for a duration
/// before `poll` reports it. Any reversal disarms the timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HysteresisTimer {
    armed_at: Option<u64>,
}

impl HysteresisTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current condition. Returns true exactly once per continuous
    /// stretch of `duration_ms`, then re-arms on the next true poll.
    pub fn poll(&mut self, condition: bool, now_ms: u64, duration_ms: u64) -> bool {
        if !condition {
            self.armed_at = None;
            return false;
        }
        if duration_ms == 0 {
            self.armed_at = None;
            return true;
        }
        match self.armed_at {
            None => {
                self.armed_at = Some(now_ms);
                false
            }
            Some(start) if now_ms.saturating_sub(start) >= duration_ms => {
                self.armed_at = None;
                true
            }
            Some(_) => false,
        }
    }

    pub fn reset(&mut self) {
        self.armed_at = None;
    }

    pub fn armed_since(&self) -> Option<u64> {
        self.armed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn stripes_are_selected_by_modulo() {
        let striped: StripedLock<Vec<u32>> = StripedLock::new(4);
        assert_eq!(striped.stripe_index(MapId(0)), 0);
        assert_eq!(striped.stripe_index(MapId(5)), 1);
        striped.write(MapId(1)).push(1);
        striped.write(MapId(5)).push(5);
        assert_eq!(*striped.read(MapId(9)), vec![1, 5]);
        assert!(striped.read(MapId(2)).is_empty());
    }

    #[test]
    fn write_all_covers_every_stripe() {
        let striped: StripedLock<u32> = StripedLock::default();
        let mut guards = striped.write_all();
        assert_eq!(guards.len(), DEFAULT_STRIPES);
        for g in guards.iter_mut() {
            **g += 1;
        }
        drop(guards);
        assert!(striped.read_all().iter().all(|g| **g == 1));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = Arc::new(RwLock::new(7));
        let poison = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poison.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());
        assert_eq!(*read(&lock), 7);
        *write(&lock) = 8;
        assert_eq!(*read(&lock), 8);
    }

    #[test]
    fn ttl_cache_expires() {
        let mut cache = TtlCache::new(250, 8);
        cache.insert(1u64, "a", 1_000);
        assert_eq!(cache.get(&1, 1_249), Some("a"));
        assert_eq!(cache.get(&1, 1_250), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_cache_evicts_soonest_when_full() {
        let mut cache = TtlCache::new(100, 2);
        cache.insert(1u64, 10u32, 0);
        cache.insert(2, 20, 50);
        cache.insert(3, 30, 60);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1, 60), None);
        assert_eq!(cache.get(&2, 60), Some(20));
        assert_eq!(cache.get(&3, 60), Some(30));
    }

    #[test]
    fn ttl_cache_purge_and_invalidate() {
        let mut cache = TtlCache::new(10, 8);
        cache.insert(1u64, (), 0);
        cache.insert(2, (), 5);
        cache.invalidate(&2);
        assert_eq!(cache.purge_expired(20), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_cache_retain_by_value() {
        let mut cache = TtlCache::new(1_000, 8);
        cache.insert(1u64, 3u32, 0);
        cache.insert(2, 4, 0);
        cache.insert(3, 3, 0);
        assert_eq!(cache.retain(|_, v| *v != 3), 2);
        assert_eq!(cache.get(&2, 10), Some(4));
        assert_eq!(cache.get(&1, 10), None);
    }

    #[test]
    fn hysteresis_requires_continuous_condition() {
        let mut timer = HysteresisTimer::new();
        assert!(!timer.poll(true, 0, 5_000));
        assert!(!timer.poll(true, 4_000, 5_000));
        assert!(!timer.poll(false, 4_500, 5_000));
        assert_eq!(timer.armed_since(), None);
        assert!(!timer.poll(true, 6_000, 5_000));
        assert!(!timer.poll(true, 10_999, 5_000));
        assert!(timer.poll(true, 11_000, 5_000));
        // Fired: re-arms from scratch.
        assert!(!timer.poll(true, 11_001, 5_000));
    }

    #[test]
    fn hysteresis_zero_duration_is_immediate() {
        let mut timer = HysteresisTimer::new();
        assert!(timer.poll(true, 42, 0));
        assert!(timer.poll(true, 43, 0));
        assert!(!timer.poll(false, 44, 0));
    }
}
