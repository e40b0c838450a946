//! Per-target map of live activations.
//!
//! Each target owns one `InstanceMap`. A key moves through
//! `reserve -> commit -> remove`: while an activation is in flight the key is
//! held by a [`Reservation`] so a concurrent activation for the same key sees
//! it as taken, and only committed entries count as active. Removal belongs to
//! whoever observes the underlying process exit.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

enum Slot<V> {
    Starting,
    Live(V),
}

pub struct InstanceMap<K, V> {
    slots: Arc<Mutex<HashMap<K, Slot<V>>>>,
}

impl<K, V> Clone for InstanceMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for InstanceMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> InstanceMap<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_active(&self, key: &K) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Live(_)))
    }

    /// True while an activation for `key` is in flight or live
    pub fn is_occupied(&self, key: &K) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Claim `key` for an activation. `None` if it is already starting or live.
    pub fn try_reserve(&self, key: K) -> Option<Reservation<K, V>> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&key) {
            return None;
        }
        slots.insert(key.clone(), Slot::Starting);

        Some(Reservation {
            map: self.clone(),
            key,
            committed: false,
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        match self.slots.lock().get(key) {
            Some(Slot::Live(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop the slot for `key`, returning the live value if there was one
    pub fn remove(&self, key: &K) -> Option<V> {
        match self.slots.lock().remove(key) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.slots
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(value) => Some(value.clone()),
                Slot::Starting => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No live entries and no activation in flight
    pub fn is_idle(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// An in-flight activation. Released on drop unless committed.
pub struct Reservation<K: Eq + Hash, V> {
    map: InstanceMap<K, V>,
    key: K,
    committed: bool,
}

impl<K: Eq + Hash, V> Reservation<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Publish the live value. Returns false if the slot was already removed,
    /// which happens when the process exited before activation finished.
    pub fn commit(mut self, value: V) -> bool {
        self.committed = true;
        let mut slots = self.map.slots.lock();
        match slots.get_mut(&self.key) {
            Some(slot @ Slot::Starting) => {
                *slot = Slot::Live(value);
                true
            }
            _ => false,
        }
    }
}

impl<K: Eq + Hash, V> Drop for Reservation<K, V> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.map.slots.lock();
        if matches!(slots.get(&self.key), Some(Slot::Starting)) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_key_is_not_active_until_committed() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        let reservation = map.try_reserve(8281).unwrap();

        assert!(map.is_occupied(&8281));
        assert!(!map.is_active(&8281));

        assert!(reservation.commit(42));
        assert!(map.is_active(&8281));
        assert_eq!(map.get(&8281), Some(42));
    }

    #[test]
    fn test_second_reservation_for_same_key_is_refused() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        let first = map.try_reserve(8281).unwrap();
        assert!(map.try_reserve(8281).is_none());

        first.commit(1);
        assert!(map.try_reserve(8281).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_in_flight_reservation_is_not_idle() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        let reservation = map.try_reserve(8281).unwrap();

        assert!(map.is_empty());
        assert!(!map.is_idle());

        drop(reservation);
        assert!(map.is_idle());
    }

    #[test]
    fn test_dropped_reservation_releases_key() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        {
            let _reservation = map.try_reserve(8281).unwrap();
        }
        assert!(!map.is_occupied(&8281));
        assert!(map.try_reserve(8281).is_some());
    }

    #[test]
    fn test_remove_takes_exactly_one_entry() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        map.try_reserve(1).unwrap().commit(10);
        map.try_reserve(2).unwrap().commit(20);

        assert_eq!(map.remove(&1), Some(10));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.keys(), vec![2]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_commit_after_early_exit_is_rejected() {
        let map: InstanceMap<u16, u32> = InstanceMap::new();
        let reservation = map.try_reserve(8281).unwrap();

        // Process exited before the activation finished
        assert_eq!(map.remove(&8281), None);

        assert!(!reservation.commit(7));
        assert!(!map.is_occupied(&8281));
    }
}
