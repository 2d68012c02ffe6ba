//! Keyed in-memory state shared by every conversation task.
//!
//! The outer map is only write-locked to insert a missing entry; each entry
//! has its own mutex, so tasks for different conversations never contend on
//! anything but the brief outer read lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

type Factory<V> = Arc<dyn Fn() -> V + Send + Sync>;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct KeyedStore<K, V> {
    entries: RwLock<HashMap<K, Arc<Mutex<V>>>>,
    make_default: Factory<V>,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    pub fn new<F>(make_default: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        Self {
            entries: RwLock::new(HashMap::new()),
            make_default: Arc::new(make_default),
        }
    }

    fn entry(&self, key: K) -> Arc<Mutex<V>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&key) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new((self.make_default)()))),
        )
    }

    /// Snapshot of the entry, creating the default on first access.
    pub fn get(&self, key: K) -> V {
        let entry = self.entry(key);
        let guard = lock_unpoisoned(&entry);
        guard.clone()
    }

    pub fn put(&self, key: K, value: V) {
        let entry = self.entry(key);
        *lock_unpoisoned(&entry) = value;
    }

    /// Read-modify-write under the entry's lock.
    pub fn update<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> R {
        let entry = self.entry(key);
        let mut guard = lock_unpoisoned(&entry);
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_creates_default_lazily() {
        let store: KeyedStore<u8, Vec<u8>> = KeyedStore::new(|| vec![7]);
        assert!(store.is_empty());
        assert_eq!(store.get(1), vec![7]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_is_serialized_per_key() {
        let store: Arc<KeyedStore<u8, u64>> = Arc::new(KeyedStore::new(|| 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.update(3, |value| *value += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get(3), 8000);
        assert_eq!(store.get(4), 0);
    }
}
