// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed map of `Arc<V>` guarded by a single `RwLock`, with an atomic
//! `get_or_create` that calls its factory at most once per key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::RwLock;

pub struct ConcurrentMap<K, V> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone + Ord,
{
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.read().await.get(key).cloned()
    }

    /// Returns `(value, found)`, mirroring the SDK-side `GetEx` accessor.
    pub async fn get_ex(&self, key: &K) -> (Option<Arc<V>>, bool) {
        let guard = self.inner.read().await;
        match guard.get(key) {
            Some(v) => (Some(Arc::clone(v)), true),
            None => (None, false),
        }
    }

    pub async fn set(&self, key: K, value: V) {
        self.inner.write().await.insert(key, Arc::new(value));
    }

    pub async fn delete(&self, key: &K) -> Option<Arc<V>> {
        self.inner.write().await.remove(key)
    }

    /// Atomic get-or-create: `factory` runs at most once per key, even under
    /// concurrent callers, via double-checked locking.
    pub async fn get_or_create<F>(&self, key: K, factory: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(v) = self.inner.read().await.get(&key) {
            return Arc::clone(v);
        }
        let mut guard = self.inner.write().await;
        if let Some(v) = guard.get(&key) {
            return Arc::clone(v);
        }
        let value = Arc::new(factory());
        guard.insert(key, Arc::clone(&value));
        value
    }

    /// Sorted snapshot of current keys.
    pub async fn keys(&self) -> Vec<K> {
        let guard = self.inner.read().await;
        let mut keys: Vec<K> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn values(&self) -> Vec<Arc<V>> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn get_or_create_invokes_factory_once_per_key() {
        let map: ConcurrentMap<String, AtomicU32> = ConcurrentMap::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let calls = Arc::clone(&calls);
            map.get_or_create("a".to_owned(), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                AtomicU32::new(0)
            })
            .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let map: ConcurrentMap<String, i32> = ConcurrentMap::new();
        map.set("z".to_owned(), 1).await;
        map.set("a".to_owned(), 2).await;
        map.set("m".to_owned(), 3).await;
        assert_eq!(map.keys().await, vec!["a".to_owned(), "m".to_owned(), "z".to_owned()]);
    }

    #[tokio::test]
    async fn delete_removes_and_returns_value() {
        let map: ConcurrentMap<String, i32> = ConcurrentMap::new();
        map.set("k".to_owned(), 42).await;
        let removed = map.delete(&"k".to_owned()).await;
        assert_eq!(removed.map(|v| *v), Some(42));
        assert!(map.get(&"k".to_owned()).await.is_none());
    }
}
