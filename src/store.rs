use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Any object that can divulge the resource version of its last list/watch
/// synchronization. The caches use these versions as a cheap fingerprint to
/// detect whether any observable input changed between two cycles.
pub trait LastSyncResourceVersioner: Send + Sync {
    fn last_sync_resource_version(&self) -> String;
}

/// A keyed in-memory store for one watched kind, acting as its lister.
///
/// Writers are the informer loops; readers are the caches and the HTTP
/// handlers. Values are shared out as `Arc`s so a long LIST response never
/// holds the lock.
pub struct Store<T> {
    items: RwLock<HashMap<String, Arc<T>>>,
    resource_version: RwLock<String>,
}

impl<T> Store<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            resource_version: RwLock::new(String::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.items.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<T>> {
        self.items.read().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn apply(&self, name: String, item: T, resource_version: Option<String>) {
        self.items.write().insert(name, Arc::new(item));
        if let Some(rv) = resource_version {
            *self.resource_version.write() = rv;
        }
    }

    pub fn delete(&self, name: &str, resource_version: Option<String>) {
        self.items.write().remove(name);
        if let Some(rv) = resource_version {
            *self.resource_version.write() = rv;
        }
    }

    /// Replaces the entire contents, as after a fresh LIST.
    pub fn replace(&self, items: Vec<(String, T)>, resource_version: String) {
        let mut map = HashMap::with_capacity(items.len());
        for (name, item) in items {
            map.insert(name, Arc::new(item));
        }
        *self.items.write() = map;
        *self.resource_version.write() = resource_version;
    }

    pub fn set_resource_version(&self, resource_version: String) {
        *self.resource_version.write() = resource_version;
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> LastSyncResourceVersioner for Store<T> {
    fn last_sync_resource_version(&self) -> String {
        self.resource_version.read().clone()
    }
}

/// Concatenates the versions of several stores into one fingerprint token.
pub struct UnionVersioner(Vec<Arc<dyn LastSyncResourceVersioner>>);

impl UnionVersioner {
    pub fn new(versioners: Vec<Arc<dyn LastSyncResourceVersioner>>) -> Self {
        Self(versioners)
    }
}

impl LastSyncResourceVersioner for UnionVersioner {
    fn last_sync_resource_version(&self) -> String {
        self.0
            .iter()
            .map(|v| v.last_sync_resource_version())
            .collect::<Vec<_>>()
            .join("")
    }
}
