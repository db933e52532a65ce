//! Identity-keyed resource cache with a by-name index and immutable snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use lookout_core::{Collection, LabelSelector, ObjectKey, Resource, ResourceList};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::warn;

/// Mutable cache for one collection. Owned by a single writer (the watch
/// session); readers only ever see [`CacheSnapshot`]s.
pub struct ResourceCache {
    collection: Collection,
    items: FxHashMap<ObjectKey, Arc<Resource>>,
    by_name: BTreeMap<String, ObjectKey>,
    resource_version: Option<String>,
    epoch: u64,
}

impl ResourceCache {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            items: FxHashMap::default(),
            by_name: BTreeMap::new(),
            resource_version: None,
            epoch: 0,
        }
    }

    pub fn collection(&self) -> &Collection { &self.collection }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn resource_version(&self) -> Option<&str> { self.resource_version.as_deref() }

    pub fn get(&self, key: &ObjectKey) -> Option<&Arc<Resource>> {
        self.items.get(key)
    }

    /// Insert or replace the entry at the resource's identity.
    pub fn upsert(&mut self, mut resource: Resource) -> Arc<Resource> {
        if resource.kind.is_empty() {
            resource.kind = self.collection.kind.kind.clone();
        }
        if let Some(rv) = resource.metadata.resource_version.as_ref() {
            self.resource_version = Some(rv.clone());
        }
        let key = resource.key();
        let name_key = self.collection.name_key(&resource.metadata);
        let held = self.by_name.get(&name_key).cloned();
        debug_assert!(
            held.as_ref().map_or(true, |h| h == &key),
            "name collision in {}: {} already held by another identity",
            self.collection,
            name_key
        );
        if let Some(stale) = held.filter(|h| h != &key) {
            warn!(collection = %self.collection, name = %name_key, held = %stale, incoming = %key, "cache: name collision; evicting stale entry");
            self.items.remove(&stale);
        }
        let obj = Arc::new(resource);
        self.by_name.insert(name_key, key.clone());
        self.items.insert(key, Arc::clone(&obj));
        self.epoch += 1;
        obj
    }

    /// Remove the entry at the resource's identity. Absent identities are a
    /// no-op and leave the epoch unchanged.
    pub fn remove(&mut self, resource: &Resource) -> Option<Arc<Resource>> {
        if let Some(rv) = resource.metadata.resource_version.as_ref() {
            self.resource_version = Some(rv.clone());
        }
        let key = {
            let mut k = resource.key();
            if let ObjectKey::Named { kind, .. } = &mut k {
                if kind.is_empty() {
                    *kind = self.collection.kind.kind.clone();
                }
            }
            k
        };
        let removed = self.items.remove(&key)?;
        let name_key = self.collection.name_key(&removed.metadata);
        if self.by_name.get(&name_key) == Some(&key) {
            self.by_name.remove(&name_key);
        }
        self.epoch += 1;
        Some(removed)
    }

    /// Replace the whole content with a full list; the list's resource
    /// version becomes the checkpoint.
    pub fn replace(&mut self, list: ResourceList) {
        self.items.clear();
        self.by_name.clear();
        for it in list.items {
            self.upsert(it);
        }
        self.resource_version = list.resource_version;
        self.epoch += 1;
    }

    /// Advance the checkpoint without touching content (bookmarks).
    pub fn set_resource_version(&mut self, rv: Option<String>) {
        if rv.is_some() {
            self.resource_version = rv;
        }
    }

    pub fn freeze(&self) -> Arc<CacheSnapshot> {
        let by_name = self
            .by_name
            .iter()
            .filter_map(|(n, k)| self.items.get(k).map(|r| (n.clone(), Arc::clone(r))))
            .collect();
        Arc::new(CacheSnapshot {
            collection: Some(self.collection.clone()),
            epoch: self.epoch,
            resource_version: self.resource_version.clone(),
            items: self.items.clone(),
            by_name,
        })
    }
}

/// Immutable view of a cache at one epoch.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub collection: Option<Collection>,
    pub epoch: u64,
    pub resource_version: Option<String>,
    items: FxHashMap<ObjectKey, Arc<Resource>>,
    by_name: BTreeMap<String, Arc<Resource>>,
}

impl CacheSnapshot {
    pub fn get(&self, key: &ObjectKey) -> Option<&Arc<Resource>> { self.items.get(key) }
    pub fn by_name(&self, name: &str) -> Option<&Arc<Resource>> { self.by_name.get(name) }
    pub fn by_name_map(&self) -> &BTreeMap<String, Arc<Resource>> { &self.by_name }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Resources ordered by name key.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.by_name.values()
    }

    /// By-name projection restricted to `selector`.
    pub fn select(&self, selector: &LabelSelector) -> BTreeMap<String, Arc<Resource>> {
        selector.select(&self.by_name)
    }
}

/// Read side of a published cache: the current snapshot and epoch changes.
#[derive(Clone)]
pub struct CacheReader {
    snap: Arc<ArcSwap<CacheSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl CacheReader {
    pub(crate) fn new(snap: Arc<ArcSwap<CacheSnapshot>>, epoch_rx: watch::Receiver<u64>) -> Self {
        Self { snap, epoch_rx }
    }

    pub fn current(&self) -> Arc<CacheSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::ResourceKind;

    fn pod(name: &str, uid: &str) -> Resource {
        let mut r = Resource { kind: "Pod".into(), ..Default::default() };
        r.metadata.name = name.into();
        r.metadata.namespace = Some("demo".into());
        r.metadata.uid = Some(uid.into());
        r
    }

    #[test]
    fn upsert_remove_and_freeze() {
        let mut c = ResourceCache::new(Collection::namespaced(ResourceKind::pods(), "demo"));
        c.upsert(pod("a", "1"));
        c.upsert(pod("b", "2"));
        let s1 = c.freeze();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1.by_name("a").map(|r| r.name()), Some("a"));

        assert!(c.remove(&pod("a", "1")).is_some());
        let epoch = c.epoch();
        assert!(c.remove(&pod("a", "1")).is_none());
        assert_eq!(c.epoch(), epoch);

        let s2 = c.freeze();
        assert!(s2.by_name("a").is_none());
        assert!(s2.epoch > s1.epoch);
        // older snapshot unaffected
        assert_eq!(s1.len(), 2);
    }

    #[test]
    fn replace_resets_content_and_checkpoint() {
        let mut c = ResourceCache::new(Collection::namespaced(ResourceKind::pods(), "demo"));
        c.upsert(pod("stale", "9"));
        c.replace(ResourceList { resource_version: Some("10".into()), items: vec![pod("a", "1")] });
        assert_eq!(c.len(), 1);
        assert_eq!(c.resource_version(), Some("10"));
        assert!(c.freeze().by_name("stale").is_none());
    }

    #[test]
    fn all_namespace_collections_qualify_names() {
        let mut c = ResourceCache::new(Collection::new(ResourceKind::pods(), None));
        let mut other = pod("a", "2");
        other.metadata.namespace = Some("prod".into());
        c.upsert(pod("a", "1"));
        c.upsert(other);
        let s = c.freeze();
        assert_eq!(s.len(), 2);
        assert!(s.by_name("demo/a").is_some());
        assert!(s.by_name("prod/a").is_some());
    }
}
