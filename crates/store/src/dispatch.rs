//! Applies watch events to a cache, publishes the snapshot, then fans out.

use std::sync::Arc;

use arc_swap::ArcSwap;
use lookout_core::{EventType, Resource, ResourceList, WatchEvent};
use metrics::{counter, gauge};
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{CacheReader, CacheSnapshot, ResourceCache};
use crate::observe::{ObserverId, Observers};

/// What observers receive after every cache mutation.
#[derive(Debug, Clone)]
pub struct Notification {
    /// `None` for a full refresh from a list.
    pub action: Option<EventType>,
    pub object: Option<Arc<Resource>>,
    pub snapshot: Arc<CacheSnapshot>,
}

impl Notification {
    pub fn is_full_refresh(&self) -> bool {
        self.action.is_none()
    }
}

pub struct ChangeDispatcher {
    snap: Arc<ArcSwap<CacheSnapshot>>,
    epoch_tx: watch::Sender<u64>,
    reader: CacheReader,
    observers: Observers<Notification>,
}

impl Default for ChangeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        let snap = Arc::new(ArcSwap::from_pointee(CacheSnapshot::default()));
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        let reader = CacheReader::new(Arc::clone(&snap), epoch_rx);
        Self { snap, epoch_tx, reader, observers: Observers::new() }
    }

    pub fn reader(&self) -> CacheReader {
        self.reader.clone()
    }

    pub fn observers(&self) -> &Observers<Notification> {
        &self.observers
    }

    pub fn subscribe<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.observers.subscribe(f)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Apply one event. ADDED and MODIFIED upsert; DELETED removes and is a
    /// no-op for an absent identity (observers are still told).
    pub fn apply(&self, cache: &mut ResourceCache, event: WatchEvent) -> Notification {
        let action = event.kind;
        let object = match action {
            EventType::Added | EventType::Modified => Some(cache.upsert(event.object)),
            EventType::Deleted => {
                let removed = cache.remove(&event.object);
                if removed.is_none() {
                    debug!(collection = %cache.collection(), name = %event.object.name(), "dispatch: delete of absent object");
                }
                Some(removed.unwrap_or_else(|| Arc::new(event.object)))
            }
        };
        counter!("lookout_events_applied_total", 1u64, "type" => action.as_str());
        let n = Notification { action: Some(action), object, snapshot: self.publish(cache) };
        self.observers.notify(&n);
        n
    }

    /// Re-seed the cache from a full list and send a full-refresh notification.
    pub fn replace(&self, cache: &mut ResourceCache, list: ResourceList) -> Notification {
        cache.replace(list);
        let n = Notification { action: None, object: None, snapshot: self.publish(cache) };
        self.observers.notify(&n);
        n
    }

    /// Publish the current cache state without notifying (bookmarks).
    pub fn publish(&self, cache: &ResourceCache) -> Arc<CacheSnapshot> {
        let next = cache.freeze();
        gauge!("lookout_cache_items", next.len() as f64, "collection" => cache.collection().key());
        self.snap.store(Arc::clone(&next));
        let _ = self.epoch_tx.send(next.epoch);
        next
    }

    /// Stop all further fan-out, waiting for one in progress.
    pub fn close(&self) {
        self.observers.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{Collection, ResourceKind};
    use std::sync::Mutex;

    fn pod(name: &str) -> Resource {
        let mut r = Resource { kind: "Pod".into(), ..Default::default() };
        r.metadata.name = name.into();
        r.metadata.uid = Some(format!("uid-{}", name));
        r
    }

    #[test]
    fn snapshot_is_published_before_observers_run() {
        let d = ChangeDispatcher::new();
        let mut cache = ResourceCache::new(Collection::namespaced(ResourceKind::pods(), "demo"));
        let reader = d.reader();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.subscribe(move |n| {
            s.lock().unwrap().push((n.action, reader.current().len(), n.snapshot.epoch == reader.current().epoch));
        });
        d.apply(&mut cache, WatchEvent::added(pod("a")));
        d.replace(&mut cache, ResourceList { resource_version: None, items: vec![pod("a"), pod("b")] });
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(Some(EventType::Added), 1, true), (None, 2, true)]);
    }

    #[test]
    fn delete_of_absent_object_still_notifies() {
        let d = ChangeDispatcher::new();
        let mut cache = ResourceCache::new(Collection::namespaced(ResourceKind::pods(), "demo"));
        let n = d.apply(&mut cache, WatchEvent::deleted(pod("ghost")));
        assert_eq!(n.action, Some(EventType::Deleted));
        assert!(n.snapshot.is_empty());
    }
}
