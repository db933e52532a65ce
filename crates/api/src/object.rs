//! Single-object view: fetch once, then follow the object through a watch
//! on its collection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use lookout_core::{Collection, EventType, Resource, SyncError};
use lookout_kubehub::{SessionConfig, Transport, WatchSession};
use lookout_store::Notification;
use tracing::{info, warn};

use crate::alert::{self, Alert, Alerts};

pub struct ObjectView {
    name: String,
    object: Arc<ArcSwapOption<Resource>>,
    deleted: Arc<AtomicBool>,
    alerts: Alerts,
    session: Option<WatchSession>,
    error: Option<SyncError>,
}

impl ObjectView {
    /// Load `name` from `collection`. A failed load raises the load alert and
    /// no watch is started.
    pub async fn open(transport: Arc<dyn Transport>, collection: Collection, name: &str, config: SessionConfig) -> Self {
        let kind = collection.kind.kind.clone();
        let alerts = Alerts::new();
        let object = Arc::new(ArcSwapOption::empty());
        let deleted = Arc::new(AtomicBool::new(false));

        let loaded = transport.get(&collection, name).await;
        let first = match loaded {
            Ok(r) => r,
            Err(e) => {
                warn!(collection = %collection, name = %name, error = %e, "object: load failed");
                alerts.set(alert::LOAD, Alert::load_failed(&kind, &e));
                return Self { name: name.to_string(), object, deleted, alerts, session: None, error: Some(e) };
            }
        };
        info!(collection = %collection, name = %name, "object: loaded");
        object.store(Some(Arc::new(first)));

        let (obj, del, al, target) = (Arc::clone(&object), Arc::clone(&deleted), alerts.clone(), name.to_string());
        let target_ns = collection.namespace.clone();
        let handler = move |n: &Notification| {
            let mark_deleted = || {
                if !del.swap(true, Ordering::AcqRel) {
                    al.set(alert::DELETED, Alert::deleted(&kind));
                }
            };
            match (&n.action, &n.object) {
                (Some(action), Some(o)) if o.name() == target && (target_ns.is_none() || o.metadata.namespace == target_ns) => {
                    if *action == EventType::Deleted {
                        mark_deleted();
                    } else {
                        obj.store(Some(Arc::clone(o)));
                    }
                }
                (None, _) => {
                    let found = n
                        .snapshot
                        .iter()
                        .find(|r| r.name() == target && (target_ns.is_none() || r.metadata.namespace == target_ns));
                    match found {
                        Some(r) => obj.store(Some(Arc::clone(r))),
                        None => mark_deleted(),
                    }
                }
                _ => {}
            }
        };
        let session = WatchSession::open_with(transport, collection, config, |session| {
            session.on_event(handler);
        });
        Self { name: name.to_string(), object, deleted, alerts, session: Some(session), error: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest known state; after deletion the last state seen is kept.
    pub fn object(&self) -> Option<Arc<Resource>> {
        self.object.load_full()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn load_error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn session(&self) -> Option<&WatchSession> {
        self.session.as_ref()
    }

    pub fn alerts(&self) -> BTreeMap<String, Alert> {
        self.alerts.snapshot()
    }

    pub fn close(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.close();
        }
    }
}
