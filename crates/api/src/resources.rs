//! Collection view: a watch session plus the active label filter, label
//! suggestions and the filter warning.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use lookout_core::{Collection, LabelSelector, Resource};
use lookout_kubehub::{SessionConfig, SessionState, Transport, WatchSession};
use lookout_store::{associate, Association, AssociationIndexer, CacheSnapshot, LabelSuggestions, Notification, ObserverId, ParentRef};
use lookout_store::assoc::Derived;
use tracing::debug;

use crate::alert::{self, Alert, Alerts};

pub struct ResourceView {
    session: WatchSession,
    selector: Arc<ArcSwap<LabelSelector>>,
    suggestions: Arc<Mutex<LabelSuggestions>>,
    alerts: Alerts,
}

/// Raise or clear the filter warning for `snap` under `selector`.
fn update_filter_warning(alerts: &Alerts, kind: &str, selector: &LabelSelector, snap: &CacheSnapshot) {
    let hides_all = !selector.is_empty() && !snap.is_empty() && !snap.iter().any(|r| selector.matches(r));
    if hides_all {
        alerts.set(alert::FILTER, Alert::filter_hides_all(kind));
    } else {
        alerts.clear(alert::FILTER);
    }
}

impl ResourceView {
    pub fn open(transport: Arc<dyn Transport>, collection: Collection, config: SessionConfig) -> Self {
        let kind = collection.kind.kind.clone();
        let selector = Arc::new(ArcSwap::from_pointee(LabelSelector::everything()));
        let suggestions = Arc::new(Mutex::new(LabelSuggestions::new()));
        let alerts = Alerts::new();

        let (sel, sugg, al) = (Arc::clone(&selector), Arc::clone(&suggestions), alerts.clone());
        let session = WatchSession::open_with(transport, collection, config, |session| {
            session.on_event(move |n: &Notification| {
                {
                    let mut s = sugg.lock().unwrap_or_else(|p| p.into_inner());
                    match &n.object {
                        None => s.observe_all(n.snapshot.iter().map(|r| r.as_ref())),
                        Some(o) => s.observe(o),
                    }
                }
                update_filter_warning(&al, &kind, &sel.load(), &n.snapshot);
            });
        });
        Self { session, selector, suggestions, alerts }
    }

    pub fn session(&self) -> &WatchSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn on_event<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.session.on_event(f)
    }

    pub fn selector(&self) -> Arc<LabelSelector> {
        self.selector.load_full()
    }

    /// Swap the active filter and re-evaluate the filter warning.
    pub fn set_selector(&self, selector: LabelSelector) {
        debug!(collection = %self.session.collection(), selector = %selector, "view: filter changed");
        self.selector.store(Arc::new(selector));
        update_filter_warning(
            &self.alerts,
            &self.session.collection().kind.kind,
            &self.selector.load(),
            &self.session.reader().current(),
        );
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.session.reader().current()
    }

    /// Every cached resource by name key.
    pub fn unfiltered(&self) -> BTreeMap<String, Arc<Resource>> {
        self.snapshot().by_name_map().clone()
    }

    /// Cached resources matching the active filter.
    pub fn filtered(&self) -> BTreeMap<String, Arc<Resource>> {
        self.snapshot().select(&self.selector.load())
    }

    pub fn filter_hides_all(&self) -> bool {
        self.alerts.get(alert::FILTER).is_some()
    }

    pub fn suggestions(&self) -> LabelSuggestions {
        self.suggestions.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Associations over the whole cache, memoized by `indexer`.
    pub fn associations(&self, indexer: &AssociationIndexer) -> Arc<Derived> {
        indexer.derive(&self.snapshot())
    }

    /// Associations over the filtered projection only.
    pub fn filtered_associations(&self, parent: &ParentRef) -> Association {
        associate(&self.filtered(), parent)
    }

    /// Current alerts, including a load failure if the session gave up.
    pub fn alerts(&self) -> BTreeMap<String, Alert> {
        if self.session.state() == SessionState::Failed {
            if let Some(e) = self.session.last_error() {
                self.alerts.set(alert::LOAD, Alert::load_failed(&self.session.collection().kind.kind, &e));
            }
        }
        self.alerts.snapshot()
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}
