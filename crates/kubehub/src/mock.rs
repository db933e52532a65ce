//! In-memory transport standing in for a cluster.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use lookout_core::event::decode_frame;
use lookout_core::{
    Collection, EventType, LogOptions, LogSource, ObjectKey, Resource, ResourceKind, ResourceList, SyncError,
    SyncResult, WatchEvent, WatchFrame,
};
use lookout_store::assoc::BUILD_CONFIG_LABEL;
use tokio::time::Instant;
use tracing::debug;

use crate::transport::{BuildActions, ByteStream, CollectionProvider, EventStream, StreamTransport};

type FrameTx = mpsc::UnboundedSender<SyncResult<WatchFrame>>;

#[derive(Default)]
struct State {
    /// gvk key -> objects
    objects: BTreeMap<String, BTreeMap<ObjectKey, Resource>>,
    rv: u64,
    watchers: Vec<(Collection, FrameTx)>,
    list_failures: VecDeque<SyncError>,
    watch_failures: VecDeque<SyncError>,
    list_times: Vec<Instant>,
    get_failures: VecDeque<SyncError>,
    list_calls: usize,
    watch_calls: usize,
    get_calls: usize,
    logs: HashMap<LogSource, VecDeque<ByteStream>>,
    log_requests: Vec<(LogSource, LogOptions)>,
    /// build config -> last build number handed out
    build_numbers: HashMap<String, u64>,
    build_action_failures: VecDeque<SyncError>,
    build_actions: Vec<String>,
}

/// Server-side state plus live watch feeds. `push_event` both mutates the
/// stored objects and delivers the event to matching watchers, so a re-list
/// after a dropped watch sees the same state the feed described.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
}

fn in_scope(c: &Collection, r: &Resource) -> bool {
    match &c.namespace {
        Some(ns) => r.namespace() == Some(ns.as_str()),
        None => true,
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stamp(st: &mut State, r: &mut Resource) {
        st.rv += 1;
        r.metadata.resource_version = Some(st.rv.to_string());
    }

    /// Store objects without emitting events.
    pub fn seed(&self, kind: &ResourceKind, items: Vec<Resource>) {
        let mut st = self.state();
        for mut r in items {
            if r.kind.is_empty() {
                r.kind = kind.kind.clone();
            }
            Self::stamp(&mut st, &mut r);
            st.objects.entry(kind.gvk_key()).or_default().insert(r.key(), r);
        }
    }

    /// Apply `ev` to the stored objects and deliver it to live watchers.
    pub fn push_event(&self, kind: &ResourceKind, mut ev: WatchEvent) {
        let mut st = self.state();
        if ev.object.kind.is_empty() {
            ev.object.kind = kind.kind.clone();
        }
        Self::stamp(&mut st, &mut ev.object);
        let objects = st.objects.entry(kind.gvk_key()).or_default();
        match ev.kind {
            EventType::Added | EventType::Modified => {
                objects.insert(ev.object.key(), ev.object.clone());
            }
            EventType::Deleted => {
                objects.remove(&ev.object.key());
            }
        }
        let frame = Ok(WatchFrame::Event(ev.clone()));
        st.watchers.retain(|(c, tx)| {
            if c.kind == *kind && in_scope(c, &ev.object) {
                tx.unbounded_send(frame.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    /// Deliver one raw wire line to the watchers of `kind` without touching
    /// stored state.
    pub fn push_line(&self, kind: &ResourceKind, line: &[u8]) {
        let frame = decode_frame(line);
        let mut st = self.state();
        st.watchers.retain(|(c, tx)| c.kind != *kind || tx.unbounded_send(frame.clone()).is_ok());
    }

    /// End every open watch, as if the connection dropped.
    pub fn drop_watches(&self) {
        let n = {
            let mut st = self.state();
            let n = st.watchers.len();
            st.watchers.clear();
            n
        };
        debug!(watchers = n, "mock: dropped watches");
    }

    /// Make the next `open_watch` calls fail, in order.
    pub fn fail_next_watch(&self, err: SyncError) {
        self.state().watch_failures.push_back(err);
    }

    /// Make the next `list` calls fail, in order.
    pub fn fail_next_list(&self, err: SyncError) {
        self.state().list_failures.push_back(err);
    }

    /// Make the next build actions fail, in order.
    pub fn fail_next_build_action(&self, err: SyncError) {
        self.state().build_action_failures.push_back(err);
    }

    pub fn fail_next_get(&self, err: SyncError) {
        self.state().get_failures.push_back(err);
    }

    /// Queue a log body for the next stream opened on `source`.
    pub fn push_log_stream(&self, source: &LogSource, stream: ByteStream) {
        self.state().logs.entry(source.clone()).or_default().push_back(stream);
    }

    /// Queue fixed chunks as a finite log body.
    pub fn push_log_chunks(&self, source: &LogSource, chunks: &[&'static str]) {
        let body: Vec<SyncResult<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        let s = futures::stream::iter(body);
        self.push_log_stream(source, s.boxed());
    }

    pub fn list_calls(&self) -> usize { self.state().list_calls }
    /// When each `list` call arrived, on the tokio clock.
    pub fn list_times(&self) -> Vec<Instant> { self.state().list_times.clone() }
    pub fn watch_calls(&self) -> usize { self.state().watch_calls }
    pub fn get_calls(&self) -> usize { self.state().get_calls }
    pub fn live_watches(&self) -> usize { self.state().watchers.iter().filter(|(_, tx)| !tx.is_closed()).count() }
    pub fn log_requests(&self) -> Vec<(LogSource, LogOptions)> { self.state().log_requests.clone() }
    /// Build actions in call order, as `start demo/ruby` and the like.
    pub fn build_actions(&self) -> Vec<String> { self.state().build_actions.clone() }

    /// Record a build action and take the next queued failure, if any.
    fn begin_build_action(&self, action: &str, namespace: &str, name: &str) -> SyncResult<()> {
        let mut st = self.state();
        st.build_actions.push(format!("{} {}/{}", action, namespace, name));
        match st.build_action_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn find_build(&self, namespace: &str, name: &str) -> SyncResult<Resource> {
        let builds = Collection::namespaced(ResourceKind::builds(), namespace);
        self.state()
            .objects
            .get(&builds.kind.gvk_key())
            .and_then(|m| m.values().find(|r| r.name() == name && in_scope(&builds, r)))
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("{}/{}", builds, name)))
    }

    /// Create the next numbered build of `build_config` and announce it.
    fn new_build(&self, namespace: &str, build_config: &str) -> SyncResult<Resource> {
        let number = {
            let mut st = self.state();
            let n = st.build_numbers.entry(format!("{}/{}", namespace, build_config)).or_insert(0);
            *n += 1;
            *n
        };
        let mut build = Resource { kind: "Build".into(), ..Default::default() };
        build.metadata.name = format!("{}-{}", build_config, number);
        build.metadata.namespace = Some(namespace.to_string());
        build.metadata.uid = Some(format!("uid-{}-{}-{}", namespace, build_config, number));
        build.metadata.labels.insert(BUILD_CONFIG_LABEL.to_string(), build_config.to_string());
        build.metadata.annotations.insert("openshift.io/build.number".to_string(), number.to_string());
        build.status = serde_json::json!({ "phase": "New" });
        let name = build.metadata.name.clone();
        self.push_event(&ResourceKind::builds(), WatchEvent::added(build));
        self.find_build(namespace, &name)
    }
}


#[async_trait::async_trait]
impl CollectionProvider for MockTransport {
    async fn list(&self, collection: &Collection) -> SyncResult<ResourceList> {
        let mut st = self.state();
        st.list_calls += 1;
        st.list_times.push(Instant::now());
        if let Some(e) = st.list_failures.pop_front() {
            return Err(e);
        }
        let items = st
            .objects
            .get(&collection.kind.gvk_key())
            .map(|m| m.values().filter(|r| in_scope(collection, r)).cloned().collect())
            .unwrap_or_default();
        Ok(ResourceList { resource_version: Some(st.rv.to_string()), items })
    }

    async fn get(&self, collection: &Collection, name: &str) -> SyncResult<Resource> {
        let mut st = self.state();
        st.get_calls += 1;
        if let Some(e) = st.get_failures.pop_front() {
            return Err(e);
        }
        st.objects
            .get(&collection.kind.gvk_key())
            .and_then(|m| m.values().find(|r| r.name() == name && in_scope(collection, r)))
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("{}/{}", collection, name)))
    }
}

/// Builds started or cloned here are stored and announced to watchers like
/// any pushed event.
#[async_trait::async_trait]
impl BuildActions for MockTransport {
    async fn start_build(&self, namespace: &str, build_config: &str) -> SyncResult<Resource> {
        self.begin_build_action("start", namespace, build_config)?;
        self.new_build(namespace, build_config)
    }

    async fn clone_build(&self, namespace: &str, build: &str) -> SyncResult<Resource> {
        self.begin_build_action("clone", namespace, build)?;
        let source = self.find_build(namespace, build)?;
        let config = source
            .metadata
            .labels
            .get(BUILD_CONFIG_LABEL)
            .cloned()
            .ok_or_else(|| SyncError::Rejected(format!("build {} has no build config", build)))?;
        self.new_build(namespace, &config)
    }

    async fn cancel_build(&self, namespace: &str, build: &str) -> SyncResult<Resource> {
        self.begin_build_action("cancel", namespace, build)?;
        let mut b = self.find_build(namespace, build)?;
        match b.status.as_object_mut() {
            Some(status) => {
                status.insert("cancelled".into(), serde_json::Value::Bool(true));
            }
            None => b.status = serde_json::json!({ "cancelled": true }),
        }
        self.push_event(&ResourceKind::builds(), WatchEvent::modified(b));
        self.find_build(namespace, build)
    }
}

#[async_trait::async_trait]
impl StreamTransport for MockTransport {
    async fn open_watch(&self, collection: &Collection, _resource_version: Option<&str>) -> SyncResult<EventStream> {
        let (tx, rx) = mpsc::unbounded();
        let mut st = self.state();
        st.watch_calls += 1;
        if let Some(e) = st.watch_failures.pop_front() {
            return Err(e);
        }
        st.watchers.push((collection.clone(), tx));
        Ok(rx.boxed())
    }

    async fn open_log_stream(&self, source: &LogSource, opts: &LogOptions) -> SyncResult<ByteStream> {
        let mut st = self.state();
        st.log_requests.push((source.clone(), opts.clone()));
        st.logs
            .get_mut(source)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| SyncError::NotFound(format!("log {}", source)))
    }
}
