//! List-then-watch session for one collection.
//!
//! A session owns its [`ResourceCache`] inside a single task. The task lists
//! the collection, replaces the cache, then follows the watch feed from the
//! list checkpoint. Transport failures keep the cache and re-list after a
//! backoff delay; not-found and rejected errors end the session in
//! [`SessionState::Failed`]. The delay keeps growing across failed passes and
//! only resets once a watch delivers an event or bookmark, or stays open for
//! at least the maximum delay.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use lookout_core::config::env_or;
use lookout_core::{Collection, SyncError, WatchFrame};
use lookout_store::{CacheReader, ChangeDispatcher, Notification, ObserverId, ResourceCache};
use metrics::{counter, histogram};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Listing,
    Watching,
    Reconnecting,
    /// Terminal: the collection could not be loaded and is not retried.
    Failed,
    /// Terminal: closed by the owner.
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { backoff_initial: Duration::from_millis(500), backoff_max: Duration::from_secs(30) }
    }
}

impl SessionConfig {
    /// `LOOKOUT_WATCH_BACKOFF_INITIAL_MS` and `LOOKOUT_WATCH_BACKOFF_MAX_SECS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            backoff_initial: Duration::from_millis(env_or("LOOKOUT_WATCH_BACKOFF_INITIAL_MS", d.backoff_initial.as_millis() as u64)),
            backoff_max: Duration::from_secs(env_or("LOOKOUT_WATCH_BACKOFF_MAX_SECS", d.backoff_max.as_secs())),
        }
    }
}

/// Exponential reconnect delay: doubles from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self { initial, max, current: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let d = self.current;
        self.current = (self.current * 2).min(self.max);
        d
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

pub struct WatchSession {
    collection: Collection,
    dispatcher: Arc<ChangeDispatcher>,
    state_tx: Arc<watch::Sender<SessionState>>,
    last_error: Arc<Mutex<Option<SyncError>>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Start syncing `collection`. Must be called inside a tokio runtime.
    pub fn open(transport: Arc<dyn Transport>, collection: Collection, config: SessionConfig) -> Self {
        Self::open_with(transport, collection, config, |_| {})
    }

    /// Like [`WatchSession::open`], but `subscribe` runs before the task
    /// starts, so handlers it registers see the first list.
    pub fn open_with<S>(transport: Arc<dyn Transport>, collection: Collection, config: SessionConfig, subscribe: S) -> Self
    where
        S: FnOnce(&WatchSession),
    {
        let (state_tx, _) = watch::channel(SessionState::Init);
        let mut session = Self {
            collection,
            dispatcher: Arc::new(ChangeDispatcher::new()),
            state_tx: Arc::new(state_tx),
            last_error: Arc::new(Mutex::new(None)),
            stop: None,
            task: None,
        };
        subscribe(&session);
        session.spawn(transport, config);
        session
    }

    fn spawn(&mut self, transport: Arc<dyn Transport>, config: SessionConfig) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = SessionTask {
            transport,
            collection: self.collection.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            state_tx: Arc::clone(&self.state_tx),
            last_error: Arc::clone(&self.last_error),
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
        };
        let key = self.collection.key();
        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = stop_rx => { debug!(collection = %key, "session: stop requested"); }
                _ = run.run() => {}
            }
        }));
        self.stop = Some(stop_tx);
        info!(collection = %self.collection, "session: opened");
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Register a change handler; handlers run in registration order after
    /// each published snapshot.
    pub fn on_event<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(f)
    }

    pub fn off(&self, id: ObserverId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn reader(&self) -> CacheReader {
        self.dispatcher.reader()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The error that moved the session to `Failed`, or the last transport error.
    pub fn last_error(&self) -> Option<SyncError> {
        self.last_error.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Wait until `pred` holds for the current state. Returns the state, or
    /// `None` if the session task is gone first.
    pub async fn wait_for_state<F>(&self, pred: F) -> Option<SessionState>
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut rx = self.state_changes();
        let s = rx.wait_for(pred).await.ok().map(|s| *s);
        s
    }

    /// Stop the task. No handler runs after this returns.
    pub fn close(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.dispatcher.close();
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(t) = self.task.take() {
            t.abort();
        }
        self.state_tx.send_replace(SessionState::Closed);
        info!(collection = %self.collection, "session: closed");
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct SessionTask {
    transport: Arc<dyn Transport>,
    collection: Collection,
    dispatcher: Arc<ChangeDispatcher>,
    state_tx: Arc<watch::Sender<SessionState>>,
    last_error: Arc<Mutex<Option<SyncError>>>,
    backoff: Backoff,
}

enum Outcome {
    Retry(SyncError),
    Fail(SyncError),
}

impl SessionTask {
    fn set_state(&self, s: SessionState) {
        self.state_tx.send_if_modified(|cur| {
            if cur.is_terminal() || *cur == s {
                return false;
            }
            *cur = s;
            true
        });
    }

    fn record_error(&self, e: &SyncError) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.clone());
    }

    async fn run(mut self) {
        let key = self.collection.key();
        let mut cache = ResourceCache::new(self.collection.clone());
        loop {
            let err = match self.sync_once(&mut cache).await {
                Outcome::Retry(e) => e,
                Outcome::Fail(e) => {
                    warn!(collection = %key, error = %e, "session: failed");
                    self.record_error(&e);
                    self.set_state(SessionState::Failed);
                    return;
                }
            };
            self.record_error(&err);
            self.set_state(SessionState::Reconnecting);
            let delay = self.backoff.next_delay();
            counter!("lookout_watch_reconnects_total", 1u64, "collection" => key.clone());
            info!(collection = %key, error = %err, delay_ms = %delay.as_millis(), "session: reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// One LISTING -> WATCHING pass; returns once the watch is gone.
    async fn sync_once(&mut self, cache: &mut ResourceCache) -> Outcome {
        let key = self.collection.key();
        self.set_state(SessionState::Listing);
        let t0 = Instant::now();
        match self.transport.list(&self.collection).await {
            Ok(list) => {
                let items = list.items.len();
                self.dispatcher.replace(cache, list);
                histogram!("lookout_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
                info!(collection = %key, items, took_ms = %t0.elapsed().as_millis(), "session: list ok");
            }
            Err(e) => return classify(e),
        }

        let rv = cache.resource_version().map(str::to_string);
        let mut stream = match self.transport.open_watch(&self.collection, rv.as_deref()).await {
            Ok(s) => s,
            Err(e) => return classify(e),
        };
        self.set_state(SessionState::Watching);
        debug!(collection = %key, rv = ?rv, "session: watching");
        let opened = tokio::time::Instant::now();

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WatchFrame::Event(ev)) => {
                    debug!(collection = %key, kind = ev.kind.as_str(), name = %ev.object.name(), "session: event");
                    self.dispatcher.apply(cache, ev);
                    self.backoff.reset();
                }
                Ok(WatchFrame::Bookmark(rv)) => {
                    cache.set_resource_version(rv);
                    self.backoff.reset();
                }
                Err(SyncError::Parse(msg)) => {
                    counter!("lookout_watch_parse_dropped_total", 1u64, "collection" => key.clone());
                    warn!(collection = %key, error = %msg, "session: dropping malformed event");
                }
                Err(e) => return classify(e),
            }
        }
        if opened.elapsed() >= self.backoff.max() {
            self.backoff.reset();
        }
        Outcome::Retry(SyncError::Transport("watch stream ended".into()))
    }
}

fn classify(e: SyncError) -> Outcome {
    match e {
        SyncError::Transport(_) | SyncError::Parse(_) => Outcome::Retry(e),
        other => Outcome::Fail(other),
    }
}
