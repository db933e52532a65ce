//! One log pane: at most one active stream, restarted when its parameters
//! change.

use std::sync::Arc;

use lookout_core::{LogOptions, LogSource, SyncError};
use lookout_kubehub::StreamTransport;
use tracing::debug;

use crate::coalesce::LogConfig;
use crate::consumer::{LogHandle, LogStreamConsumer};
use crate::scroll::AutoScroll;
use crate::sink::{LogBatch, LogSink};

/// Marks batches for scrolling and turns following off once the stream ends.
struct ScrollingSink {
    inner: Arc<dyn LogSink>,
    scroll: Arc<AutoScroll>,
}

impl LogSink for ScrollingSink {
    fn on_lines(&self, mut batch: LogBatch) {
        batch.scroll_to_bottom = self.scroll.after_render();
        self.inner.on_lines(batch);
    }

    fn on_close(&self) {
        self.scroll.set_enabled(false);
        self.inner.on_close();
    }

    fn on_error(&self, err: &SyncError) {
        self.scroll.set_enabled(false);
        self.inner.on_error(err);
    }

    fn on_limit_reached(&self, bytes: u64) {
        self.inner.on_limit_reached(bytes);
    }

    fn on_possibly_truncated(&self) {
        self.inner.on_possibly_truncated();
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

struct Active {
    source: LogSource,
    opts: LogOptions,
    handle: LogHandle,
}

pub struct LogView {
    transport: Arc<dyn StreamTransport>,
    sink: Arc<dyn LogSink>,
    config: LogConfig,
    scroll: Arc<AutoScroll>,
    active: Option<Active>,
}

impl LogView {
    pub fn new(transport: Arc<dyn StreamTransport>, sink: Arc<dyn LogSink>, config: LogConfig) -> Self {
        Self { transport, sink, config, scroll: Arc::new(AutoScroll::new()), active: None }
    }

    pub fn auto_scroll(&self) -> &AutoScroll {
        &self.scroll
    }

    pub fn handle(&self) -> Option<&LogHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    pub fn handle_mut(&mut self) -> Option<&mut LogHandle> {
        self.active.as_mut().map(|a| &mut a.handle)
    }

    pub fn source(&self) -> Option<&LogSource> {
        self.active.as_ref().map(|a| &a.source)
    }

    /// Stop any active stream and clear its content, then start a new one.
    /// The old stream is stopped before the new request is made.
    pub fn stream(&mut self, source: LogSource, opts: LogOptions) -> &LogHandle {
        self.stop();
        self.scroll.set_enabled(false);
        debug!(source = %source, container = ?opts.container, "logview: starting stream");
        let sink: Arc<dyn LogSink> = Arc::new(ScrollingSink { inner: Arc::clone(&self.sink), scroll: Arc::clone(&self.scroll) });
        let handle =
            LogStreamConsumer::start(Arc::clone(&self.transport), source.clone(), opts.clone(), sink, self.config);
        &self.active.insert(Active { source, opts, handle }).handle
    }

    /// Start a stream only if none is active for the same source and options.
    /// Returns true when a new stream was started.
    pub fn ensure_stream(&mut self, source: LogSource, opts: LogOptions) -> bool {
        if let Some(a) = &self.active {
            if a.source == source && a.opts == opts {
                return false;
            }
        }
        self.stream(source, opts);
        true
    }

    /// Stop the active stream and clear rendered content.
    pub fn stop(&mut self) {
        if let Some(mut a) = self.active.take() {
            a.handle.stop();
            self.sink.clear();
        }
    }
}

impl Drop for LogView {
    fn drop(&mut self) {
        if let Some(a) = self.active.as_mut() {
            a.handle.stop();
        }
    }
}
