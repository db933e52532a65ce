//! Log pane wiring: turns log stream conditions into alerts.

use std::sync::Arc;

use lookout_core::{LogOptions, LogSource, SyncError};
use lookout_kubehub::StreamTransport;
use lookout_logs::{LogBatch, LogConfig, LogSink, LogView};

use crate::alert::{self, Alert, Alerts};

/// Forwards to `inner` and records limit, partial-log and error alerts.
/// Clearing the pane clears those alerts too.
pub struct AlertingLogSink {
    inner: Arc<dyn LogSink>,
    alerts: Alerts,
}

impl AlertingLogSink {
    pub fn new(inner: Arc<dyn LogSink>, alerts: Alerts) -> Self {
        Self { inner, alerts }
    }
}

impl LogSink for AlertingLogSink {
    fn on_lines(&self, batch: LogBatch) {
        self.inner.on_lines(batch);
    }

    fn on_close(&self) {
        self.inner.on_close();
    }

    fn on_error(&self, err: &SyncError) {
        self.alerts.set(alert::LOG_ERROR, Alert::error("The logs are no longer available or could not be loaded.").with_details(err.to_string()));
        self.inner.on_error(err);
    }

    fn on_limit_reached(&self, bytes: u64) {
        self.alerts.set(alert::LOG_LIMIT, Alert::log_limit(bytes));
        self.inner.on_limit_reached(bytes);
    }

    fn on_possibly_truncated(&self) {
        self.alerts.set(alert::LOG_PARTIAL, Alert::info("Only the most recent lines of the log are shown."));
        self.inner.on_possibly_truncated();
    }

    fn clear(&self) {
        for k in [alert::LOG_ERROR, alert::LOG_LIMIT, alert::LOG_PARTIAL] {
            self.alerts.clear(k);
        }
        self.inner.clear();
    }
}

/// A [`LogView`] whose conditions surface as alerts.
pub struct LogPane {
    view: LogView,
    alerts: Alerts,
}

impl LogPane {
    pub fn new(transport: Arc<dyn StreamTransport>, sink: Arc<dyn LogSink>, config: LogConfig) -> Self {
        let alerts = Alerts::new();
        let sink: Arc<dyn LogSink> = Arc::new(AlertingLogSink::new(sink, alerts.clone()));
        Self { view: LogView::new(transport, sink, config), alerts }
    }

    /// Start (or restart, when parameters changed) the stream for `source`.
    pub fn show(&mut self, source: LogSource, opts: LogOptions) -> bool {
        self.view.ensure_stream(source, opts)
    }

    pub fn restart(&mut self, source: LogSource, opts: LogOptions) {
        self.view.stream(source, opts);
    }

    pub fn view(&self) -> &LogView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut LogView {
        &mut self.view
    }

    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }
}
