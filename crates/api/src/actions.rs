//! Build start, cancel and re-run, reported through keyed alerts.

use std::sync::Arc;

use lookout_core::{Resource, SyncResult};
use lookout_kubehub::BuildActions;
use metrics::counter;
use tracing::{info, warn};

use crate::alert::{self, Alert, Alerts};

/// Build controls for one namespace. Outcomes land in the shared alerts, so
/// a page built on the same [`Alerts`] shows them next to its own.
pub struct BuildControls {
    actions: Arc<dyn BuildActions>,
    namespace: String,
    alerts: Alerts,
}

fn record(action: &'static str, res: &SyncResult<Resource>) {
    let outcome = if res.is_ok() { "ok" } else { "error" };
    counter!("lookout_build_actions_total", 1u64, "action" => action, "outcome" => outcome);
}

impl BuildControls {
    pub fn new(actions: Arc<dyn BuildActions>, namespace: &str, alerts: Alerts) -> Self {
        Self { actions, namespace: namespace.to_string(), alerts }
    }

    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }

    /// Start a new build of `build_config`.
    pub async fn start_build(&self, build_config: &str) -> SyncResult<Resource> {
        let res = self.actions.start_build(&self.namespace, build_config).await;
        record("start", &res);
        match &res {
            Ok(b) => {
                info!(namespace = %self.namespace, build_config, build = %b.name(), "builds: started");
                self.alerts.set(alert::BUILD_START, Alert::build_started(b.name()));
            }
            Err(e) => {
                warn!(namespace = %self.namespace, build_config, error = %e, "builds: start failed");
                self.alerts.set(alert::BUILD_START, Alert::build_start_failed(e));
            }
        }
        res
    }

    pub async fn cancel_build(&self, build: &str, build_config: &str) -> SyncResult<Resource> {
        let res = self.actions.cancel_build(&self.namespace, build).await;
        record("cancel", &res);
        match &res {
            Ok(_) => {
                info!(namespace = %self.namespace, build, "builds: cancelling");
                self.alerts.set(alert::BUILD_CANCEL, Alert::build_cancelling(build, build_config));
            }
            Err(e) => {
                warn!(namespace = %self.namespace, build, error = %e, "builds: cancel failed");
                self.alerts.set(alert::BUILD_CANCEL, Alert::build_cancel_failed(e));
            }
        }
        res
    }

    /// Re-run `build` as a new build of the same configuration.
    pub async fn rerun_build(&self, build: &str) -> SyncResult<Resource> {
        let res = self.actions.clone_build(&self.namespace, build).await;
        record("rerun", &res);
        match &res {
            Ok(b) => {
                info!(namespace = %self.namespace, build, clone = %b.name(), "builds: rerunning");
                self.alerts.set(alert::BUILD_RERUN, Alert::build_rerun(build, b.name()));
            }
            Err(e) => {
                warn!(namespace = %self.namespace, build, error = %e, "builds: rerun failed");
                self.alerts.set(alert::BUILD_RERUN, Alert::build_rerun_failed(e));
            }
        }
        res
    }
}
