//! Keyed, user-visible alerts raised by views.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use lookout_core::SyncError;
use serde::{Deserialize, Serialize};

pub const LOAD: &str = "load";
pub const DELETED: &str = "deleted";
pub const FILTER: &str = "filter";
pub const LOG_LIMIT: &str = "log-limit";
pub const LOG_PARTIAL: &str = "log-partial";
pub const LOG_ERROR: &str = "log-error";
pub const BUILD_START: &str = "create";
pub const BUILD_CANCEL: &str = "cancel";
pub const BUILD_RERUN: &str = "rebuild";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self { level, message: message.into(), details: None }
    }

    pub fn success(message: impl Into<String>) -> Self { Self::new(AlertLevel::Success, message) }
    pub fn info(message: impl Into<String>) -> Self { Self::new(AlertLevel::Info, message) }
    pub fn warning(message: impl Into<String>) -> Self { Self::new(AlertLevel::Warning, message) }
    pub fn error(message: impl Into<String>) -> Self { Self::new(AlertLevel::Error, message) }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn load_failed(kind: &str, err: &SyncError) -> Self {
        Self::error(format!("The {} details could not be loaded.", human_kind(kind)))
            .with_details(format!("Reason: {}", err))
    }

    pub fn deleted(kind: &str) -> Self {
        Self::warning(format!("This {} has been deleted.", human_kind(kind)))
    }

    pub fn filter_hides_all(kind: &str) -> Self {
        Self::warning(format!("The active filters are hiding all {}s.", human_kind(kind)))
    }

    pub fn build_started(build: &str) -> Self {
        Self::success(format!("Build {} has started.", build))
    }

    pub fn build_start_failed(err: &SyncError) -> Self {
        Self::error("An error occurred while starting the build.").with_details(format!("Reason: {}", err))
    }

    pub fn build_cancelling(build: &str, build_config: &str) -> Self {
        Self::success(format!("Cancelling build {} of {}.", build, build_config))
    }

    pub fn build_cancel_failed(err: &SyncError) -> Self {
        Self::error("An error occurred cancelling the build.").with_details(format!("Reason: {}", err))
    }

    pub fn build_rerun(build: &str, clone: &str) -> Self {
        Self::success(format!("Build {} is being rebuilt as {}.", build, clone))
    }

    pub fn build_rerun_failed(err: &SyncError) -> Self {
        Self::error("An error occurred while rerunning the build.").with_details(format!("Reason: {}", err))
    }

    pub fn log_limit(bytes: u64) -> Self {
        Self::warning(format!(
            "The log was stopped after {:.1} MiB. Only the part received so far is shown.",
            bytes as f64 / (1024.0 * 1024.0)
        ))
    }
}

/// `DeploymentConfig` -> `deployment config`. Replication controllers are
/// shown as deployments.
pub fn human_kind(kind: &str) -> String {
    if kind == "ReplicationController" {
        return "deployment".to_string();
    }
    let mut out = String::with_capacity(kind.len() + 4);
    for (i, c) in kind.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Shared alert map; clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct Alerts {
    inner: Arc<Mutex<BTreeMap<String, Alert>>>,
}

impl Alerts {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<String, Alert>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, key: &str, alert: Alert) {
        self.map().insert(key.to_string(), alert);
    }

    pub fn clear(&self, key: &str) -> Option<Alert> {
        self.map().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Alert> {
        self.map().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Alert> {
        self.map().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_read_naturally() {
        assert_eq!(human_kind("DeploymentConfig"), "deployment config");
        assert_eq!(human_kind("Pod"), "pod");
        assert_eq!(human_kind("ReplicationController"), "deployment");
    }

    #[test]
    fn messages() {
        let a = Alert::load_failed("Build", &SyncError::NotFound("builds/x".into()));
        assert_eq!(a.message, "The build details could not be loaded.");
        assert_eq!(a.details.as_deref(), Some("Reason: not_found: builds/x"));
        assert_eq!(Alert::deleted("Pod").message, "This pod has been deleted.");
        assert_eq!(
            Alert::filter_hides_all("ReplicationController").message,
            "The active filters are hiding all deployments."
        );
        let rerun = Alert::build_rerun_failed(&SyncError::Transport("reset".into()));
        assert_eq!(rerun.level, AlertLevel::Error);
        assert_eq!(rerun.details.as_deref(), Some("Reason: transport: reset"));
        assert_eq!(Alert::build_cancelling("ruby-2", "ruby").message, "Cancelling build ruby-2 of ruby.");
    }

    #[test]
    fn levels_serialize_lowercase() {
        let v = serde_json::to_value(Alert::build_started("ruby-1")).expect("json");
        assert_eq!(v["level"], "success");
        assert!(v.get("details").is_none());
    }

    #[test]
    fn alerts_are_keyed_and_shared() {
        let a = Alerts::new();
        let b = a.clone();
        a.set(FILTER, Alert::info("x"));
        a.set(FILTER, Alert::warning("y"));
        assert_eq!(b.get(FILTER).map(|x| x.level), Some(AlertLevel::Warning));
        assert!(b.clear(FILTER).is_some());
        assert!(a.is_empty());
    }
}
