//! Log stream addressing and options.

use serde::{Deserialize, Serialize};

use crate::config::env_parse;
use crate::resource::ResourceKind;

pub const DEFAULT_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_TAIL_LINES: i64 = 1000;

/// What a log stream reads from: a pod (optionally one container) or a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogSource {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
}

impl LogSource {
    pub fn pod(namespace: &str, name: &str) -> Self {
        Self { kind: ResourceKind::pods(), name: name.to_string(), namespace: namespace.to_string() }
    }

    pub fn build(namespace: &str, name: &str) -> Self {
        Self { kind: ResourceKind::builds(), name: name.to_string(), namespace: namespace.to_string() }
    }
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind.plural, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogOptions {
    pub container: Option<String>,
    /// Keep the connection open for new lines.
    pub follow: bool,
    /// Initial backfill, server side.
    pub tail_lines: Option<i64>,
    /// Hard cap on bytes received; the stream is stopped once reached.
    pub limit_bytes: Option<u64>,
    pub since_seconds: Option<i64>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            container: None,
            follow: true,
            tail_lines: Some(DEFAULT_TAIL_LINES),
            limit_bytes: Some(DEFAULT_LIMIT_BYTES),
            since_seconds: None,
        }
    }
}

impl LogOptions {
    /// Defaults overridden by `LOOKOUT_LOG_TAIL_LINES` / `LOOKOUT_LOG_LIMIT_BYTES`.
    pub fn from_env() -> Self {
        let mut o = Self::default();
        if let Some(t) = env_parse::<i64>("LOOKOUT_LOG_TAIL_LINES") {
            o.tail_lines = (t > 0).then_some(t);
        }
        if let Some(l) = env_parse::<u64>("LOOKOUT_LOG_LIMIT_BYTES") {
            o.limit_bytes = (l > 0).then_some(l);
        }
        o
    }

    pub fn container(mut self, name: &str) -> Self {
        self.container = Some(name.to_string());
        self
    }
}
