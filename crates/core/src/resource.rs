//! Resource snapshots, identities and the collections they are watched from.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Object metadata as served by the API. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

impl ObjectMeta {
    /// Parsed `creationTimestamp`; `None` when absent or not RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Immutable snapshot of one cluster object. `spec` and `status` are opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub status: serde_json::Value,
}

impl Resource {
    pub fn from_value(v: serde_json::Value) -> SyncResult<Self> {
        serde_json::from_value(v).map_err(|e| SyncError::Parse(format!("resource: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Identity: `uid` when present, else `(kind, namespace, name)`.
    pub fn key(&self) -> ObjectKey {
        match self.metadata.uid.as_deref() {
            Some(uid) if !uid.is_empty() => ObjectKey::Uid(uid.to_string()),
            _ => ObjectKey::Named {
                kind: self.kind.clone(),
                namespace: self.metadata.namespace.clone(),
                name: self.metadata.name.clone(),
            },
        }
    }
}

/// Cache identity of a [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKey {
    Uid(String),
    Named { kind: String, namespace: Option<String>, name: String },
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Uid(uid) => write!(f, "uid:{}", uid),
            ObjectKey::Named { kind, namespace: Some(ns), name } => write!(f, "{}:{}/{}", kind, ns, name),
            ObjectKey::Named { kind, namespace: None, name } => write!(f, "{}:{}", kind, name),
        }
    }
}

/// Result of a full collection fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    pub resource_version: Option<String>,
    pub items: Vec<Resource>,
}

#[derive(Deserialize)]
struct ListMeta {
    #[serde(default, rename = "resourceVersion")]
    resource_version: Option<String>,
}

#[derive(Deserialize)]
struct ListBody {
    #[serde(default)]
    metadata: Option<ListMeta>,
    #[serde(default)]
    items: Option<Vec<Resource>>,
}

impl ResourceList {
    /// Decode a list response body. Items usually omit `kind`, so the
    /// collection kind is filled in where missing.
    pub fn from_slice(bytes: &[u8], kind: &ResourceKind) -> SyncResult<Self> {
        let body: ListBody =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Parse(format!("list: {}", e)))?;
        let mut items = body.items.unwrap_or_default();
        for it in items.iter_mut() {
            if it.kind.is_empty() {
                it.kind = kind.kind.clone();
            }
        }
        Ok(Self { resource_version: body.metadata.and_then(|m| m.resource_version), items })
    }
}

/// A served resource kind with the plural used in API paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    pub fn pods() -> Self { Self::new("", "v1", "Pod", "pods", true) }
    pub fn services() -> Self { Self::new("", "v1", "Service", "services", true) }
    pub fn replication_controllers() -> Self { Self::new("", "v1", "ReplicationController", "replicationcontrollers", true) }
    pub fn routes() -> Self { Self::new("route.openshift.io", "v1", "Route", "routes", true) }
    pub fn builds() -> Self { Self::new("build.openshift.io", "v1", "Build", "builds", true) }
    pub fn build_configs() -> Self { Self::new("build.openshift.io", "v1", "BuildConfig", "buildconfigs", true) }
    pub fn deployment_configs() -> Self { Self::new("apps.openshift.io", "v1", "DeploymentConfig", "deploymentconfigs", true) }
    pub fn image_streams() -> Self { Self::new("image.openshift.io", "v1", "ImageStream", "imagestreams", true) }
    pub fn image_stream_images() -> Self { Self::new("image.openshift.io", "v1", "ImageStreamImage", "imagestreamimages", true) }

    /// Resolve a short alias (plural, singular or common abbreviation).
    pub fn from_alias(alias: &str) -> Option<Self> {
        let k = match alias.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Self::pods(),
            "svc" | "service" | "services" => Self::services(),
            "rc" | "deployment" | "deployments" | "replicationcontroller" | "replicationcontrollers" => {
                Self::replication_controllers()
            }
            "route" | "routes" => Self::routes(),
            "build" | "builds" => Self::builds(),
            "bc" | "buildconfig" | "buildconfigs" => Self::build_configs(),
            "dc" | "deploymentconfig" | "deploymentconfigs" => Self::deployment_configs(),
            "is" | "imagestream" | "imagestreams" => Self::image_streams(),
            "isimage" | "imagestreamimage" | "imagestreamimages" => Self::image_stream_images(),
            _ => return None,
        };
        Some(k)
    }

    /// `v1/Kind` for the core group, `group/v1/Kind` otherwise.
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

/// The (kind, scope) pair a watch session subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Collection {
    pub kind: ResourceKind,
    /// `None` watches every namespace (or a cluster-scoped kind).
    pub namespace: Option<String>,
}

impl Collection {
    pub fn new(kind: ResourceKind, namespace: Option<&str>) -> Self {
        let namespace = if kind.namespaced { namespace.map(|s| s.to_string()) } else { None };
        Self { kind, namespace }
    }

    pub fn namespaced(kind: ResourceKind, namespace: &str) -> Self {
        Self::new(kind, Some(namespace))
    }

    /// Stable key used for logging and per-collection bookkeeping.
    pub fn key(&self) -> String {
        format!("{}|{}", self.kind.gvk_key(), self.namespace.as_deref().unwrap_or(""))
    }

    /// Key for the by-name index. Names are only unique per namespace, so a
    /// collection spanning all namespaces qualifies them.
    pub fn name_key(&self, meta: &ObjectMeta) -> String {
        match (&self.namespace, &meta.namespace) {
            (None, Some(ns)) if self.kind.namespaced => format!("{}/{}", ns, meta.name),
            _ => meta.name.clone(),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind.plural, self.namespace.as_deref().unwrap_or("all"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefers_uid() {
        let mut r = Resource { kind: "Pod".into(), ..Default::default() };
        r.metadata.name = "web-1".into();
        r.metadata.namespace = Some("demo".into());
        assert_eq!(
            r.key(),
            ObjectKey::Named { kind: "Pod".into(), namespace: Some("demo".into()), name: "web-1".into() }
        );
        r.metadata.uid = Some("abc".into());
        assert_eq!(r.key(), ObjectKey::Uid("abc".into()));
    }

    #[test]
    fn list_fills_missing_kind() {
        let body = br#"{"kind":"PodList","metadata":{"resourceVersion":"42"},
            "items":[{"metadata":{"name":"a","uid":"1"}},{"kind":"Pod","metadata":{"name":"b"}}]}"#;
        let list = ResourceList::from_slice(body, &ResourceKind::pods()).expect("list");
        assert_eq!(list.resource_version.as_deref(), Some("42"));
        assert_eq!(list.items.len(), 2);
        assert!(list.items.iter().all(|r| r.kind == "Pod"));
    }

    #[test]
    fn list_rejects_garbage() {
        assert!(matches!(ResourceList::from_slice(b"{nope", &ResourceKind::pods()), Err(SyncError::Parse(_))));
    }

    #[test]
    fn name_key_qualifies_across_namespaces() {
        let meta = ObjectMeta { name: "web".into(), namespace: Some("demo".into()), ..Default::default() };
        assert_eq!(Collection::new(ResourceKind::pods(), Some("demo")).name_key(&meta), "web");
        assert_eq!(Collection::new(ResourceKind::pods(), None).name_key(&meta), "demo/web");
    }

    #[test]
    fn aliases_and_gvk_keys() {
        assert_eq!(ResourceKind::from_alias("bc").map(|k| k.gvk_key()).as_deref(), Some("build.openshift.io/v1/BuildConfig"));
        assert_eq!(ResourceKind::pods().gvk_key(), "v1/Pod");
        assert!(ResourceKind::from_alias("nope").is_none());
    }
}
