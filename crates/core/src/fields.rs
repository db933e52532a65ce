//! Typed accessors for nested, possibly absent fields of a [`Resource`].
//!
//! Each accessor returns `None` (or an empty collection) when any segment of
//! its path is missing or has an unexpected JSON type; none of them panic.

use serde_json::Value;
use smallvec::SmallVec;

use crate::resource::Resource;

/// `metadata.labels[key]`.
pub fn label<'a>(r: &'a Resource, key: &str) -> Option<&'a str> {
    r.metadata.labels.get(key).map(String::as_str)
}

/// `metadata.annotations[key]`.
pub fn annotation<'a>(r: &'a Resource, key: &str) -> Option<&'a str> {
    r.metadata.annotations.get(key).map(String::as_str)
}

/// Annotation on one tag of an image stream: `spec.tags[name == tag].annotations[key]`.
/// `None` when the tag or the annotation is missing.
pub fn tag_annotation<'a>(r: &'a Resource, tag: &str, key: &str) -> Option<&'a str> {
    r.spec
        .get("tags")?
        .as_array()?
        .iter()
        .find(|t| t.get("name").and_then(Value::as_str) == Some(tag))?
        .get("annotations")?
        .get(key)?
        .as_str()
}

/// `status.phase`; `None` when status has not been reported yet.
pub fn status_phase(r: &Resource) -> Option<&str> {
    r.status.get("phase")?.as_str()
}

/// The pod spec a resource runs: `spec` for a Pod, `spec.template.spec` for
/// controllers (replication controllers, deployment configs). `None` when the
/// object carries no template.
pub fn pod_spec(r: &Resource) -> Option<&Value> {
    let spec = if r.kind == "Pod" {
        &r.spec
    } else {
        r.spec.get("template")?.get("spec")?
    };
    spec.is_object().then_some(spec)
}

/// Image references of every container and init container in a pod spec, in
/// declaration order. Containers without an `image` are skipped.
pub fn container_images(pod_spec: &Value) -> SmallVec<[&str; 4]> {
    containers(pod_spec).filter_map(|c| c.get("image").and_then(Value::as_str)).collect()
}

/// Names of every container and init container in a pod spec.
pub fn container_names(pod_spec: &Value) -> SmallVec<[&str; 4]> {
    containers(pod_spec).filter_map(|c| c.get("name").and_then(Value::as_str)).collect()
}

fn containers(pod_spec: &Value) -> impl Iterator<Item = &Value> {
    ["containers", "initContainers"]
        .into_iter()
        .filter_map(move |k| pod_spec.get(k).and_then(Value::as_array))
        .flatten()
}
