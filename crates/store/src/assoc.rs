//! Parent/child associations (builds under build configs, deployments under
//! deployment configs) and their in-progress subsets.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lookout_core::fields::{annotation, label, status_phase};
use lookout_core::{ObjectMeta, Resource};
use metrics::histogram;
use tracing::debug;

use crate::cache::CacheSnapshot;

/// parent id -> (child name -> child)
pub type Association = BTreeMap<String, BTreeMap<String, Arc<Resource>>>;

pub const BUILD_CONFIG_LABEL: &str = "openshift.io/build-config.name";
pub const LEGACY_BUILD_CONFIG_LABEL: &str = "buildconfig";
pub const DEPLOYMENT_CONFIG_KEY: &str = "openshift.io/deployment-config.name";
pub const LEGACY_DEPLOYMENT_CONFIG_LABEL: &str = "deploymentconfig";
pub const DEPLOYMENT_PHASE_ANNOTATION: &str = "openshift.io/deployment.phase";

/// Where a child records the name of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Label(String),
    Annotation(String),
    /// First source that yields a non-empty value wins.
    AnyOf(Vec<ParentRef>),
}

impl ParentRef {
    pub fn label(key: &str) -> Self { ParentRef::Label(key.to_string()) }
    pub fn annotation(key: &str) -> Self { ParentRef::Annotation(key.to_string()) }

    /// Builds name their build config by label.
    pub fn build_config() -> Self {
        ParentRef::AnyOf(vec![Self::label(BUILD_CONFIG_LABEL), Self::label(LEGACY_BUILD_CONFIG_LABEL)])
    }

    /// Replication controllers name their deployment config by label, and
    /// older ones only by annotation.
    pub fn deployment_config() -> Self {
        ParentRef::AnyOf(vec![
            Self::label(DEPLOYMENT_CONFIG_KEY),
            Self::label(LEGACY_DEPLOYMENT_CONFIG_LABEL),
            Self::annotation(DEPLOYMENT_CONFIG_KEY),
        ])
    }

    pub fn extract<'a>(&self, child: &'a Resource) -> Option<&'a str> {
        let v = match self {
            ParentRef::Label(k) => label(child, k),
            ParentRef::Annotation(k) => annotation(child, k),
            ParentRef::AnyOf(refs) => return refs.iter().find_map(|r| r.extract(child)),
        };
        v.filter(|s| !s.is_empty())
    }
}

/// Where a child reports its lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseSource {
    Status,
    Annotation(String),
}

impl PhaseSource {
    pub fn build() -> Self { PhaseSource::Status }
    pub fn deployment() -> Self { PhaseSource::Annotation(DEPLOYMENT_PHASE_ANNOTATION.to_string()) }

    pub fn phase<'a>(&self, r: &'a Resource) -> Option<&'a str> {
        match self {
            PhaseSource::Status => status_phase(r),
            PhaseSource::Annotation(k) => annotation(r, k),
        }
    }
}

/// `New`, `Pending` and `Running` are the non-terminal phases.
pub fn is_incomplete_phase(phase: &str) -> bool {
    ["new", "pending", "running"].iter().any(|p| phase.eq_ignore_ascii_case(p))
}

/// Group `children` (keyed by name) under the parent each one references.
/// Children without a parent reference are left out.
pub fn associate(children: &BTreeMap<String, Arc<Resource>>, parent: &ParentRef) -> Association {
    let mut out = Association::new();
    for (name, child) in children {
        if let Some(p) = parent.extract(child) {
            out.entry(p.to_string()).or_default().insert(name.clone(), Arc::clone(child));
        }
    }
    out
}

/// Subset of `assoc` whose children are still in a non-terminal phase.
/// Parents left without children are dropped.
pub fn in_progress(assoc: &Association, phase: &PhaseSource) -> Association {
    assoc
        .iter()
        .filter_map(|(p, children)| {
            let running: BTreeMap<_, _> = children
                .iter()
                .filter(|(_, c)| phase.phase(c).map(is_incomplete_phase).unwrap_or(false))
                .map(|(n, c)| (n.clone(), Arc::clone(c)))
                .collect();
            (!running.is_empty()).then(|| (p.clone(), running))
        })
        .collect()
}

/// True when `child` references `parent` and both live in the same namespace.
pub fn belongs_to(child: &Resource, parent: &Resource, parent_ref: &ParentRef) -> bool {
    child.namespace() == parent.namespace() && parent_ref.extract(child) == Some(parent.name())
}

/// Both projections derived from one snapshot.
#[derive(Debug, Default)]
pub struct Derived {
    pub epoch: u64,
    pub by_parent: Association,
    pub in_progress: Association,
}

/// Lazily recomputes associations from a child-kind snapshot, memoized on
/// the snapshot epoch. Parent ids are qualified by namespace when the
/// snapshot spans namespaces.
pub struct AssociationIndexer {
    parent_ref: ParentRef,
    phase: PhaseSource,
    memo: Mutex<Option<Arc<Derived>>>,
}

impl AssociationIndexer {
    pub fn new(parent_ref: ParentRef, phase: PhaseSource) -> Self {
        Self { parent_ref, phase, memo: Mutex::new(None) }
    }

    pub fn builds() -> Self {
        Self::new(ParentRef::build_config(), PhaseSource::build())
    }

    pub fn deployments() -> Self {
        Self::new(ParentRef::deployment_config(), PhaseSource::deployment())
    }

    pub fn derive(&self, snap: &CacheSnapshot) -> Arc<Derived> {
        let mut memo = self.memo.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(d) = memo.as_ref() {
            if d.epoch == snap.epoch {
                return Arc::clone(d);
            }
        }
        let t0 = Instant::now();
        let by_parent = match snap.collection.as_ref() {
            Some(c) if c.namespace.is_none() && c.kind.namespaced => {
                let mut out = Association::new();
                for (name, child) in snap.by_name_map() {
                    if let Some(p) = self.parent_ref.extract(child) {
                        let meta = ObjectMeta { name: p.to_string(), namespace: child.metadata.namespace.clone(), ..Default::default() };
                        out.entry(c.name_key(&meta)).or_default().insert(name.clone(), Arc::clone(child));
                    }
                }
                out
            }
            _ => associate(snap.by_name_map(), &self.parent_ref),
        };
        let in_progress = in_progress(&by_parent, &self.phase);
        let took = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("lookout_association_build_ms", took);
        debug!(epoch = snap.epoch, parents = by_parent.len(), took_ms = %took, "assoc: recomputed");
        let d = Arc::new(Derived { epoch: snap.epoch, by_parent, in_progress });
        *memo = Some(Arc::clone(&d));
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(name: &str, labels: &[(&str, &str)], phase: &str) -> Arc<Resource> {
        let mut r = Resource { kind: "Build".into(), ..Default::default() };
        r.metadata.name = name.into();
        r.metadata.namespace = Some("demo".into());
        r.metadata.labels = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        r.status = serde_json::json!({ "phase": phase });
        Arc::new(r)
    }

    #[test]
    fn label_fallback_and_first_source_wins() {
        let r = ParentRef::build_config();
        assert_eq!(r.extract(&build("a", &[("buildconfig", "old")], "New")), Some("old"));
        assert_eq!(
            r.extract(&build("b", &[("buildconfig", "old"), (BUILD_CONFIG_LABEL, "new")], "New")),
            Some("new")
        );
        assert_eq!(r.extract(&build("c", &[(BUILD_CONFIG_LABEL, "")], "New")), None);
    }

    #[test]
    fn phases_are_case_insensitive() {
        assert!(is_incomplete_phase("Running"));
        assert!(is_incomplete_phase("pending"));
        assert!(!is_incomplete_phase("Complete"));
        assert!(!is_incomplete_phase("Failed"));
    }

    #[test]
    fn belongs_to_requires_same_namespace() {
        let mut bc = Resource { kind: "BuildConfig".into(), ..Default::default() };
        bc.metadata.name = "web".into();
        bc.metadata.namespace = Some("demo".into());
        let b = build("web-1", &[(BUILD_CONFIG_LABEL, "web")], "Complete");
        assert!(belongs_to(&b, &bc, &ParentRef::build_config()));
        bc.metadata.namespace = Some("prod".into());
        assert!(!belongs_to(&b, &bc, &ParentRef::build_config()));
    }
}
