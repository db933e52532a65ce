//! Label keys and values seen over the lifetime of a view, offered when the
//! user edits a filter.

use std::collections::{BTreeMap, BTreeSet};

use lookout_core::Resource;

/// Grows monotonically: entries are never removed, even when the resources
/// that contributed them are deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSuggestions {
    labels: BTreeMap<String, BTreeSet<String>>,
}

impl LabelSuggestions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, resource: &Resource) {
        for (k, v) in &resource.metadata.labels {
            self.labels.entry(k.clone()).or_default().insert(v.clone());
        }
    }

    pub fn observe_all<'a, I>(&mut self, resources: I)
    where
        I: IntoIterator<Item = &'a Resource>,
    {
        for r in resources {
            self.observe(r);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.labels.get(key).into_iter().flatten().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_accumulate() {
        let mut s = LabelSuggestions::new();
        let mut r = Resource::default();
        r.metadata.labels.insert("app".into(), "web".into());
        s.observe(&r);
        r.metadata.labels.insert("app".into(), "db".into());
        r.metadata.labels.insert("tier".into(), "back".into());
        s.observe(&r);
        assert_eq!(s.keys().collect::<Vec<_>>(), vec!["app", "tier"]);
        assert_eq!(s.values("app").collect::<Vec<_>>(), vec!["db", "web"]);
        assert_eq!(s.values("missing").count(), 0);
    }
}
