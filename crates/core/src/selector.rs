//! Equality-only label selectors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::resource::Resource;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid label name regex"));
static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid label prefix regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("missing '=' in requirement: {0}")]
    MissingOperator(String),
    #[error("unsupported selector operator in: {0} (only key=value is supported)")]
    UnsupportedOperator(String),
    #[error("invalid label key: {0}")]
    InvalidKey(String),
    #[error("invalid label value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("conflicting requirements for key {0}")]
    Conflict(String),
}

/// Immutable set of `key=value` constraints with AND semantics.
///
/// Editing the active filter builds a new selector; existing ones never change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    constraints: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Build from pairs, validating keys and values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut constraints = BTreeMap::new();
        for (k, v) in pairs {
            let (k, v) = (k.into(), v.into());
            validate_key(&k)?;
            validate_value(&k, &v)?;
            if let Some(prev) = constraints.get(&k) {
                if prev != &v {
                    return Err(SelectorError::Conflict(k));
                }
            }
            constraints.insert(k, v);
        }
        Ok(Self { constraints })
    }

    /// New selector with one more constraint (replacing any for the same key).
    pub fn with(&self, key: &str, value: &str) -> Result<Self, SelectorError> {
        validate_key(key)?;
        validate_value(key, value)?;
        let mut constraints = self.constraints.clone();
        constraints.insert(key.to_string(), value.to_string());
        Ok(Self { constraints })
    }

    /// New selector without the constraint on `key`.
    pub fn without(&self, key: &str) -> Self {
        let mut constraints = self.constraints.clone();
        constraints.remove(key);
        Self { constraints }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&str, &str)> {
        self.constraints.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True iff every constraint key is present with an equal value.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.constraints.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.matches_labels(&resource.metadata.labels)
    }

    /// Matching subset of `items` as a new map; `items` is left untouched.
    pub fn select<K: Ord + Clone>(&self, items: &BTreeMap<K, Arc<Resource>>) -> BTreeMap<K, Arc<Resource>> {
        items
            .iter()
            .filter(|(_, r)| self.matches(r))
            .map(|(k, r)| (k.clone(), Arc::clone(r)))
            .collect()
    }

    /// Canonical upstream form: `k1=v1,k2=v2` with keys sorted.
    pub fn to_query(&self) -> String {
        self.constraints.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    /// Parse `k=v` / `k==v` requirements joined by commas. An empty string is
    /// the empty selector.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs = Vec::new();
        for req in s.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            if req.contains("!=") || req.starts_with('!') || req.contains(" in ") || req.contains(" notin ") {
                return Err(SelectorError::UnsupportedOperator(req.to_string()));
            }
            let (k, v) = match req.split_once("==") {
                Some(kv) => kv,
                None => req.split_once('=').ok_or_else(|| SelectorError::MissingOperator(req.to_string()))?,
            };
            pairs.push((k.trim().to_string(), v.trim().to_string()));
        }
        Self::from_pairs(pairs)
    }
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let bad = || SelectorError::InvalidKey(key.to_string());
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !PREFIX_RE.is_match(p) {
            return Err(bad());
        }
    }
    if name.is_empty() || name.len() > 63 || !NAME_RE.is_match(name) {
        return Err(bad());
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || (value.len() <= 63 && NAME_RE.is_match(value)) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue { key: key.to_string(), value: value.to_string() })
    }
}
