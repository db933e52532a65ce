//! Lookout images: maps container image references back to the image
//! stream tags that produced them and fetches the matching images.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt, Shared};
use lookout_core::fields::{container_images, pod_spec};
use lookout_core::{Collection, Resource, ResourceKind, SyncError, SyncResult};
use lookout_kubehub::CollectionProvider;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Image stream tag that produced a given docker image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageStreamTagRef {
    pub namespace: String,
    pub stream: String,
    pub tag: String,
    /// Image id (digest), e.g. `sha256:...`.
    pub image: String,
}

impl ImageStreamTagRef {
    /// Name of the `ImageStreamImage` for this reference: `<stream>@<image>`.
    pub fn image_name(&self) -> String {
        format!("{}@{}", self.stream, self.image)
    }
}

/// docker image reference -> tag ref
pub type ReverseIndex = BTreeMap<String, ImageStreamTagRef>;

/// Index every `status.tags[*].items[*]` of `streams` by its
/// `dockerImageReference`. Items missing either the reference or the image
/// id are skipped.
pub fn build_reverse_index<'a, I>(streams: I) -> ReverseIndex
where
    I: IntoIterator<Item = &'a Resource>,
{
    let mut out = ReverseIndex::new();
    for is in streams {
        let Some(tags) = is.status.get("tags").and_then(Value::as_array) else { continue };
        let namespace = is.namespace().unwrap_or_default();
        for t in tags {
            let tag = t.get("tag").and_then(Value::as_str).unwrap_or_default();
            for item in t.get("items").and_then(Value::as_array).into_iter().flatten() {
                let docker_ref = item.get("dockerImageReference").and_then(Value::as_str);
                let image = item.get("image").and_then(Value::as_str);
                if let (Some(r), Some(img)) = (docker_ref, image) {
                    out.insert(
                        r.to_string(),
                        ImageStreamTagRef {
                            namespace: namespace.to_string(),
                            stream: is.name().to_string(),
                            tag: tag.to_string(),
                            image: img.to_string(),
                        },
                    );
                }
            }
        }
    }
    out
}

/// Pod specs run by `resources` (pods and controller templates).
pub fn pod_specs<'a, I>(resources: I) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Resource>,
{
    resources.into_iter().filter_map(pod_spec).cloned().collect()
}

type Fetch = Shared<BoxFuture<'static, SyncResult<Arc<Resource>>>>;

/// Resolves container images of pod specs to image stream images.
///
/// The image cache is shared and append-only. Each reference is fetched at
/// most once at a time: concurrent requests await the same in-flight fetch.
/// The last submitted pod specs are kept so that a rebuilt index (new image
/// streams) resolves them again without the caller resubmitting.
pub struct ImageResolver {
    provider: Arc<dyn CollectionProvider>,
    index: ArcSwap<ReverseIndex>,
    images: Mutex<BTreeMap<String, Arc<Resource>>>,
    in_flight: Mutex<HashMap<String, Fetch>>,
    last_specs: Mutex<Vec<Value>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl ImageResolver {
    pub fn new(provider: Arc<dyn CollectionProvider>) -> Self {
        Self {
            provider,
            index: ArcSwap::from_pointee(ReverseIndex::new()),
            images: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            last_specs: Mutex::new(Vec::new()),
        }
    }

    pub fn index(&self) -> Arc<ReverseIndex> {
        self.index.load_full()
    }

    pub fn tag_ref(&self, docker_ref: &str) -> Option<ImageStreamTagRef> {
        self.index.load().get(docker_ref).cloned()
    }

    pub fn image(&self, docker_ref: &str) -> Option<Arc<Resource>> {
        lock(&self.images).get(docker_ref).cloned()
    }

    /// docker image reference -> fetched image stream image
    pub fn images(&self) -> BTreeMap<String, Arc<Resource>> {
        lock(&self.images).clone()
    }

    /// Rebuild the reverse index from the current image streams, then resolve
    /// the last submitted pod specs against it.
    pub async fn update_image_streams(&self, streams: &[Arc<Resource>]) -> Vec<String> {
        let index = build_reverse_index(streams.iter().map(|s| s.as_ref()));
        info!(streams = streams.len(), refs = index.len(), "images: index rebuilt");
        self.index.store(Arc::new(index));
        let specs = lock(&self.last_specs).clone();
        self.resolve(&specs).await
    }

    /// Fetch every image referenced by `specs` that the index knows and the
    /// cache lacks. Returns the references newly added to the cache.
    pub async fn fetch_referenced(&self, specs: Vec<Value>) -> Vec<String> {
        *lock(&self.last_specs) = specs.clone();
        self.resolve(&specs).await
    }

    async fn resolve(&self, specs: &[Value]) -> Vec<String> {
        let wanted: BTreeSet<String> = {
            let index = self.index.load();
            let images = lock(&self.images);
            specs
                .iter()
                .flat_map(|s| container_images(s).into_iter())
                .filter(|r| index.contains_key(*r) && !images.contains_key(*r))
                .map(str::to_string)
                .collect()
        };
        if wanted.is_empty() {
            return Vec::new();
        }
        let fetches: Vec<(String, Fetch)> = wanted
            .into_iter()
            .filter_map(|r| {
                let f = match self.start_fetch(&r) {
                    Ok(Some(f)) => f,
                    Ok(None) => return None,
                    Err(SyncError::FetchInFlight(_)) => {
                        debug!(image = %r, "images: joining in-flight fetch");
                        lock(&self.in_flight).get(&r).cloned()?
                    }
                    Err(_) => return None,
                };
                Some((r, f))
            })
            .collect();

        let results = futures::future::join_all(fetches.into_iter().map(|(r, f)| async move { (r, f.await) })).await;
        let mut added = Vec::new();
        for (r, res) in results {
            // stored before the slot is released: a later caller sees one or the other
            match res {
                Ok(img) => {
                    let mut images = lock(&self.images);
                    if !images.contains_key(&r) {
                        images.insert(r.clone(), img);
                        added.push(r.clone());
                    }
                }
                Err(e) => {
                    counter!("lookout_image_fetch_errors_total", 1u64);
                    warn!(image = %r, error = %e, "images: fetch failed");
                }
            }
            lock(&self.in_flight).remove(&r);
        }
        added
    }

    /// Register a fetch for `docker_ref`, or report that one is running.
    /// `None` if another fetch stored the image in the meantime.
    fn start_fetch(&self, docker_ref: &str) -> SyncResult<Option<Fetch>> {
        let tag = self
            .tag_ref(docker_ref)
            .ok_or_else(|| SyncError::NotFound(format!("no image stream tag for {}", docker_ref)))?;
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(docker_ref) {
            return Err(SyncError::FetchInFlight(docker_ref.to_string()));
        }
        if lock(&self.images).contains_key(docker_ref) {
            return Ok(None);
        }
        let provider = Arc::clone(&self.provider);
        let collection = Collection::namespaced(ResourceKind::image_stream_images(), &tag.namespace);
        let name = tag.image_name();
        counter!("lookout_image_fetch_total", 1u64);
        debug!(image = %docker_ref, name = %name, ns = %tag.namespace, "images: fetching");
        let fut: Fetch = async move { provider.get(&collection, &name).await.map(Arc::new) }.boxed().shared();
        in_flight.insert(docker_ref.to_string(), fut.clone());
        Ok(Some(fut))
    }
}
