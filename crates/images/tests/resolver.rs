#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lookout_core::{Collection, Resource, ResourceList, SyncError, SyncResult};
use lookout_images::{pod_specs, ImageResolver};
use lookout_kubehub::CollectionProvider;
use tokio::sync::Semaphore;

/// Counts `get` calls and holds each one until a permit is released.
struct GatedProvider {
    gets: AtomicUsize,
    gate: Semaphore,
    fail: Mutex<bool>,
    names: Mutex<Vec<String>>,
}

impl GatedProvider {
    fn new(open: bool) -> Self {
        Self {
            gets: AtomicUsize::new(0),
            gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
            fail: Mutex::new(false),
            names: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl CollectionProvider for GatedProvider {
    async fn list(&self, _collection: &Collection) -> SyncResult<ResourceList> {
        Ok(ResourceList::default())
    }

    async fn get(&self, collection: &Collection, name: &str) -> SyncResult<Resource> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(format!("{}/{}", collection.namespace.as_deref().unwrap_or(""), name));
        let _permit = self.gate.acquire().await.expect("gate");
        if *self.fail.lock().unwrap() {
            return Err(SyncError::Transport("boom".into()));
        }
        Resource::from_value(serde_json::json!({
            "kind": "ImageStreamImage",
            "metadata": { "name": name, "namespace": collection.namespace }
        }))
    }
}

fn stream() -> Arc<Resource> {
    Arc::new(
        Resource::from_value(serde_json::json!({
            "kind": "ImageStream",
            "metadata": { "name": "ruby", "namespace": "demo" },
            "status": { "tags": [{ "tag": "latest", "items": [
                { "dockerImageReference": "reg/demo/ruby@sha256:aa", "image": "sha256:aa" }
            ]}]}
        }))
        .expect("stream"),
    )
}

fn pod(image: &str) -> Resource {
    Resource::from_value(serde_json::json!({
        "kind": "Pod",
        "metadata": { "name": "web-1", "namespace": "demo" },
        "spec": { "containers": [
            { "name": "web", "image": image },
            { "name": "sidecar", "image": "docker.io/library/busybox" }
        ]}
    }))
    .expect("pod")
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let provider = Arc::new(GatedProvider::new(false));
    let resolver = ImageResolver::new(provider.clone());
    resolver.update_image_streams(&[stream()]).await;

    let specs = pod_specs([&pod("reg/demo/ruby@sha256:aa")]);
    let first = resolver.fetch_referenced(specs.clone());
    let second = resolver.fetch_referenced(specs);
    let release = async {
        tokio::task::yield_now().await;
        provider.gate.add_permits(10);
    };
    let (a, b, ()) = tokio::join!(first, second, release);

    assert_eq!(provider.gets.load(Ordering::SeqCst), 1);
    assert_eq!(a.len() + b.len(), 1);
    assert_eq!(*provider.names.lock().unwrap(), vec!["demo/ruby@sha256:aa"]);
    assert!(resolver.image("reg/demo/ruby@sha256:aa").is_some());
    assert!(resolver.image("docker.io/library/busybox").is_none());

    // cached: nothing to fetch
    assert!(resolver.fetch_referenced(pod_specs([&pod("reg/demo/ruby@sha256:aa")])).await.is_empty());
    assert_eq!(provider.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn order_of_pods_and_streams_does_not_matter() {
    let provider = Arc::new(GatedProvider::new(true));
    let pods_first = ImageResolver::new(provider.clone());
    assert!(pods_first.fetch_referenced(pod_specs([&pod("reg/demo/ruby@sha256:aa")])).await.is_empty());
    let added = pods_first.update_image_streams(&[stream()]).await;
    assert_eq!(added, vec!["reg/demo/ruby@sha256:aa"]);

    let streams_first = ImageResolver::new(provider.clone());
    assert!(streams_first.update_image_streams(&[stream()]).await.is_empty());
    streams_first.fetch_referenced(pod_specs([&pod("reg/demo/ruby@sha256:aa")])).await;

    assert_eq!(
        pods_first.images().keys().collect::<Vec<_>>(),
        streams_first.images().keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn failed_fetch_is_retried_later() {
    let provider = Arc::new(GatedProvider::new(true));
    *provider.fail.lock().unwrap() = true;
    let resolver = ImageResolver::new(provider.clone());
    resolver.update_image_streams(&[stream()]).await;
    let specs = pod_specs([&pod("reg/demo/ruby@sha256:aa")]);
    assert!(resolver.fetch_referenced(specs.clone()).await.is_empty());
    assert!(resolver.images().is_empty());

    *provider.fail.lock().unwrap() = false;
    assert_eq!(resolver.fetch_referenced(specs).await.len(), 1);
    assert_eq!(provider.gets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn controller_templates_are_resolved_too() {
    let provider = Arc::new(GatedProvider::new(true));
    let resolver = ImageResolver::new(provider.clone());
    resolver.update_image_streams(&[stream()]).await;
    let dc = Resource::from_value(serde_json::json!({
        "kind": "DeploymentConfig",
        "metadata": { "name": "web", "namespace": "demo" },
        "spec": { "template": { "spec": { "containers": [{ "name": "web", "image": "reg/demo/ruby@sha256:aa" }] } } }
    }))
    .expect("dc");
    assert_eq!(resolver.fetch_referenced(pod_specs([&dc])).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_finished_fetch_is_never_repeated_by_a_racing_caller() {
    for _ in 0..50 {
        let provider = Arc::new(GatedProvider::new(true));
        let resolver = Arc::new(ImageResolver::new(provider.clone()));
        resolver.update_image_streams(&[stream()]).await;
        let specs = pod_specs([&pod("reg/demo/ruby@sha256:aa")]);

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let (resolver, specs) = (Arc::clone(&resolver), specs.clone());
                tokio::spawn(async move {
                    for _ in 0..20 {
                        resolver.fetch_referenced(specs.clone()).await;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for c in callers {
            c.await.expect("caller");
        }

        assert_eq!(provider.gets.load(Ordering::SeqCst), 1);
        assert!(resolver.image("reg/demo/ruby@sha256:aa").is_some());
    }
}
