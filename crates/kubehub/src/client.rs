//! kube-rs backed transport over raw API paths.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, Request};
use kube::api::{GetParams, ListParams, LogParams, Patch, PatchParams, PostParams, WatchParams};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use lookout_core::event::decode_frame;
use lookout_core::lines::LineBuffer;
use lookout_core::{Collection, LogOptions, LogSource, Resource, ResourceKind, ResourceList, SyncError, SyncResult};
use tokio_util::{compat::FuturesAsyncReadCompatExt, io::ReaderStream};
use tracing::{debug, info};

use crate::transport::{BuildActions, ByteStream, CollectionProvider, EventStream, StreamTransport};

#[derive(Clone)]
pub struct KubeTransport {
    client: Client,
}

impl KubeTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource {
        group: kind.group.clone(),
        version: kind.version.clone(),
        api_version: kind.api_version(),
        kind: kind.kind.clone(),
        plural: kind.plural.clone(),
    }
}

fn request_for(kind: &ResourceKind, namespace: Option<&str>) -> Request {
    let ns = if kind.namespaced { namespace } else { None };
    Request::new(<DynamicObject as kube::Resource>::url_path(&api_resource(kind), ns))
}

/// Map client errors onto the sync taxonomy. 404 is not-found, 410 (expired
/// resource version), 429 and 5xx are retried as transport failures, any
/// other API status is a rejection.
fn map_err(what: &str, e: kube::Error) -> SyncError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => SyncError::NotFound(format!("{}: {}", what, ae.message)),
        kube::Error::Api(ae) if ae.code == 410 || ae.code == 429 || ae.code >= 500 => {
            SyncError::Transport(format!("{}: {} ({})", what, ae.message, ae.code))
        }
        kube::Error::Api(ae) => SyncError::Rejected(format!("{}: {} ({})", what, ae.message, ae.reason)),
        kube::Error::SerdeError(e) => SyncError::Parse(format!("{}: {}", what, e)),
        other => SyncError::Transport(format!("{}: {}", what, other)),
    }
}

fn build_err(what: &str, e: kube::core::request::Error) -> SyncError {
    SyncError::Rejected(format!("{}: {}", what, e))
}

fn parse_object(what: &str, body: &str, kind: &ResourceKind) -> SyncResult<Resource> {
    let v: serde_json::Value = serde_json::from_str(body).map_err(|e| SyncError::Parse(format!("{}: {}", what, e)))?;
    let mut r = Resource::from_value(v)?;
    if r.kind.is_empty() {
        r.kind = kind.kind.clone();
    }
    Ok(r)
}

/// Body for the `instantiate` and `clone` subresources.
fn build_request_body(name: &str) -> SyncResult<Vec<u8>> {
    let kind = ResourceKind::builds();
    let body = serde_json::json!({
        "kind": "BuildRequest",
        "apiVersion": kind.api_version(),
        "metadata": { "name": name },
    });
    serde_json::to_vec(&body).map_err(|e| SyncError::Parse(format!("build request: {}", e)))
}

impl KubeTransport {
    async fn send(&self, what: &str, req: http::Request<Vec<u8>>) -> SyncResult<Resource> {
        let body = self.client.request_text(req).await.map_err(|e| map_err(what, e))?;
        parse_object(what, &body, &ResourceKind::builds())
    }
}

#[async_trait::async_trait]
impl CollectionProvider for KubeTransport {
    async fn list(&self, collection: &Collection) -> SyncResult<ResourceList> {
        let what = collection.to_string();
        let req = request_for(&collection.kind, collection.namespace.as_deref())
            .list(&ListParams::default())
            .map_err(|e| build_err(&what, e))?;
        let body = self.client.request_text(req).await.map_err(|e| map_err(&what, e))?;
        let list = ResourceList::from_slice(body.as_bytes(), &collection.kind)?;
        debug!(collection = %what, items = list.items.len(), rv = ?list.resource_version, "kube: list");
        Ok(list)
    }

    async fn get(&self, collection: &Collection, name: &str) -> SyncResult<Resource> {
        let what = format!("{}/{}", collection, name);
        let req = request_for(&collection.kind, collection.namespace.as_deref())
            .get(name, &GetParams::default())
            .map_err(|e| build_err(&what, e))?;
        let body = self.client.request_text(req).await.map_err(|e| map_err(&what, e))?;
        parse_object(&what, &body, &collection.kind)
    }
}

#[async_trait::async_trait]
impl BuildActions for KubeTransport {
    async fn start_build(&self, namespace: &str, build_config: &str) -> SyncResult<Resource> {
        let what = format!("buildconfigs/{}/instantiate", build_config);
        let req = request_for(&ResourceKind::build_configs(), Some(namespace))
            .create_subresource("instantiate", build_config, &PostParams::default(), build_request_body(build_config)?)
            .map_err(|e| build_err(&what, e))?;
        let build = self.send(&what, req).await?;
        info!(namespace, build_config, build = %build.name(), "kube: build started");
        Ok(build)
    }

    async fn clone_build(&self, namespace: &str, build: &str) -> SyncResult<Resource> {
        let what = format!("builds/{}/clone", build);
        let req = request_for(&ResourceKind::builds(), Some(namespace))
            .create_subresource("clone", build, &PostParams::default(), build_request_body(build)?)
            .map_err(|e| build_err(&what, e))?;
        let cloned = self.send(&what, req).await?;
        info!(namespace, build, clone = %cloned.name(), "kube: build cloned");
        Ok(cloned)
    }

    async fn cancel_build(&self, namespace: &str, build: &str) -> SyncResult<Resource> {
        let what = format!("builds/{}", build);
        let patch = serde_json::json!({ "status": { "cancelled": true } });
        let req = request_for(&ResourceKind::builds(), Some(namespace))
            .patch(build, &PatchParams::default(), &Patch::Merge(&patch))
            .map_err(|e| build_err(&what, e))?;
        let cancelled = self.send(&what, req).await?;
        info!(namespace, build, "kube: build cancel requested");
        Ok(cancelled)
    }
}

#[async_trait::async_trait]
impl StreamTransport for KubeTransport {
    async fn open_watch(&self, collection: &Collection, resource_version: Option<&str>) -> SyncResult<EventStream> {
        let what = collection.to_string();
        let wp = WatchParams::default().timeout(290);
        let req = request_for(&collection.kind, collection.namespace.as_deref())
            .watch(&wp, resource_version.unwrap_or("0"))
            .map_err(|e| build_err(&what, e))?;
        let reader = self.client.request_stream(req).await.map_err(|e| map_err(&what, e))?;
        info!(collection = %what, rv = ?resource_version, "kube: watch opened");

        let mut lines = LineBuffer::new();
        let frames = ReaderStream::new(reader.compat())
            .map(move |chunk| match chunk {
                Ok(bytes) => lines
                    .push(&bytes)
                    .into_iter()
                    .filter(|l| !l.is_empty())
                    .map(|l| decode_frame(&l))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(SyncError::Transport(format!("watch read: {}", e)))],
            })
            .flat_map(futures::stream::iter);
        Ok(frames.boxed())
    }

    async fn open_log_stream(&self, source: &LogSource, opts: &LogOptions) -> SyncResult<ByteStream> {
        let what = source.to_string();
        let lp = LogParams {
            container: opts.container.clone(),
            follow: opts.follow,
            limit_bytes: opts.limit_bytes.map(|b| b as i64),
            since_seconds: opts.since_seconds,
            tail_lines: opts.tail_lines,
            ..LogParams::default()
        };
        let req = request_for(&source.kind, Some(&source.namespace))
            .logs(&source.name, &lp)
            .map_err(|e| build_err(&what, e))?;
        let reader = self.client.request_stream(req).await.map_err(|e| map_err(&what, e))?;
        info!(source = %what, container = ?opts.container, follow = opts.follow, tail = ?opts.tail_lines, "kube: log stream opened");
        let stream = ReaderStream::new(reader.compat())
            .map(|r| r.map_err(|e| SyncError::Transport(format!("log read: {}", e))));
        Ok(stream.boxed())
    }
}

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Resolve `v1/Kind` or `group/v1/Kind` to a served kind through API discovery.
pub async fn discover_kind(client: Client, key: &str) -> Result<ResourceKind> {
    let gvk = parse_gvk_key(key)?;
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok(ResourceKind::new(&ar.group, &ar.version, &ar.kind, &ar.plural, namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Well-known alias first, then discovery for `group/version/Kind` keys.
pub async fn resolve_kind(client: Client, alias_or_key: &str) -> Result<ResourceKind> {
    if let Some(k) = ResourceKind::from_alias(alias_or_key) {
        return Ok(k);
    }
    discover_kind(client, alias_or_key).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_keys_parse() {
        let g = parse_gvk_key("apps.openshift.io/v1/DeploymentConfig").expect("gvk");
        assert_eq!((g.group.as_str(), g.version.as_str(), g.kind.as_str()), ("apps.openshift.io", "v1", "DeploymentConfig"));
        assert!(parse_gvk_key("v1/Pod").expect("core").group.is_empty());
        assert!(parse_gvk_key("Pod").is_err());
    }

    #[test]
    fn paths_follow_scope() {
        let pods = request_for(&ResourceKind::pods(), Some("demo"));
        assert_eq!(pods.url_path, "/api/v1/namespaces/demo/pods");
        let all = request_for(&ResourceKind::builds(), None);
        assert_eq!(all.url_path, "/apis/build.openshift.io/v1/builds");
    }

    #[test]
    fn build_requests_name_their_target() {
        let body: serde_json::Value = serde_json::from_slice(&build_request_body("ruby").expect("body")).expect("json");
        assert_eq!(body["kind"], "BuildRequest");
        assert_eq!(body["apiVersion"], "build.openshift.io/v1");
        assert_eq!(body["metadata"]["name"], "ruby");

        let req = request_for(&ResourceKind::build_configs(), Some("demo"))
            .create_subresource("instantiate", "ruby", &PostParams::default(), Vec::new())
            .expect("request");
        assert_eq!(req.method(), http::Method::POST);
        assert_eq!(req.uri().path(), "/apis/build.openshift.io/v1/namespaces/demo/buildconfigs/ruby/instantiate");
    }

    #[test]
    fn api_errors_map_to_taxonomy() {
        let api = |code: u16| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "m".into(),
                reason: "r".into(),
                code,
            })
        };
        assert!(matches!(map_err("x", api(404)), SyncError::NotFound(_)));
        assert!(matches!(map_err("x", api(403)), SyncError::Rejected(_)));
        assert!(map_err("x", api(410)).is_transport());
        assert!(map_err("x", api(503)).is_transport());
    }
}
