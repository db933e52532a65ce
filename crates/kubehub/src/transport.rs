//! Collaborator traits the sync core talks to the cluster through.

use bytes::Bytes;
use futures::stream::BoxStream;
use lookout_core::{Collection, LogOptions, LogSource, Resource, ResourceList, SyncResult, WatchFrame};

/// Decoded watch frames in arrival order. The stream ending, or yielding a
/// transport error, means the subscription is gone.
pub type EventStream = BoxStream<'static, SyncResult<WatchFrame>>;

/// Raw log bytes, chunked arbitrarily.
pub type ByteStream = BoxStream<'static, SyncResult<Bytes>>;

/// One-shot reads of collections and objects.
#[async_trait::async_trait]
pub trait CollectionProvider: Send + Sync {
    async fn list(&self, collection: &Collection) -> SyncResult<ResourceList>;
    async fn get(&self, collection: &Collection, name: &str) -> SyncResult<Resource>;
}

/// Build lifecycle requests. Each returns the build the server answered with.
#[async_trait::async_trait]
pub trait BuildActions: Send + Sync {
    /// Instantiate a new build from `build_config`.
    async fn start_build(&self, namespace: &str, build_config: &str) -> SyncResult<Resource>;
    /// Re-run `build` as a new build of the same configuration.
    async fn clone_build(&self, namespace: &str, build: &str) -> SyncResult<Resource>;
    /// Mark `build` cancelled.
    async fn cancel_build(&self, namespace: &str, build: &str) -> SyncResult<Resource>;
}

/// Long-lived streams: watch feeds and logs.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Subscribe to changes after `resource_version` (from the start when `None`).
    async fn open_watch(&self, collection: &Collection, resource_version: Option<&str>) -> SyncResult<EventStream>;
    async fn open_log_stream(&self, source: &LogSource, opts: &LogOptions) -> SyncResult<ByteStream>;
}

/// Everything a watch session needs.
pub trait Transport: CollectionProvider + StreamTransport {}

impl<T: CollectionProvider + StreamTransport + ?Sized> Transport for T {}
