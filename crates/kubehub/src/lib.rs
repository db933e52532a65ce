//! Lookout kubehub: cluster transports and list-then-watch sessions.

#![forbid(unsafe_code)]

pub mod client;
pub mod mock;
pub mod session;
pub mod transport;

pub use client::{discover_kind, resolve_kind, KubeTransport};
pub use mock::MockTransport;
pub use session::{Backoff, SessionConfig, SessionState, WatchSession};
pub use transport::{BuildActions, ByteStream, CollectionProvider, EventStream, StreamTransport, Transport};
