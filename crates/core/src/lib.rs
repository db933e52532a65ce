//! Lookout core types: resources, watch events, label selectors and errors.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod fields;
pub mod lines;
pub mod log;
pub mod resource;
pub mod selector;

pub use error::{SyncError, SyncResult};
pub use event::{EventType, WatchEvent, WatchFrame};
pub use log::{LogOptions, LogSource};
pub use resource::{Collection, ObjectKey, ObjectMeta, Resource, ResourceKind, ResourceList};
pub use selector::{LabelSelector, SelectorError};

pub mod prelude {
    pub use super::{
        Collection, EventType, LabelSelector, LogOptions, LogSource, ObjectKey, Resource, ResourceKind,
        ResourceList, SyncError, SyncResult, WatchEvent,
    };
}
