//! Lookout store: per-collection resource cache, change dispatch and the
//! indices derived from it.

#![forbid(unsafe_code)]

pub mod assoc;
pub mod cache;
pub mod dispatch;
pub mod observe;
pub mod suggest;

pub use assoc::{associate, belongs_to, in_progress, Association, AssociationIndexer, ParentRef, PhaseSource};
pub use cache::{CacheReader, CacheSnapshot, ResourceCache};
pub use dispatch::{ChangeDispatcher, Notification};
pub use observe::{ObserverId, Observers};
pub use suggest::LabelSuggestions;
