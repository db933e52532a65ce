//! Lookout view stores: what a console page binds to.
//!
//! Each view owns its sessions and streams; none are shared between views.

#![forbid(unsafe_code)]

pub mod actions;
pub mod alert;
pub mod logs;
pub mod object;
pub mod resources;

pub use actions::BuildControls;
pub use alert::{human_kind, Alert, AlertLevel, Alerts};
pub use logs::{AlertingLogSink, LogPane};
pub use object::ObjectView;
pub use resources::ResourceView;
