//! Lookout logs: consume unbounded log streams under memory and render-rate
//! limits.

#![forbid(unsafe_code)]

pub mod coalesce;
pub mod consumer;
pub mod scroll;
pub mod sink;
pub mod view;

pub use coalesce::{Coalescer, LogConfig};
pub use consumer::{LogEnd, LogHandle, LogStreamConsumer};
pub use scroll::AutoScroll;
pub use sink::{LogBatch, LogLine, LogSink};
pub use view::LogView;
