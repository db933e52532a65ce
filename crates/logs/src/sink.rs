use lookout_core::SyncError;
use serde::{Deserialize, Serialize};

/// One log line with its 1-based position in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub number: u64,
    pub text: String,
}

/// Lines released by one coalescer flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    pub lines: Vec<LogLine>,
    /// Set when the renderer should follow the bottom after appending.
    pub scroll_to_bottom: bool,
}

/// Receiver of a log stream. Callbacks run on the stream task and must not
/// block.
pub trait LogSink: Send + Sync {
    fn on_lines(&self, batch: LogBatch);
    /// The stream ended normally.
    fn on_close(&self) {}
    fn on_error(&self, _err: &SyncError) {}
    /// The byte limit was hit; content so far stays, nothing more arrives.
    fn on_limit_reached(&self, _bytes: u64) {}
    /// As many lines as the tail window arrived, so earlier lines may be cut.
    fn on_possibly_truncated(&self) {}
    /// Drop everything rendered so far.
    fn clear(&self) {}
}
