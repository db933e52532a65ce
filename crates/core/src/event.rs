//! Watch event wire codec: one JSON object `{type, object}` per line.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub object: Resource,
}

impl WatchEvent {
    pub fn added(object: Resource) -> Self { Self { kind: EventType::Added, object } }
    pub fn modified(object: Resource) -> Self { Self { kind: EventType::Modified, object } }
    pub fn deleted(object: Resource) -> Self { Self { kind: EventType::Deleted, object } }
}

/// A decoded line of a watch feed.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchFrame {
    Event(WatchEvent),
    /// Progress marker carrying only a resource version.
    Bookmark(Option<String>),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: serde_json::Value,
}

/// Decode one frame.
///
/// Malformed JSON and unknown event types yield [`SyncError::Parse`], which
/// drops only this frame. An `ERROR` frame means the server gave up on the
/// watch (typically an expired resource version) and yields
/// [`SyncError::Transport`] so the caller re-lists.
pub fn decode_frame(line: &[u8]) -> SyncResult<WatchFrame> {
    let raw: RawFrame =
        serde_json::from_slice(line).map_err(|e| SyncError::Parse(format!("watch frame: {}", e)))?;
    let kind = match raw.kind.as_str() {
        "ADDED" => EventType::Added,
        "MODIFIED" => EventType::Modified,
        "DELETED" => EventType::Deleted,
        "BOOKMARK" => {
            let rv = raw
                .object
                .get("metadata")
                .and_then(|m| m.get("resourceVersion"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            return Ok(WatchFrame::Bookmark(rv));
        }
        "ERROR" => {
            let msg = raw.object.get("message").and_then(|v| v.as_str()).unwrap_or("watch error");
            let code = raw.object.get("code").and_then(|v| v.as_u64()).unwrap_or(0);
            return Err(SyncError::Transport(format!("{} (code {})", msg, code)));
        }
        other => return Err(SyncError::Parse(format!("unknown watch event type: {}", other))),
    };
    let object = Resource::from_value(raw.object)?;
    Ok(WatchFrame::Event(WatchEvent { kind, object }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_added_event() {
        let line = br#"{"type":"ADDED","object":{"kind":"Pod","metadata":{"name":"web","uid":"u1","labels":{"app":"web"}}}}"#;
        match decode_frame(line).expect("frame") {
            WatchFrame::Event(ev) => {
                assert_eq!(ev.kind, EventType::Added);
                assert_eq!(ev.object.name(), "web");
                assert_eq!(ev.object.metadata.labels.get("app").map(String::as_str), Some("web"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn bookmark_carries_resource_version() {
        let line = br#"{"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"77"}}}"#;
        assert_eq!(decode_frame(line).expect("frame"), WatchFrame::Bookmark(Some("77".into())));
    }

    #[test]
    fn error_frame_is_a_transport_failure() {
        let line = br#"{"type":"ERROR","object":{"kind":"Status","code":410,"message":"too old resource version"}}"#;
        assert!(matches!(decode_frame(line), Err(SyncError::Transport(m)) if m.contains("410")));
    }

    #[test]
    fn malformed_frames_are_parse_errors() {
        assert!(matches!(decode_frame(b"{\"type\":"), Err(SyncError::Parse(_))));
        assert!(matches!(decode_frame(br#"{"type":"RENAMED","object":{}}"#), Err(SyncError::Parse(_))));
        assert!(matches!(
            decode_frame(br#"{"type":"ADDED","object":{"metadata":{"labels":[1,2]}}}"#),
            Err(SyncError::Parse(_))
        ));
    }
}
