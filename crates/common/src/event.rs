//! Events yielded to callers while a turn is in flight.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Progress text emitted while the orchestrator waits on a remote agent.
pub const PROCESSING_UPDATE: &str = "The orchestrator agent is processing your query...";

/// One item of the inbound `stream` sequence.
///
/// A turn yields zero or more progress events followed by exactly one
/// completion event carrying the final formatted text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TurnEvent {
    #[serde(rename = "is_task_complete")]
    pub is_complete: bool,

    #[serde(alias = "updates")]
    pub content: String,
}

impl TurnEvent {
    pub fn progress(update: impl Into<String>) -> Self {
        Self {
            is_complete: false,
            content: update.into(),
        }
    }

    pub fn processing() -> Self {
        Self::progress(PROCESSING_UPDATE)
    }

    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            is_complete: true,
            content: content.into(),
        }
    }
}

// Progress events carry their text under `updates`, completion under `content`.
impl Serialize for TurnEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("is_task_complete", &self.is_complete)?;
        let key = if self.is_complete { "content" } else { "updates" };
        map.serialize_entry(key, &self.content)?;
        map.end()
    }
}

/// Generate a fresh UUID v4 string.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_serializes_under_updates() {
        let json = serde_json::to_value(TurnEvent::processing()).unwrap();
        assert_eq!(json["is_task_complete"], false);
        assert_eq!(json["updates"], PROCESSING_UPDATE);
        assert!(json.get("content").is_none());
    }

    #[test]
    fn completion_serializes_under_content() {
        let json = serde_json::to_value(TurnEvent::complete("done")).unwrap();
        assert_eq!(json["is_task_complete"], true);
        assert_eq!(json["content"], "done");
    }

    #[test]
    fn deserializes_either_key() {
        let progress: TurnEvent =
            serde_json::from_str(r#"{"is_task_complete": false, "updates": "working"}"#).unwrap();
        assert_eq!(progress, TurnEvent::progress("working"));

        let done: TurnEvent =
            serde_json::from_str(r#"{"is_task_complete": true, "content": "ok"}"#).unwrap();
        assert_eq!(done, TurnEvent::complete("ok"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
