//! Tolerant text extraction from agent responses.
//!
//! Agents answer in several shapes: artifacts with text or structured data
//! parts, a direct `text` field, a message list, or a status message. The
//! extractor scans every known path in a fixed order and keeps all fragments
//! it finds, so no shape is treated as the single source of truth.

use serde_json::Value;

use crate::protocol::RawAgentResponse;

/// Returned in place of an empty answer so downstream stages never see "".
pub const NO_RESPONSE: &str = "No response from agent";

/// Prefix for structured data parts rendered as text.
pub const DATA_LABEL: &str = "Extracted data:";

/// The response path a fragment was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentSource {
    ArtifactText,
    ArtifactData,
    ArtifactString,
    ResultText,
    MessageText,
    StatusMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub source: FragmentSource,
    pub text: String,
}

/// Text collected from a response, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedAnswer {
    fragments: Vec<Fragment>,
}

impl ExtractedAnswer {
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Newline-joined fragments, or [`NO_RESPONSE`] when there are none.
    pub fn text(&self) -> String {
        if self.fragments.is_empty() {
            return NO_RESPONSE.to_string();
        }
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, source: FragmentSource, text: impl Into<String>) {
        self.fragments.push(Fragment {
            source,
            text: text.into(),
        });
    }
}

/// Pull every recognizable text fragment out of `raw`.
pub fn extract(raw: &RawAgentResponse) -> ExtractedAnswer {
    let mut answer = ExtractedAnswer::default();
    let Some(result) = raw.result() else {
        return answer;
    };

    for part in result
        .get("artifacts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|artifact| artifact.get("parts").and_then(Value::as_array))
        .flatten()
    {
        read_artifact_part(part, &mut answer);
    }

    if let Some(text) = non_empty_text(result) {
        answer.push(FragmentSource::ResultText, text);
    }

    for message in result
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(text) = non_empty_text(message) {
            answer.push(FragmentSource::MessageText, text);
        }
    }

    for part in result
        .pointer("/status/message/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(text) = non_empty_text(part) {
            answer.push(FragmentSource::StatusMessage, text);
        }
    }

    answer
}

fn read_artifact_part(part: &Value, answer: &mut ExtractedAnswer) {
    match part {
        Value::String(s) => answer.push(FragmentSource::ArtifactString, s.clone()),
        // `kind: "text"` parts carry their payload in `text` and land in the first arm.
        Value::Object(_) => {
            if let Some(text) = non_empty_text(part) {
                answer.push(FragmentSource::ArtifactText, text);
            } else if let Some(data) = part.get("data").filter(|d| has_content(d)) {
                let rendered =
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
                answer.push(
                    FragmentSource::ArtifactData,
                    format!("{DATA_LABEL}\n{rendered}"),
                );
            }
        }
        _ => {}
    }
}

fn non_empty_text(value: &Value) -> Option<&str> {
    value
        .get("text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}
