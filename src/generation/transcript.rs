//! Rendering of chat history into the plain-text transcript sent to the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GenerationError;
use crate::livechat::message_window::Message;

/// Rendered when there is no history at all
pub const EMPTY_TRANSCRIPT: &str = "Keine Nachrichten vorhanden.";

/// Author shown for entries without an owner
pub const UNKNOWN_OWNER: &str = "unbekannt";

/// The parts of a message the transcript needs. Every field is optional because the
/// endpoint accepts whatever the caller sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            owner: Some(message.payload.owner.clone()),
            text: Some(message.payload.text.clone()),
            timestamp: Some(message.payload.timestamp),
        }
    }
}

/// Text of a field for the transcript. Only `null` and a missing field count as
/// absent; strings are taken as is and every other value as its JSON text.
fn field_text(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads entries from an untrusted JSON value. Anything that is not an array yields no
/// entries. Elements that are not objects have no fields; a `null` element is rejected.
pub fn entries_from_value(value: &Value) -> Result<Vec<TranscriptEntry>, GenerationError> {
    let Some(items) = value.as_array() else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if item.is_null() {
                return Err(GenerationError::InvalidRequest(format!(
                    "message {} is null",
                    index
                )));
            }
            Ok(TranscriptEntry {
                owner: field_text(item, "owner"),
                text: field_text(item, "text"),
                timestamp: item.get("timestamp").and_then(Value::as_i64),
            })
        })
        .collect()
}

/// One `- <owner>: <text>` line per entry, joined by newlines
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    if entries.is_empty() {
        return EMPTY_TRANSCRIPT.to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "- {}: {}",
                entry.owner.as_deref().unwrap_or(UNKNOWN_OWNER),
                entry.text.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The user turn wrapping the transcript
pub fn user_prompt(transcript: &str) -> String {
    format!(
        "Bisherige Nachrichten:\n{}\n\nGib eine kurze, sarkastische Antwort.",
        transcript
    )
}
