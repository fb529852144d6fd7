use agora_core::Speaker;
use serde::{Deserialize, Serialize};

/// Events carried by the debate stream, discriminated by the `type` field.
///
/// The union is closed: a record whose `type` is unknown (or whose `node`
/// falls outside [`Speaker`]) fails to decode and is dropped by the reader
/// as a malformed record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Informational status line.
    Status { text: String },
    /// A speaker begins a turn; `text` carries the round label.
    #[serde(rename = "speaker")]
    SpeakerStart { node: Speaker, text: String },
    /// Incremental text appended to the speaker's active buffer.
    Token { node: Speaker, text: String },
    /// The active turn for `node` is finalized.
    SpeakerEnd { node: Speaker },
    /// The speaker invoked an external lookup.
    ToolStart {
        node: Speaker,
        tool: String,
        query: String,
    },
    /// The lookup finished.
    ToolEnd { node: Speaker, tool: String },
    /// Stream finished normally; `text` may encode the round count.
    Complete { text: String },
    /// Stream finished abnormally with a human-readable reason.
    Error { text: String },
}

impl StreamEvent {
    /// Whether this event ends the stream from the backend's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}
