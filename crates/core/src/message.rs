use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A debate participant as emitted by the stream.
///
/// The stream only ever names one of these three; locally generated status
/// messages use [`Node::System`] instead, which is deliberately not part of
/// this enum so that a record claiming `node: "system"` fails to decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Optimist,
    Skeptic,
    Moderator,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Optimist => write!(f, "optimist"),
            Speaker::Skeptic => write!(f, "skeptic"),
            Speaker::Moderator => write!(f, "moderator"),
        }
    }
}

/// Origin of a transcript message: a debate speaker or the local system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Optimist,
    Skeptic,
    Moderator,
    System,
}

impl From<Speaker> for Node {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::Optimist => Node::Optimist,
            Speaker::Skeptic => Node::Skeptic,
            Speaker::Moderator => Node::Moderator,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Optimist => write!(f, "optimist"),
            Node::Skeptic => write!(f, "skeptic"),
            Node::Moderator => write!(f, "moderator"),
            Node::System => write!(f, "system"),
        }
    }
}

/// Backend language selection for a debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    #[serde(rename = "zh")]
    Zh,
    #[serde(rename = "en")]
    En,
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::Zh => write!(f, "zh"),
            Locale::En => write!(f, "en"),
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zh" => Ok(Locale::Zh),
            "en" => Ok(Locale::En),
            other => Err(format!("unknown locale: {other}")),
        }
    }
}

/// Parameters for starting a debate stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRequest {
    pub topic: String,
    pub max_rounds: u32,
    pub language: Locale,
}

impl DebateRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_rounds: 3,
            language: Locale::default(),
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_language(mut self, language: Locale) -> Self {
        self.language = language;
        self
    }
}

/// A finalized transcript message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub node: Node,
    pub text: String,
    /// Round/turn label carried by the `speaker` event (e.g. "Round 1/3").
    #[serde(rename = "roundInfo", skip_serializing_if = "Option::is_none")]
    pub round_label: Option<String>,
}

impl Message {
    pub fn new(node: impl Into<Node>, text: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            text: text.into(),
            round_label: None,
        }
    }

    pub fn with_round_label(mut self, label: impl Into<String>) -> Self {
        self.round_label = Some(label.into());
        self
    }
}

/// Lightweight debate summary (sidebar / listings).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateSummary {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub rounds_completed: u32,
}

/// A stored transcript message as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(rename = "roundInfo", default)]
    pub round_label: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Full stored debate, messages included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateDetail {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rounds_completed: u32,
    pub max_rounds: u32,
    pub messages: Vec<StoredMessage>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Result of a save call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(default)]
    pub debate_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
