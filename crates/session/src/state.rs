use std::collections::HashMap;
use std::time::Duration;

use agora_core::{Message, Speaker};

use crate::event::StreamEvent;

/// Status line shown when a session is cancelled. Shared with stream readers,
/// which emit it as a synthetic `status` event on cancellation.
pub const STOPPED_STATUS: &str = "Debate stopped";
/// Status line shown when the connection-phase timer fires.
pub const TIMEOUT_STATUS: &str = "Connection timed out";
/// Status line shown after a successful save.
pub const SAVED_STATUS: &str = "Debate saved";
/// Status line shown when a lookup finishes.
pub const SEARCH_DONE_STATUS: &str = "Search complete";
/// Prefix for backend error statuses.
pub const ERROR_PREFIX: &str = "Error: ";

/// First-byte latency below this is not worth surfacing (no cold start).
const SLOW_CONNECT_THRESHOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No active request.
    #[default]
    Idle,
    /// Request issued, waiting for the first event.
    Connecting,
    /// Events are being folded.
    Streaming,
    /// Terminal for the session; in-progress buffers are cleared.
    Stopped,
}

/// Most recent tool lookup activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchStatus {
    pub active: bool,
    pub query: Option<String>,
    pub node: Option<Speaker>,
}

/// A terminal stream event observed during the fold.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Complete(String),
    Error(String),
}

/// Mutable state of one debate session, exclusively owned by its controller.
///
/// `apply` is the reducer: it folds one decoded event into the state and
/// reports terminal events back to the caller. It never blocks and never
/// touches I/O.
#[derive(Debug, Default)]
pub struct SessionState {
    topic: String,
    status: String,
    phase: ConnectionPhase,
    text_buffer: HashMap<Speaker, String>,
    round_label: HashMap<Speaker, String>,
    transcript: Vec<Message>,
    search: SearchStatus,
    first_byte_elapsed: Option<Duration>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a fresh session and enter the connecting phase.
    pub fn begin(&mut self, topic: &str) {
        *self = Self::default();
        self.topic = topic.to_string();
        self.status = "Connecting".to_string();
        self.phase = ConnectionPhase::Connecting;
    }

    /// First event arrived: record latency and enter the streaming phase.
    pub fn mark_streaming(&mut self, first_byte_elapsed: Duration) {
        self.first_byte_elapsed = Some(first_byte_elapsed);
        self.phase = ConnectionPhase::Streaming;
    }

    /// Fold one event into the state per the session reducer table.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<Terminal> {
        match event {
            StreamEvent::Status { text } => {
                self.status = text.clone();
                None
            }
            StreamEvent::SpeakerStart { node, text } => {
                self.text_buffer.insert(*node, String::new());
                self.round_label.insert(*node, text.clone());
                None
            }
            StreamEvent::Token { node, text } => {
                // A token with no preceding `speaker` starts from an empty
                // buffer rather than failing.
                self.text_buffer.entry(*node).or_default().push_str(text);
                None
            }
            StreamEvent::SpeakerEnd { node } => {
                // An empty buffer still finalizes an (empty) message so the
                // transcript stays aligned with the turn count.
                let text = self.text_buffer.remove(node).unwrap_or_default();
                let label = self.round_label.remove(node).filter(|l| !l.is_empty());
                self.transcript.push(Message {
                    node: (*node).into(),
                    text,
                    round_label: label,
                });
                None
            }
            StreamEvent::ToolStart { node, query, .. } => {
                self.search = SearchStatus {
                    active: true,
                    query: Some(query.clone()),
                    node: Some(*node),
                };
                self.status = format!("{node} searching: {query}");
                None
            }
            StreamEvent::ToolEnd { .. } => {
                self.search = SearchStatus::default();
                self.status = SEARCH_DONE_STATUS.to_string();
                None
            }
            StreamEvent::Complete { text } => {
                self.search = SearchStatus::default();
                self.status = text.clone();
                Some(Terminal::Complete(text.clone()))
            }
            StreamEvent::Error { text } => {
                self.search = SearchStatus::default();
                self.status = format!("{ERROR_PREFIX}{text}");
                Some(Terminal::Error(text.clone()))
            }
        }
    }

    /// Stop the session: clear in-progress (not finalized) buffers and enter
    /// the stopped phase. `status` of `None` keeps the current status line.
    ///
    /// Idempotent: returns `false` without touching anything when already
    /// stopped.
    pub fn mark_stopped(&mut self, status: Option<&str>) -> bool {
        if self.phase == ConnectionPhase::Stopped {
            return false;
        }
        self.clear_in_progress();
        if let Some(status) = status {
            self.status = status.to_string();
        }
        self.phase = ConnectionPhase::Stopped;
        true
    }

    /// Normal completion: clear in-progress buffers and return to idle,
    /// keeping the finalized transcript and status for display.
    pub fn finish(&mut self) {
        self.clear_in_progress();
        self.phase = ConnectionPhase::Idle;
    }

    /// Full reset back to the idle state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn clear_in_progress(&mut self) {
        self.text_buffer.clear();
        self.round_label.clear();
        self.search = SearchStatus::default();
    }

    pub(crate) fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// The authoritative transcript, in `speaker_end` arrival order.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn search(&self) -> &SearchStatus {
        &self.search
    }

    /// In-progress text for a speaker, if any.
    pub fn in_progress(&self, node: Speaker) -> Option<&str> {
        self.text_buffer.get(&node).map(String::as_str)
    }

    pub fn round_label(&self, node: Speaker) -> Option<&str> {
        self.round_label.get(&node).map(String::as_str)
    }

    pub fn first_byte_elapsed(&self) -> Option<Duration> {
        self.first_byte_elapsed
    }

    /// First-byte latency, only when it's worth showing (cold start).
    pub fn slow_connection(&self) -> Option<Duration> {
        self.first_byte_elapsed
            .filter(|d| *d > SLOW_CONNECT_THRESHOLD)
    }
}
