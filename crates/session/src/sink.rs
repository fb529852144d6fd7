use async_trait::async_trait;

use agora_core::{DebateSummary, Message, SaveOutcome};

/// Trait for the persistence side of a session.
///
/// Defined here (by the consumer) so the controller can be tested without a
/// backend; the HTTP implementation lives in crates/client. Both operations
/// are fire-and-forget from the state machine's point of view: failures are
/// logged by the caller and never alter session state.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Persist a finished transcript.
    async fn save_session(
        &self,
        topic: &str,
        messages: &[Message],
        max_rounds: u32,
        rounds_completed: u32,
    ) -> Result<SaveOutcome, SinkError>;

    /// Announce a newly saved session to any session-list view.
    async fn notify_new_session(&self, summary: DebateSummary);
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Mock sink recording calls, for controller tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct SaveCall {
        pub topic: String,
        pub messages: Vec<Message>,
        pub max_rounds: u32,
        pub rounds_completed: u32,
    }

    pub struct MockSessionSink {
        saves: Mutex<Vec<SaveCall>>,
        notifications: Mutex<Vec<DebateSummary>>,
        next_result: Mutex<Option<Result<SaveOutcome, SinkError>>>,
    }

    impl MockSessionSink {
        pub fn new() -> Self {
            Self {
                saves: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
                next_result: Mutex::new(None),
            }
        }

        /// Override the result of the next `save_session` call. The default
        /// is a success with id "debate-1".
        pub fn set_next_result(&self, result: Result<SaveOutcome, SinkError>) {
            *self.next_result.lock().unwrap() = Some(result);
        }

        pub fn saves(&self) -> Vec<SaveCall> {
            self.saves.lock().unwrap().clone()
        }

        pub fn notifications(&self) -> Vec<DebateSummary> {
            self.notifications.lock().unwrap().clone()
        }
    }

    impl Default for MockSessionSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SessionSink for MockSessionSink {
        async fn save_session(
            &self,
            topic: &str,
            messages: &[Message],
            max_rounds: u32,
            rounds_completed: u32,
        ) -> Result<SaveOutcome, SinkError> {
            self.saves.lock().unwrap().push(SaveCall {
                topic: topic.to_string(),
                messages: messages.to_vec(),
                max_rounds,
                rounds_completed,
            });
            self.next_result.lock().unwrap().take().unwrap_or(Ok(SaveOutcome {
                success: true,
                debate_id: Some("debate-1".to_string()),
                error: None,
            }))
        }

        async fn notify_new_session(&self, summary: DebateSummary) {
            self.notifications.lock().unwrap().push(summary);
        }
    }
}
