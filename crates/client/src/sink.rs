//! HTTP-backed persistence adapter for the session controller.

use std::sync::Arc;

use async_trait::async_trait;

use agora_core::{DebateSummary, Message, SaveOutcome};
use agora_session::{HistoryCache, SessionSink, SinkError};

use crate::api::{ApiError, DebateClient};

impl From<ApiError> for SinkError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Http { status } => SinkError::Http {
                status,
                message: format!("HTTP {status}"),
            },
            ApiError::Network(message) | ApiError::InvalidResponse(message) => {
                SinkError::Transport(message)
            }
        }
    }
}

/// Saves transcripts through the backend and keeps the shared sidebar cache
/// current. Wired into the controller by the driving layer.
pub struct RemoteSessionSink {
    client: DebateClient,
    history: Arc<HistoryCache>,
}

impl RemoteSessionSink {
    pub fn new(client: DebateClient, history: Arc<HistoryCache>) -> Self {
        Self { client, history }
    }

    /// Prime the sidebar cache from the backend listing.
    pub async fn refresh_history(&self, limit: usize) -> Result<(), ApiError> {
        let recent = self.client.recent_debates(limit).await?;
        self.history.replace_all(recent);
        Ok(())
    }

    pub fn history(&self) -> &Arc<HistoryCache> {
        &self.history
    }
}

#[async_trait]
impl SessionSink for RemoteSessionSink {
    async fn save_session(
        &self,
        topic: &str,
        messages: &[Message],
        max_rounds: u32,
        rounds_completed: u32,
    ) -> Result<SaveOutcome, SinkError> {
        let outcome = self
            .client
            .save_debate(topic, messages, max_rounds, rounds_completed)
            .await?;
        Ok(outcome)
    }

    async fn notify_new_session(&self, summary: DebateSummary) {
        self.history.insert_new(summary);
    }
}
