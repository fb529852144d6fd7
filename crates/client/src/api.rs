//! HTTP client for the debate backend.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use agora_core::config::ApiConfig;
use agora_core::{DebateDetail, DebateRequest, DebateSummary, Message, Paginated, SaveOutcome};
use agora_session::state::STOPPED_STATUS;
use agora_session::{DebateStream, EventStream, StreamError, StreamEvent};

use crate::stream::decode_events;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}")]
    Http { status: u16 },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}

/// Client for the debate backend API.
///
/// One instance serves both the streaming endpoint and the plain JSON
/// endpoints. The request timeout applies to the plain calls only; the
/// stream must be allowed to run for as long as the debate does.
#[derive(Clone)]
pub struct DebateClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl DebateClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        let mut client = Self::new(config.base_url.clone());
        client.request_timeout = Duration::from_secs(config.request_timeout_secs);
        client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`: liveness via HTTP status only.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }

    /// `POST /debate/save`: persist a finished transcript.
    pub async fn save_debate(
        &self,
        topic: &str,
        messages: &[Message],
        max_rounds: u32,
        rounds_completed: u32,
    ) -> Result<SaveOutcome, ApiError> {
        let url = format!("{}/debate/save", self.base_url);
        let body = json!({
            "topic": topic,
            "messages": messages,
            "max_rounds": max_rounds,
            "rounds_completed": rounds_completed,
        });
        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// `GET /debate/history?limit=N`: recent debates for the sidebar.
    pub async fn recent_debates(&self, limit: usize) -> Result<Vec<DebateSummary>, ApiError> {
        #[derive(Deserialize)]
        struct RecentDebates {
            #[serde(default)]
            debates: Vec<DebateSummary>,
        }

        let url = format!("{}/debate/history?limit={limit}", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        let listing: RecentDebates = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(listing.debates)
    }

    /// `GET /debate/history/list?page=P&page_size=S`: paginated listing.
    pub async fn debates_paginated(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Paginated<DebateSummary>, ApiError> {
        let url = format!(
            "{}/debate/history/list?page={page}&page_size={page_size}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// `GET /debate/history/{id}`: full stored transcript; `None` on 404.
    pub async fn debate_detail(&self, id: &str) -> Result<Option<DebateDetail>, ApiError> {
        let url = format!("{}/debate/history/{id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        let detail = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(Some(detail))
    }
}

/// A stream that reports a failure the reader's way: one synthetic event,
/// then the error.
fn failure_stream(event: StreamEvent, err: StreamError) -> EventStream {
    Box::pin(stream::iter(vec![Ok(event), Err(err)]))
}

fn stopped_stream() -> EventStream {
    failure_stream(
        StreamEvent::Status {
            text: STOPPED_STATUS.to_string(),
        },
        StreamError::Cancelled,
    )
}

#[async_trait]
impl DebateStream for DebateClient {
    /// `POST /debate`: open the SSE stream. Best-effort single attempt;
    /// failures surface through the returned stream, never as retries.
    async fn open(&self, request: &DebateRequest, cancel: CancellationToken) -> EventStream {
        let url = format!("{}/debate", self.base_url);
        debug!(url = %url, topic = %request.topic, "opening debate stream");

        let send = self.http.post(&url).json(request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return stopped_stream(),
            result = send => match result {
                Ok(response) => response,
                Err(e) => {
                    let message = e.to_string();
                    warn!(error = %message, "debate stream connection failed");
                    return failure_stream(
                        StreamEvent::Error { text: message.clone() },
                        StreamError::Transport(message),
                    );
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            let message = format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("request failed")
            );
            warn!(status = status.as_u16(), "debate stream rejected");
            return failure_stream(
                StreamEvent::Error {
                    text: message.clone(),
                },
                StreamError::Http {
                    status: status.as_u16(),
                    message,
                },
            );
        }

        decode_events(response.bytes_stream(), cancel)
    }

    fn source_name(&self) -> &str {
        "http"
    }
}
