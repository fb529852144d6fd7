use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agora_core::{DebateRequest, DebateSummary};

use crate::sink::SessionSink;
use crate::source::{DebateStream, StreamError};
use crate::state::{SessionState, Terminal, SAVED_STATUS, STOPPED_STATUS, TIMEOUT_STATUS};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Called after every fold so the UI layer can re-read authoritative state.
pub type Observer = Box<dyn Fn(&SessionState) + Send + Sync>;

/// Drives one debate session at a time: opens the stream, arms the
/// connection-phase timeout, folds events into [`SessionState`] and persists
/// the transcript on completion.
///
/// Single-session resource policy: the controller owns at most one live
/// request; starting a new run cancels the previous one first.
pub struct SessionController {
    source: Arc<dyn DebateStream>,
    sink: Arc<dyn SessionSink>,
    connect_timeout: Duration,
    observer: Option<Observer>,
    state: SessionState,
    active: Option<CancellationToken>,
}

impl SessionController {
    pub fn new(source: Arc<dyn DebateStream>, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            source,
            sink,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            observer: None,
            state: SessionState::new(),
            active: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&SessionState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run a debate session to its end.
    ///
    /// Cancellation (via `cancel` or the connection timeout) surfaces as a
    /// distinguished [`SessionError`] kind that callers render as an
    /// informational status, not a failure.
    pub async fn run(
        &mut self,
        request: &DebateRequest,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let topic = request.topic.trim().to_string();
        if topic.is_empty() {
            return Err(SessionError::EmptyTopic);
        }
        let request = DebateRequest {
            topic: topic.clone(),
            ..request.clone()
        };

        // Never hold two live requests: cancel any previous one first.
        if let Some(prev) = self.active.take() {
            prev.cancel();
        }

        self.state.begin(&topic);
        self.notify_observer();

        let child = cancel.child_token();
        self.active = Some(child.clone());
        let started = Instant::now();

        info!(topic = %topic, max_rounds = request.max_rounds, source = self.source.source_name(), "starting debate session");
        let mut stream = self.source.open(&request, child.clone()).await;

        let mut awaiting_first = true;
        let mut terminal: Option<Terminal> = None;
        let outcome = loop {
            // The 30s timer guards only the connection phase; the first event
            // of any kind disarms it, after which the stream may run as long
            // as it likes.
            let next = if awaiting_first {
                match tokio::time::timeout(self.connect_timeout, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        child.cancel();
                        self.state.mark_stopped(Some(TIMEOUT_STATUS));
                        break Err(SessionError::ConnectTimeout);
                    }
                }
            } else {
                stream.next().await
            };

            match next {
                Some(Ok(event)) => {
                    if awaiting_first {
                        awaiting_first = false;
                        let elapsed = started.elapsed();
                        debug!(?elapsed, "first event received, timer disarmed");
                        self.state.mark_streaming(elapsed);
                    }
                    if let Some(t) = self.state.apply(&event) {
                        terminal = Some(t);
                    }
                    self.notify_observer();
                }
                Some(Err(e)) if e.is_cancellation() => {
                    self.state.mark_stopped(Some(STOPPED_STATUS));
                    break Err(SessionError::Cancelled);
                }
                Some(Err(e)) => {
                    // The reader already delivered a synthetic error event,
                    // so the status line is in place.
                    self.state.mark_stopped(None);
                    break Err(SessionError::Stream(e));
                }
                None => break Ok(()),
            }
        };
        self.active = None;

        let result = match outcome {
            Ok(()) => match terminal.take() {
                Some(Terminal::Complete(text)) => {
                    let rounds = rounds_completed(&text, request.max_rounds);
                    self.persist(&topic, request.max_rounds, rounds).await;
                    self.state.finish();
                    Ok(SessionOutcome::Completed {
                        rounds_completed: rounds,
                    })
                }
                Some(Terminal::Error(reason)) => {
                    self.state.mark_stopped(None);
                    Ok(SessionOutcome::Failed { reason })
                }
                None => {
                    warn!("stream ended without a terminal event");
                    self.state.mark_stopped(None);
                    Ok(SessionOutcome::Failed {
                        reason: "stream ended unexpectedly".to_string(),
                    })
                }
            },
            Err(e) => Err(e),
        };
        self.notify_observer();
        result
    }

    /// Cancel the active request (if any) and stop the session. Safe to call
    /// repeatedly; a second call on a stopped session does nothing.
    pub fn stop(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
        if self.state.mark_stopped(Some(STOPPED_STATUS)) {
            self.notify_observer();
        }
    }

    /// Cancel the active request (if any) and reset to a pristine idle state.
    pub fn reset(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
        self.state.reset();
        self.notify_observer();
    }

    /// Best-effort save of the finalized transcript. Failures are logged and
    /// never alter session state: the debate itself succeeded even if saving
    /// it did not.
    async fn persist(&mut self, topic: &str, max_rounds: u32, rounds_completed: u32) {
        if self.state.transcript().is_empty() {
            debug!("no messages to save, skipping");
            return;
        }
        let messages = self.state.transcript().to_vec();
        info!(topic = %topic, count = messages.len(), rounds_completed, "saving debate");
        let sink = Arc::clone(&self.sink);
        match sink
            .save_session(topic, &messages, max_rounds, rounds_completed)
            .await
        {
            Ok(outcome) if outcome.success => {
                self.state.set_status(SAVED_STATUS);
                if let Some(id) = outcome.debate_id {
                    sink.notify_new_session(DebateSummary {
                        id,
                        topic: topic.to_string(),
                        created_at: Utc::now(),
                        rounds_completed,
                    })
                    .await;
                }
            }
            Ok(outcome) => {
                warn!(
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "backend rejected save"
                );
            }
            Err(e) => warn!(error = %e, "failed to save debate"),
        }
    }

    fn notify_observer(&self) {
        if let Some(observer) = &self.observer {
            observer(&self.state);
        }
    }
}

/// How a session ended, short of cancellation or transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Stream completed normally; the transcript was saved best-effort.
    Completed { rounds_completed: u32 },
    /// Stream ended with a backend `error` event (or no terminal at all).
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("debate stopped")]
    Cancelled,
    #[error("connection timed out")]
    ConnectTimeout,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl SessionError {
    /// Cancellation and timeout are rendered as status, never as failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Cancelled | SessionError::ConnectTimeout)
    }
}

/// Extract the completed round count from a `complete` event's text
/// ("3 輪" / "3 rounds"), falling back to the requested maximum. Best-effort
/// metadata, not authoritative.
fn rounds_completed(text: &str, default: u32) -> u32 {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(?:輪|round)").expect("static round pattern")
    });
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEvent;
    use crate::sink::mock::MockSessionSink;
    use crate::sink::SinkError;
    use crate::source::mock::MockDebateStream;
    use crate::state::ConnectionPhase;
    use agora_core::{Locale, Message, Node, SaveOutcome, Speaker};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(topic: &str) -> DebateRequest {
        DebateRequest::new(topic)
            .with_max_rounds(1)
            .with_language(Locale::En)
    }

    fn full_debate_script() -> Vec<Result<StreamEvent, StreamError>> {
        vec![
            Ok(StreamEvent::Status {
                text: "connecting".to_string(),
            }),
            Ok(StreamEvent::SpeakerStart {
                node: Speaker::Optimist,
                text: "Round 1/1".to_string(),
            }),
            Ok(StreamEvent::Token {
                node: Speaker::Optimist,
                text: "Hi".to_string(),
            }),
            Ok(StreamEvent::SpeakerEnd {
                node: Speaker::Optimist,
            }),
            Ok(StreamEvent::Complete {
                text: "1 round completed".to_string(),
            }),
        ]
    }

    fn controller(
        source: Arc<MockDebateStream>,
        sink: Arc<MockSessionSink>,
    ) -> SessionController {
        SessionController::new(source, sink)
    }

    #[tokio::test]
    async fn test_end_to_end_session() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(full_debate_script());
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink.clone());

        let outcome = ctl
            .run(&request("X"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Completed { rounds_completed: 1 });

        assert_eq!(
            ctl.state().transcript(),
            &[Message::new(Node::Optimist, "Hi").with_round_label("Round 1/1")]
        );
        assert!(!ctl.state().search().active);
        assert_eq!(ctl.state().phase(), ConnectionPhase::Idle);
        assert_eq!(ctl.state().status(), SAVED_STATUS);

        let saves = sink.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].topic, "X");
        assert_eq!(saves[0].rounds_completed, 1);
        assert_eq!(saves[0].max_rounds, 1);

        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].id, "debate-1");
        assert_eq!(notifications[0].topic, "X");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_when_nothing_arrives() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_silence();
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink.clone());

        let err = ctl
            .run(&request("X"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectTimeout));
        assert!(err.is_cancellation());

        assert_eq!(ctl.state().phase(), ConnectionPhase::Stopped);
        assert_eq!(ctl.state().status(), TIMEOUT_STATUS);
        // The underlying request was aborted.
        assert!(source.last_cancel().unwrap().is_cancelled());
        assert!(sink.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_disarmed_by_first_event() {
        let source = Arc::new(MockDebateStream::new());
        // One early event, then the stream stalls far past the timeout.
        source.queue_events_then_silence(vec![Ok(StreamEvent::Status {
            text: "warming up".to_string(),
        })]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink.clone());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let stopper = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            canceller.cancel();
        };
        let req = request("X");
        let (result, ()) = tokio::join!(ctl.run(&req, cancel), stopper);

        // Stopped by our cancel at t=120s, not by the 30s connect timer.
        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(ctl.state().status(), STOPPED_STATUS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_disarmed_even_by_error_event() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events_then_silence(vec![Ok(StreamEvent::Error {
            text: "early failure".to_string(),
        })]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink.clone());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let stopper = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            canceller.cancel();
        };
        let req = request("X");
        let (result, ()) = tokio::join!(ctl.run(&req, cancel), stopper);
        assert!(matches!(result.unwrap_err(), SessionError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_mid_stream_clears_buffers() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events_then_silence(vec![
            Ok(StreamEvent::SpeakerStart {
                node: Speaker::Optimist,
                text: "Round 1/1".to_string(),
            }),
            Ok(StreamEvent::Token {
                node: Speaker::Optimist,
                text: "half-writ".to_string(),
            }),
        ]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink.clone());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let stopper = async {
            // Let the two events fold first.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            canceller.cancel();
        };
        let req = request("X");
        let (result, ()) = tokio::join!(ctl.run(&req, cancel), stopper);

        assert!(matches!(result.unwrap_err(), SessionError::Cancelled));
        assert_eq!(ctl.state().phase(), ConnectionPhase::Stopped);
        assert_eq!(ctl.state().in_progress(Speaker::Optimist), None);
        assert!(ctl.state().transcript().is_empty());
        assert!(sink.saves().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(full_debate_script());
        let sink = Arc::new(MockSessionSink::new());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let mut ctl = controller(source, sink)
            .with_observer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        ctl.run(&request("X"), CancellationToken::new())
            .await
            .unwrap();

        ctl.stop();
        let after_first = updates.load(Ordering::SeqCst);
        let status = ctl.state().status().to_string();

        ctl.stop();
        assert_eq!(updates.load(Ordering::SeqCst), after_first);
        assert_eq!(ctl.state().status(), status);
    }

    #[tokio::test]
    async fn test_backend_error_event_fails_session() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(vec![Ok(StreamEvent::Error {
            text: "model unavailable".to_string(),
        })]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source, sink.clone());

        let outcome = ctl
            .run(&request("X"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SessionOutcome::Failed {
                reason: "model unavailable".to_string()
            }
        );
        assert_eq!(ctl.state().status(), "Error: model unavailable");
        assert!(sink.saves().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_after_synthetic_event() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(vec![
            Ok(StreamEvent::Error {
                text: "connection reset".to_string(),
            }),
            Err(StreamError::Transport("connection reset".to_string())),
        ]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source, sink.clone());

        let err = ctl
            .run(&request("X"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Stream(StreamError::Transport(_))));
        assert!(!err.is_cancellation());
        // Status comes from the synthetic event, not the stop transition.
        assert_eq!(ctl.state().status(), "Error: connection reset");
    }

    #[tokio::test]
    async fn test_save_failure_does_not_fail_session() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(full_debate_script());
        let sink = Arc::new(MockSessionSink::new());
        sink.set_next_result(Err(SinkError::Transport("backend down".to_string())));
        let mut ctl = controller(source, sink.clone());

        let outcome = ctl
            .run(&request("X"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Completed { rounds_completed: 1 });
        assert!(sink.notifications().is_empty());
        // Transcript untouched by the failed save.
        assert_eq!(ctl.state().transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_save_outcome_skips_notification() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(full_debate_script());
        let sink = Arc::new(MockSessionSink::new());
        sink.set_next_result(Ok(SaveOutcome {
            success: false,
            debate_id: None,
            error: Some("quota exceeded".to_string()),
        }));
        let mut ctl = controller(source, sink.clone());

        ctl.run(&request("X"), CancellationToken::new())
            .await
            .unwrap();
        assert!(sink.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_save() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(vec![Ok(StreamEvent::Complete {
            text: "0 rounds".to_string(),
        })]);
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source, sink.clone());

        ctl.run(&request("X"), CancellationToken::new())
            .await
            .unwrap();
        assert!(sink.saves().is_empty());
    }

    #[tokio::test]
    async fn test_blank_topic_rejected() {
        let source = Arc::new(MockDebateStream::new());
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink);

        let err = ctl
            .run(&request("   "), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EmptyTopic));
        assert_eq!(source.open_count(), 0);
    }

    #[tokio::test]
    async fn test_new_run_cancels_previous_token() {
        let source = Arc::new(MockDebateStream::new());
        source.queue_events(full_debate_script());
        source.queue_events(full_debate_script());
        let sink = Arc::new(MockSessionSink::new());
        let mut ctl = controller(source.clone(), sink);

        ctl.run(&request("first"), CancellationToken::new())
            .await
            .unwrap();
        let first_token = source.last_cancel().unwrap();

        ctl.run(&request("second"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ctl.state().topic(), "second");
        // First session's token was released when the run finished.
        assert!(!first_token.is_cancelled());
        assert_eq!(source.open_count(), 2);
    }

    #[test]
    fn test_rounds_completed_extraction() {
        assert_eq!(rounds_completed("辯論完成，共 3 輪", 5), 3);
        assert_eq!(rounds_completed("Debate complete: 2 rounds", 5), 2);
        assert_eq!(rounds_completed("1 round completed", 5), 1);
        assert_eq!(rounds_completed("all done", 5), 5);
    }
}
