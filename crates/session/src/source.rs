use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use agora_core::DebateRequest;

use crate::event::StreamEvent;

/// Ordered stream of decoded debate events, ending with `Ok` exhaustion on a
/// clean close or exactly one `Err` after any synthetic tail events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, StreamError>> + Send>>;

/// Trait for debate stream sources.
///
/// This trait lives in the session crate (not in crates/client) because it's
/// defined by the consumer (the session controller), not the transport.
/// Implementations live in crates/client or adapter crates.
///
/// Contract: events are delivered strictly in arrival order and are never
/// reordered or dropped except on explicit cancellation. Failures surface as
/// one synthetic event (`status` for cancellation, `error` otherwise)
/// followed by a single `Err` item. No retries.
#[async_trait]
pub trait DebateStream: Send + Sync {
    /// Open a streaming connection for `request`, observing `cancel`.
    ///
    /// Transport-level failures do not fail `open` itself; they are reported
    /// through the returned stream so the caller sees the synthetic event
    /// before the error.
    async fn open(&self, request: &DebateRequest, cancel: CancellationToken) -> EventStream;

    /// Source name for logging/debugging (e.g. "http", "mock").
    fn source_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Cancellation is a distinguished kind: callers render it as an
    /// informational status, never as a user-facing failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

/// Mock stream source for testing the session controller without a backend.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::state::STOPPED_STATUS;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Script {
        /// Yield these items, then end the stream.
        Events(Vec<Result<StreamEvent, StreamError>>),
        /// Yield these items, then stall forever (until cancelled).
        EventsThenSilence(Vec<Result<StreamEvent, StreamError>>),
    }

    /// Returns pre-scripted streams in the order they were queued.
    ///
    /// Every returned stream observes the cancellation token the way the real
    /// reader does: on cancel it emits one synthetic "stopped" status, then
    /// fails with [`StreamError::Cancelled`].
    pub struct MockDebateStream {
        scripts: Mutex<VecDeque<Script>>,
        opened: Mutex<Vec<CancellationToken>>,
    }

    impl MockDebateStream {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(VecDeque::new()),
                opened: Mutex::new(Vec::new()),
            }
        }

        /// Queue a stream that yields `items` and then closes.
        pub fn queue_events(&self, items: Vec<Result<StreamEvent, StreamError>>) {
            self.scripts.lock().unwrap().push_back(Script::Events(items));
        }

        /// Queue a stream that yields `items` and then never yields again.
        pub fn queue_events_then_silence(&self, items: Vec<Result<StreamEvent, StreamError>>) {
            self.scripts
                .lock()
                .unwrap()
                .push_back(Script::EventsThenSilence(items));
        }

        /// Queue a stream that never yields anything (connection-phase stall).
        pub fn queue_silence(&self) {
            self.queue_events_then_silence(Vec::new());
        }

        /// The cancellation token handed to the most recent `open` call.
        pub fn last_cancel(&self) -> Option<CancellationToken> {
            self.opened.lock().unwrap().last().cloned()
        }

        pub fn open_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    impl Default for MockDebateStream {
        fn default() -> Self {
            Self::new()
        }
    }

    struct DriveState {
        inner: EventStream,
        cancel: CancellationToken,
        pending: VecDeque<Result<StreamEvent, StreamError>>,
        finished: bool,
    }

    fn drive(inner: EventStream, cancel: CancellationToken) -> EventStream {
        let state = DriveState {
            inner,
            cancel,
            pending: VecDeque::new(),
            finished: false,
        };
        Box::pin(futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                tokio::select! {
                    biased;
                    _ = state.cancel.cancelled() => {
                        state.pending.push_back(Ok(StreamEvent::Status {
                            text: STOPPED_STATUS.to_string(),
                        }));
                        state.pending.push_back(Err(StreamError::Cancelled));
                        state.finished = true;
                    }
                    item = state.inner.next() => match item {
                        Some(item) => return Some((item, state)),
                        None => return None,
                    },
                }
            }
        }))
    }

    #[async_trait]
    impl DebateStream for MockDebateStream {
        async fn open(&self, _request: &DebateRequest, cancel: CancellationToken) -> EventStream {
            self.opened.lock().unwrap().push(cancel.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Events(Vec::new()));
            let inner: EventStream = match script {
                Script::Events(items) => Box::pin(futures::stream::iter(items)),
                Script::EventsThenSilence(items) => Box::pin(
                    futures::stream::iter(items).chain(futures::stream::pending()),
                ),
            };
            drive(inner, cancel)
        }

        fn source_name(&self) -> &str {
            "mock"
        }
    }
}
