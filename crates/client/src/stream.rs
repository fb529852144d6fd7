//! Turns a raw byte stream into an ordered stream of decoded debate events.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use agora_session::state::STOPPED_STATUS;
use agora_session::{EventStream, StreamError, StreamEvent};

use crate::sse::{decode_record, RecordBuffer};

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    cancel: CancellationToken,
    buf: RecordBuffer,
    pending: VecDeque<Result<StreamEvent, StreamError>>,
    finished: bool,
}

/// Decode `bytes` into events, preserving arrival order.
///
/// Single attempt, no retries. Termination:
/// - clean end of bytes: any valid trailing record is emitted, then the
///   stream ends with no error;
/// - cancellation: one synthetic "stopped" status, then `Err(Cancelled)`;
/// - transport failure: one synthetic `error` event carrying the failure's
///   message, then `Err(Transport)`.
pub fn decode_events<S, E>(bytes: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        cancel,
        buf: RecordBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            // Drain decoded events before reading more bytes.
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
                chunk = state.bytes.next() => match chunk {
                    Some(Ok(chunk)) => {
                        state.buf.push_chunk(&chunk);
                        while let Some(line) = state.buf.next_line() {
                            match decode_record(&line) {
                                Some(event) => state.pending.push_back(Ok(event)),
                                None if line.is_empty() => {}
                                None => trace!(line = %line, "dropping malformed record"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let message = e.to_string();
                        state.pending.push_back(Ok(StreamEvent::Error {
                            text: message.clone(),
                        }));
                        state.pending.push_back(Err(StreamError::Transport(message)));
                        state.finished = true;
                    }
                    None => {
                        // A trailing record without its final newline still
                        // counts if it decodes.
                        if let Some(trailing) = state.buf.take_trailing() {
                            if let Some(event) = decode_record(&trailing) {
                                state.pending.push_back(Ok(event));
                            }
                        }
                        state.finished = true;
                    }
                },
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::Speaker;
    use std::convert::Infallible;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        let parts: Vec<Result<Bytes, Infallible>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(parts)
    }

    async fn collect(stream: EventStream) -> Vec<Result<StreamEvent, StreamError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_events_decoded_in_order() {
        let bytes = chunks(&[
            "data: {\"type\":\"speaker\",\"node\":\"optimist\",\"text\":\"Round 1/1\"}\n\n",
            "data: {\"type\":\"token\",\"node\":\"optimist\",\"text\":\"Hi\"}\n\n",
            "data: {\"type\":\"speaker_end\",\"node\":\"optimist\"}\n\n",
        ]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::SpeakerStart {
                    node: Speaker::Optimist,
                    text: "Round 1/1".to_string()
                },
                StreamEvent::Token {
                    node: Speaker::Optimist,
                    text: "Hi".to_string()
                },
                StreamEvent::SpeakerEnd {
                    node: Speaker::Optimist
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_record_split_across_chunks() {
        let bytes = chunks(&[
            "data: {\"type\":\"token\",\"node\":\"skep",
            "tic\",\"text\":\"AB\"}\n\n",
        ]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token {
                node: Speaker::Skeptic,
                text: "AB".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_record_tolerated() {
        let bytes = chunks(&[
            "data: {not json}\n\n",
            "data: {\"type\":\"status\",\"text\":\"ok\"}\n\n",
        ]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Status {
                text: "ok".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_trailing_record_at_eof() {
        let bytes = chunks(&["data: {\"type\":\"complete\",\"text\":\"1 round completed\"}"]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Complete { .. }
        ));
    }

    #[tokio::test]
    async fn test_incomplete_trailing_record_dropped() {
        let bytes = chunks(&["data: {\"type\":\"complete\",\"te"]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_emits_status_then_fails() {
        let pending = stream::pending::<Result<Bytes, Infallible>>();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = collect(decode_events(pending, cancel)).await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Status {
                text: STOPPED_STATUS.to_string()
            }
        );
        assert!(events[1].as_ref().unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn test_transport_failure_emits_error_then_fails() {
        #[derive(Debug)]
        struct Broken;
        impl Display for Broken {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "connection reset by peer")
            }
        }
        let bytes = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"status\",\"text\":\"ok\"}\n\n")),
            Err(Broken),
        ]);
        let events = collect(decode_events(bytes, CancellationToken::new())).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Status { .. }
        ));
        assert_eq!(
            events[1].as_ref().unwrap(),
            &StreamEvent::Error {
                text: "connection reset by peer".to_string()
            }
        );
        assert!(matches!(
            events[2].as_ref().unwrap_err(),
            StreamError::Transport(_)
        ));
    }
}
