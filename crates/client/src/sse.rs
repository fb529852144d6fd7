//! SSE record splitting and decoding for the debate stream.
//!
//! The wire format is UTF-8 text of `\n`-terminated records, each either
//! blank or `data: <json>`. Records that fail to decode are dropped silently:
//! a record split across network reads shows up as two unparsable halves, and
//! surfacing that as an error would turn normal chunking into failures.

use agora_session::StreamEvent;

pub(crate) const DATA_PREFIX: &str = "data: ";

/// Accumulates raw byte chunks and yields complete lines.
///
/// Bytes stay undecoded until a full line is available: a multi-byte UTF-8
/// character may arrive split across network reads, and decoding chunk by
/// chunk would mangle it into replacement characters.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, with the trailing `\n` (and any `\r`)
    /// stripped. Returns `None` until a full line is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = String::from_utf8_lossy(&self.buf[..pos])
            .trim_end_matches('\r')
            .to_string();
        self.buf.drain(..=pos);
        Some(line)
    }

    /// Whatever is left at end-of-stream: a record that never got its final
    /// newline. Decoded once more by the caller, dropped if incomplete.
    pub fn take_trailing(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let trailing = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(trailing)
    }
}

/// Decode a single record line into an event.
///
/// Returns `None` for blank lines, lines without the `data: ` prefix, and
/// payloads that are not valid JSON for the event union (malformed-record
/// tolerance).
pub fn decode_record(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    serde_json::from_str(payload).ok()
}
