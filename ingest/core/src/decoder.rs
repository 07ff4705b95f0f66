//! Event Stream Decoder
//!
//! Line-delimited, prefix-tagged wire format:
//!
//! ```text
//! data: {"token":"Hel"}\n
//! data: {"token":"lo"}\n
//! : keep-alive comment\n
//! data: [DONE]\n
//! ```
//!
//! Each event is one line starting with `data: `. A payload of exactly
//! `[DONE]` ends the stream. Bytes are buffered until a newline arrives, so
//! lines (and multi-byte UTF-8 sequences) split across reads are reassembled.
//!
//! Decoding is a fallible pure step: each complete line becomes a
//! [`DecodedLine`]. Malformed lines are logged and skipped; they never end
//! the stream.

use std::collections::HashMap;

/// Prefix that tags every event line
pub const DATA_PREFIX: &str = "data: ";

/// Payload that signals graceful end of stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Minimum buffer capacity for the decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Result of decoding one complete line
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedLine {
    /// A well-formed event payload
    Event(EventFrame),
    /// The `[DONE]` sentinel
    Done,
    /// Blank line or `:` comment, ignored by protocol
    KeepAlive,
    /// Malformed line, dropped
    Skip(SkipReason),
}

/// A decoded event payload
#[derive(Clone, Debug, PartialEq)]
pub struct EventFrame {
    /// Payload text as received (valid JSON)
    pub data: String,
    /// Top-level `"metadata"` object of the payload, if any
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl EventFrame {
    /// Payload length in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Why a line was dropped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Line does not start with `data: `
    MissingPrefix,
    /// Line is not valid UTF-8
    InvalidUtf8,
    /// Payload is not valid JSON
    InvalidPayload(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "missing '{}' prefix", DATA_PREFIX.trim_end()),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::InvalidPayload(e) => write!(f, "unparsable payload: {e}"),
        }
    }
}

/// Decode a single line (without its trailing newline)
#[must_use]
pub fn decode_line(raw: &[u8]) -> DecodedLine {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    let Ok(line) = std::str::from_utf8(raw) else {
        return DecodedLine::Skip(SkipReason::InvalidUtf8);
    };

    if line.trim().is_empty() || line.starts_with(':') {
        return DecodedLine::KeepAlive;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return DecodedLine::Skip(SkipReason::MissingPrefix);
    };

    if payload.trim() == DONE_SENTINEL {
        return DecodedLine::Done;
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => {
            let metadata = value
                .get("metadata")
                .and_then(serde_json::Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
            DecodedLine::Event(EventFrame {
                data: payload.to_string(),
                metadata,
            })
        }
        Err(e) => DecodedLine::Skip(SkipReason::InvalidPayload(e.to_string())),
    }
}

/// Incremental decoder that buffers partial lines between reads
#[derive(Debug)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    /// Set once the sentinel has been decoded; later input is ignored
    finished: bool,
    skipped: u64,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MIN_BUFFER_CAPACITY)
    }

    /// Create a decoder with a specific initial buffer capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.max(MIN_BUFFER_CAPACITY)),
            finished: false,
            skipped: 0,
        }
    }

    /// Bytes held back waiting for a newline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the `[DONE]` sentinel has been seen
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of malformed lines dropped so far
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Append bytes and decode every complete line
    ///
    /// Returns events in arrival order. If the sentinel is found, it is the
    /// last element and any remaining input is discarded.
    pub fn push(&mut self, data: &[u8]) -> Vec<DecodedLine> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.extend_from_slice(data);

        let mut out = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let decoded = decode_line(&self.buffer[consumed..end]);
            consumed = end + 1;

            if self.accept(decoded, &mut out) {
                self.buffer.clear();
                return out;
            }
        }

        self.buffer.drain(..consumed);
        out
    }

    /// Decode any trailing unterminated line at natural end of stream
    pub fn finish(&mut self) -> Vec<DecodedLine> {
        let mut out = Vec::new();
        if self.finished || self.buffer.is_empty() {
            self.buffer.clear();
            return out;
        }

        let rest = std::mem::take(&mut self.buffer);
        let decoded = decode_line(&rest);
        self.accept(decoded, &mut out);
        out
    }

    /// Route a decoded line; returns true when the sentinel ends decoding
    fn accept(&mut self, decoded: DecodedLine, out: &mut Vec<DecodedLine>) -> bool {
        match decoded {
            DecodedLine::KeepAlive => false,
            DecodedLine::Skip(ref reason) => {
                self.skipped += 1;
                tracing::warn!(reason = %reason, "Dropping malformed stream frame");
                false
            }
            DecodedLine::Done => {
                self.finished = true;
                out.push(DecodedLine::Done);
                true
            }
            DecodedLine::Event(_) => {
                out.push(decoded);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(lines: &[DecodedLine]) -> Vec<&str> {
        lines
            .iter()
            .filter_map(|l| match l {
                DecodedLine::Event(frame) => Some(frame.data.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_line_event() {
        match decode_line(br#"data: {"a":1}"#) {
            DecodedLine::Event(frame) => {
                assert_eq!(frame.data, r#"{"a":1}"#);
                assert_eq!(frame.size(), 7);
                assert!(frame.metadata.is_none());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_line_sentinel() {
        assert_eq!(decode_line(b"data: [DONE]"), DecodedLine::Done);
        assert_eq!(decode_line(b"data: [DONE]\r"), DecodedLine::Done);
    }

    #[test]
    fn test_decode_line_keepalive() {
        assert_eq!(decode_line(b""), DecodedLine::KeepAlive);
        assert_eq!(decode_line(b"\r"), DecodedLine::KeepAlive);
        assert_eq!(decode_line(b": ping"), DecodedLine::KeepAlive);
    }

    #[test]
    fn test_decode_line_failures() {
        assert_eq!(
            decode_line(b"event: message"),
            DecodedLine::Skip(SkipReason::MissingPrefix)
        );
        assert_eq!(
            decode_line(&[b'd', b'a', 0xff, 0xfe]),
            DecodedLine::Skip(SkipReason::InvalidUtf8)
        );
        assert!(matches!(
            decode_line(b"data: GARBLED"),
            DecodedLine::Skip(SkipReason::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_line_metadata() {
        match decode_line(br#"data: {"text":"hi","metadata":{"model":"m1"}}"#) {
            DecodedLine::Event(frame) => {
                let metadata = frame.metadata.unwrap();
                assert_eq!(metadata.get("model"), Some(&serde_json::json!("m1")));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_push_split_mid_line() {
        let mut decoder = EventDecoder::new();

        let first = decoder.push(b"data: {\"a\":1}\ndata: {\"b");
        assert_eq!(payloads(&first), vec![r#"{"a":1}"#]);
        assert_eq!(decoder.pending(), 9);

        let second = decoder.push(b"\":2}\n");
        assert_eq!(payloads(&second), vec![r#"{"b":2}"#]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_push_skips_garbled_and_stops_at_sentinel() {
        let wire = b"data: {\"a\":1}\ndata: GARBLED\ndata: {\"b\":2}\ndata: [DONE]\n";
        let (left, right) = wire.split_at(20);

        let mut decoder = EventDecoder::new();
        let mut lines = decoder.push(left);
        lines.extend(decoder.push(right));

        assert_eq!(payloads(&lines), vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert_eq!(lines.last(), Some(&DecodedLine::Done));
        assert_eq!(
            lines.iter().filter(|l| **l == DecodedLine::Done).count(),
            1
        );
        assert_eq!(decoder.skipped(), 1);
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_input_after_sentinel_is_ignored() {
        let mut decoder = EventDecoder::new();
        let lines = decoder.push(b"data: [DONE]\ndata: {\"late\":true}\n");
        assert_eq!(lines, vec![DecodedLine::Done]);
        assert!(decoder.push(b"data: {\"later\":true}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_multibyte_utf8_split_across_reads() {
        let wire = "data: {\"t\":\"héllo\"}\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = wire.iter().position(|&b| b == 0xc3).unwrap() + 1;

        let mut decoder = EventDecoder::new();
        assert!(decoder.push(&wire[..split]).is_empty());
        let lines = decoder.push(&wire[split..]);
        assert_eq!(payloads(&lines), vec!["{\"t\":\"héllo\"}"]);
        assert_eq!(decoder.skipped(), 0);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = EventDecoder::new();
        let lines = decoder.push(b"data: {\"a\":1}\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(payloads(&lines), vec![r#"{"a":1}"#]);
        assert_eq!(lines.last(), Some(&DecodedLine::Done));
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"tail\":1}").is_empty());
        let lines = decoder.finish();
        assert_eq!(payloads(&lines), vec![r#"{"tail":1}"#]);
        assert_eq!(decoder.pending(), 0);
    }
}
