//! Server-Sent Events framer.
//!
//! A stateful, pull-based byte-stream framer, grounded on the teacher's
//! `backend::sse::SseDecoder`, generalized from "OpenAI-compatible `data:`
//! lines only" to the full SSE dialect: `event:`/`id:` fields, comment
//! lines, and the `[DONE]` terminal sentinel that stops the parser rather
//! than merely being skipped.

use crate::error::{CoreError, ErrorKind};

/// One fully-framed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data_lines.is_empty() && self.id.is_none()
    }

    fn finish(self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: self.event,
            data: self.data_lines.join("\n"),
            id: self.id,
        })
    }
}

/// Stateful SSE framer. Carries a residual byte buffer (for UTF-8 sequences
/// split across chunk boundaries) and a pending-event accumulator (:
/// "model as a state machine plus a `next()` operation").
#[derive(Debug)]
pub struct SseParser {
    byte_buffer: Vec<u8>,
    line_buffer: String,
    pending: PendingEvent,
    done: bool,
    offset: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            byte_buffer: Vec::new(),
            line_buffer: String::new(),
            pending: PendingEvent::default(),
            done: false,
            offset: 0,
        }
    }

    /// Whether the `[DONE]` sentinel has already been observed. Once `true`,
    /// further `feed` calls are no-ops.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return any fully-framed events, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.offset += chunk.len();
        let text = self.drain_utf8(chunk);
        self.line_buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.line_buffer.find('\n') {
            let mut line: String = self.line_buffer.drain(..=pos).collect();
            if line.ends_with('\n') {
                line.pop();
            }
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            if self.done {
                break;
            }
        }
        events
    }

    /// Flush any trailing partial event once the stream is known to have
    /// ended (no final blank line arrived).
    pub fn flush(&mut self) -> Option<SseEvent> {
        if self.done {
            return None;
        }
        if !self.line_buffer.is_empty() {
            let remainder = std::mem::take(&mut self.line_buffer);
            self.process_line(&remainder);
        }
        std::mem::take(&mut self.pending).finish()
    }

    /// Returns `true` if `self.done` was set as a result of this line.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.pending.is_empty() {
                return None;
            }
            let finished = std::mem::take(&mut self.pending).finish();
            if let Some(ref ev) = finished {
                if ev.data == "[DONE]" {
                    self.done = true;
                    return None;
                }
            }
            return finished;
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "data" => self.pending.data_lines.push(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    /// Decode as much valid UTF-8 as possible from `byte_buffer + chunk`,
    /// leaving any trailing incomplete sequence buffered for the next call
    /// and substituting invalid interior sequences per the standard rule.
    fn drain_utf8(&mut self, chunk: &[u8]) -> String {
        self.byte_buffer.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.byte_buffer) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.byte_buffer.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.byte_buffer[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push('\u{FFFD}');
                            self.byte_buffer.drain(..valid_up_to + len);
                        }
                        None => {
                            self.byte_buffer.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Wrap an I/O error (from polling the underlying byte stream) as a
/// `Streaming` error annotated with the byte offset the parser had reached.
pub fn io_error(parser: &SseParser, cause: impl std::fmt::Display) -> CoreError {
    CoreError::new(
        ErrorKind::Streaming,
        format!("SSE stream I/O error at byte offset {}: {}", parser.offset, cause),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_data_only_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hello\n\n");
        assert_eq!(events, vec![SseEvent { event: None, data: "hello".into(), id: None }]);
    }

    #[test]
    fn event_and_id_fields_captured() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: message_start\nid: 42\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn multiple_data_lines_joined_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comment_lines_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(b":keep-alive\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn crlf_line_endings_treated_as_lf() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: hi\r\n\r\n");
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn event_with_no_data_lines_is_skipped() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: ping\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn done_sentinel_stops_the_parser() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: a\n\ndata: [DONE]\n\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a");
        assert!(parser.is_done());
    }

    #[test]
    fn partial_utf8_sequence_buffered_across_chunks() {
        let mut parser = SseParser::new();
        let full = "data: caf\u{e9}\n\n".as_bytes().to_vec();
        let split_at = full.len() - 1; // split inside the 2-byte é sequence
        let mut events = parser.feed(&full[..split_at]);
        assert!(events.is_empty());
        events = parser.feed(&full[split_at..]);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn framing_identical_regardless_of_chunk_boundaries() {
        let transcript = b"event: message_start\ndata: {\"id\":\"m1\"}\n\ndata: Hel\n\ndata: lo\n\ndata: [DONE]\n\n";
        let mut whole_parser = SseParser::new();
        let whole = whole_parser.feed(transcript);

        for split in 1..transcript.len() {
            let mut parser = SseParser::new();
            let mut events = parser.feed(&transcript[..split]);
            events.extend(parser.feed(&transcript[split..]));
            assert_eq!(events, whole, "mismatch splitting at byte {split}");
        }
    }

    #[test]
    fn leading_space_after_colon_is_stripped_but_extra_spaces_kept() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data:  two-spaces\n\n");
        assert_eq!(events[0].data, " two-spaces");
    }
}
