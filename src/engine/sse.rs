//! Incremental Server-Sent Events decoding.
//!
//! Provider streams arrive as arbitrary byte chunks; an event may be split
//! across chunks and a chunk may hold several events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```

use bytes::{Buf, BytesMut};
use serde_json::Value;

/// SSE event types
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Data event with JSON payload
    Data(Value),
    /// Stream complete marker
    Done,
    /// Data that is not valid JSON
    Error(String),
}

/// Buffering SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let raw = self.buffer.split_to(end);
            self.buffer.advance(sep_len);
            if let Some(event) = parse_event(&String::from_utf8_lossy(&raw)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        parse_event(&String::from_utf8_lossy(&raw))
    }
}

/// Position and length of the first blank-line separator.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Parse one event block. Comments and non-data fields are ignored;
/// multiple `data:` lines are joined with newlines.
fn parse_event(block: &str) -> Option<SseEvent> {
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data.is_empty() {
        return None;
    }

    let payload = data.join("\n");
    if payload.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str(&payload) {
        Ok(json) => Some(SseEvent::Data(json)),
        Err(_) => Some(SseEvent::Error(format!("Invalid JSON: {}", payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sse_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec![SseEvent::Data(json!({"a": 1}))]);
    }

    #[test]
    fn test_parse_sse_done_and_comment() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"te").is_empty());
        assert!(decoder.feed(b"xt\":\"hi\"}\r\n").is_empty());
        let events = decoder.feed(b"\r\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Data(json!({"text": "hi"})), SseEvent::Data(json!({"b": 2}))]
        );
    }

    #[test]
    fn test_finish_flushes_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"c\":3}").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Data(json!({"c": 3}))));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_invalid_json() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: not json\n\n");
        assert!(matches!(events[0], SseEvent::Error(_)));
    }
}
