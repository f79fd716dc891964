use bytes::{Buf, BytesMut};

/// Incremental server-sent-events decoder.
///
/// Bytes are fed as they arrive; complete events come out as their joined
/// `data:` payloads. Comments, `event:`, `id:` and `retry:` fields are
/// skipped since the candidate stream only uses `data:`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the payloads of every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(1);

            let text = String::from_utf8_lossy(&raw);
            let line: &str = text.strip_suffix('\r').unwrap_or(&text);

            if line.is_empty() {
                // blank line dispatches the event
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        events
    }

    /// Bytes held back waiting for a line ending.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"type\":\"keepalive\"}\n\n");
        assert_eq!(events, vec![r#"{"type":"keepalive"}"#.to_string()]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"candidate\":").is_empty());
        assert!(decoder.pending() > 0);
        assert!(decoder.feed(b"\"x\"}\n").is_empty());
        let events = decoder.feed(b"\n");
        assert_eq!(events, vec![r#"{"candidate":"x"}"#.to_string()]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": ping\r\nevent: candidate\r\ndata: a\r\ndata: b\r\n\r\ndata:c\r\n\r\n");
        assert_eq!(events, vec!["a\nb".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_blank_lines_without_data_emit_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\n\nid: 7\n\n").is_empty());
    }
}
