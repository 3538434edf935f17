//! Incremental Server-Sent Events decoder.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder::feed`] buffers partial
//! lines and returns every event completed by the chunk. Comment lines
//! (`:connected`, `:heartbeat`) are skipped.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field; `None` means the default channel.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    // ---- private helpers ----

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            tracing::trace!(comment = &line[1..], "SSE comment");
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // `id` and `retry` only matter for browser auto-reconnect.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take().filter(|e| !e.is_empty());
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_skipped() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b":connected\n\n:heartbeat\n\n").is_empty());
    }

    #[test]
    fn data_frame_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: {\"action\":").is_empty());
        let frames = dec.feed(b"\"refresh_all\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"action":"refresh_all"}"#);
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn named_event_and_crlf() {
        let mut dec = SseDecoder::new();
        let frames = dec.feed(b"event: status\r\ndata: a\r\ndata: b\r\n\r\ndata: c\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: Some("status".into()),
                    data: "a\nb".into()
                },
                SseFrame {
                    event: None,
                    data: "c".into()
                },
            ]
        );
    }

    #[test]
    fn unterminated_event_is_not_dispatched() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: partial\n").is_empty());
    }
}
