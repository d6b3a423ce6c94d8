//! Incremental decoder for `text/event-stream` bodies.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server did not send one.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Feeds raw body chunks in, gets complete events out.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete
/// lines are decoded. Lines end with LF, CRLF or a bare CR.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((len, terminator)) = self.next_line() {
            let line: Vec<u8> = self.buffer.drain(..len + terminator).take(len).collect();
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Length of the next complete line and of its terminator (LF, CRLF or CR).
    ///
    /// A trailing CR waits for the next chunk, which may start with its LF.
    fn next_line(&self) -> Option<(usize, usize)> {
        let pos = self
            .buffer
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')?;
        if self.buffer[pos] == b'\n' {
            return Some((pos, 1));
        }
        match self.buffer.get(pos + 1) {
            None => None,
            Some(b'\n') => Some((pos, 2)),
            Some(_) => Some((pos, 1)),
        }
    }

    /// Flushes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }

        let data = self.data.join("\n");
        self.data.clear();

        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn decodes_named_events() {
        let events = decode_all(&[b"event: output\ndata: Wear \n\nevent: done\ndata: {}\n\n"]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "output");
        assert_eq!(events[0].data, "Wear ");
        assert_eq!(events[1].event, "done");
        assert_eq!(events[1].data, "{}");
    }

    #[test]
    fn survives_arbitrary_chunk_boundaries() {
        let body = b"event: output\r\ndata: a co\r\n\r\nevent: output\r\ndata: at.\r\n\r\n";
        for split in 1..body.len() {
            let (a, b) = body.split_at(split);
            let events = decode_all(&[a, b]);
            let text: String = events.iter().map(|e| e.data.as_str()).collect();
            assert_eq!(text, "a coat.", "split at {split}");
        }
    }

    #[test]
    fn bare_carriage_returns_end_lines() {
        let events = decode_all(&[b"event: output\rdata: Wear \r\r", b"data: a coat.\r\r"]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "output");
        assert_eq!(events[0].data, "Wear ");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "a coat.");
    }

    #[test]
    fn joins_multi_line_data() {
        let events = decode_all(&[b"data: line one\ndata: line two\n\n"]);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let events = decode_all(&[b": keep-alive\nretry: 1000\nid: 7\ndata: x\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn keeps_utf8_split_across_chunks() {
        let body = "data: 10°C\n\n".as_bytes();
        let split = body.iter().position(|b| *b == 0xC2).unwrap() + 1;
        let events = decode_all(&[&body[..split], &body[split..]]);
        assert_eq!(events[0].data, "10°C");
    }

    #[test]
    fn flushes_unterminated_event_at_end_of_body() {
        let events = decode_all(&[b"event: output\ndata: tail"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }
}
