/// One decoded `event:`/`data:` pairing from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type announced by the most recent `event:` line, if any.
    pub event: Option<String>,
    /// Raw payload of one `data:` line, usually JSON.
    pub data: String,
}

/// Incremental decoder for SSE text streams.
///
/// The backend emits one JSON payload per `data:` line, so frames are cut at
/// line granularity rather than on blank-line boundaries: every complete
/// `data:` line yields a frame paired with the current event type. The last
/// (possibly incomplete) line is held back until more bytes arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    event_type: Option<String>,
}

impl FrameDecoder {
    /// Feed arbitrary bytes into the decoder and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.find('\n') {
            let line = self.buffer[..split].trim_end_matches('\r').to_string();
            self.buffer.drain(0..=split);
            self.consume_line(&line, &mut frames);
        }

        frames
    }

    /// Decode a complete SSE payload string in one shot.
    pub fn decode_all(input: &str) -> Vec<SseFrame> {
        let mut decoder = Self::default();
        decoder.feed(input.as_bytes())
    }

    /// True when no meaningful residue is buffered.
    pub fn is_drained(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    fn consume_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim();
            self.event_type = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let data = value.trim();
            if data.is_empty() {
                return;
            }

            frames.push(SseFrame {
                event: self.event_type.clone(),
                data: data.to_string(),
            });
        }

        // Blank lines, comments, and other SSE fields (id:, retry:) are ignored.
    }
}
