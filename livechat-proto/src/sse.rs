//! Incremental decoder for `text/event-stream` framing.
//!
//! The server-push connection arrives as arbitrary byte chunks. The decoder
//! buffers partial lines and yields one [`SseFrame`] per blank-line
//! terminated block. Comment lines (`:` prefix) are keep-alives and are
//! skipped. Lines longer than [`MAX_LINE_BYTES`] are dropped whole.

/// Longest line the decoder will buffer.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// Value of the `id:` field, if present.
    pub id: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Buffers byte chunks and splits them into [`SseFrame`]s.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    /// Set while skipping the tail of an oversized line.
    discarding: bool,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes and returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = self.scanned + offset;
            self.scanned = end + 1;
            let line = &buffer[start..end];
            start = end + 1;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    bytes = line.len(),
                    limit = MAX_LINE_BYTES,
                    "dropping oversized event-stream line"
                );
                continue;
            }
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(frame) = self.process_line(&String::from_utf8_lossy(line)) {
                frames.push(frame);
            }
        }

        buffer.drain(..start);
        self.scanned = buffer.len();
        if buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                bytes = buffer.len(),
                limit = MAX_LINE_BYTES,
                "dropping oversized event-stream line"
            );
            buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        self.buffer = buffer;
        frames
    }

    /// Flushes a trailing frame when the stream ends without a final blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if !std::mem::take(&mut self.discarding) && !rest.is_empty() {
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
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
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            // `retry` and unknown fields carry nothing we act on.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            self.id = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            id: self.id.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
