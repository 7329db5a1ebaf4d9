//! Incremental decoder for `text/event-stream` bodies.

/// Splits a byte stream into SSE `data` payloads.
///
/// Bytes are buffered until a full line is available, so frames and multibyte
/// characters may be split arbitrarily across network chunks. Only the `data`
/// field is surfaced; comment lines (keep-alives) and other fields are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every payload completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let buffer = std::mem::take(&mut self.buffer);
        let mut start = 0;
        while let Some(offset) = buffer[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            self.process_line(&buffer[start..end], &mut payloads);
            start = end + 1;
        }
        self.buffer = buffer;
        self.buffer.drain(..start);
        payloads
    }

    /// Flush at end of body. A trailing frame without its blank line still counts.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut payloads);
        }
        self.dispatch(&mut payloads);
        payloads
    }

    fn process_line(&mut self, raw: &[u8], payloads: &mut Vec<String>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            self.dispatch(payloads);
            return;
        }

        let line = String::from_utf8_lossy(raw);
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if !self.data_lines.is_empty() {
            payloads.push(self.data_lines.join("\n"));
            self.data_lines.clear();
        }
    }
}
