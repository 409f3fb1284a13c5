//! Shared SSE buffer management for streaming providers.
//!
//! Raw bytes go in, complete newline-terminated lines come out; a partial
//! trailing line stays buffered until the next chunk completes it.

pub(crate) struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Append raw bytes (lossy UTF-8) to the buffer.
    pub fn push_bytes(&mut self, chunk: &bytes::Bytes) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Extract complete newline-terminated lines from the buffer.
    pub fn extract_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            lines.push(line);
        }
        lines
    }

    /// The remaining (incomplete) data in the buffer.
    pub fn residue(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_complete_lines() {
        let mut buf = SseBuffer::new();
        buf.push_bytes(&bytes::Bytes::from("data: one\ndata: two\n"));
        assert_eq!(buf.extract_lines(), vec!["data: one", "data: two"]);
        assert!(buf.residue().is_empty());
    }

    #[test]
    fn test_partial_line_stays_buffered() {
        let mut buf = SseBuffer::new();
        buf.push_bytes(&bytes::Bytes::from("data: hel"));
        assert!(buf.extract_lines().is_empty());
        assert_eq!(buf.residue(), "data: hel");

        buf.push_bytes(&bytes::Bytes::from("lo\n"));
        assert_eq!(buf.extract_lines(), vec!["data: hello"]);
        assert!(buf.residue().is_empty());
    }
}
