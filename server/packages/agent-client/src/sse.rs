/// Incremental decoder for an SSE byte stream. Collects `data:` lines and
/// flushes one payload per blank-line event boundary; chunk boundaries may fall
/// anywhere, including mid-line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();
        // Everything up to the last newline is complete lines; the remainder
        // stays buffered until the next chunk.
        let complete_end = match self.buffer.rfind('\n') {
            Some(pos) => pos + 1,
            None => return payloads,
        };
        let complete: String = self.buffer.drain(..complete_end).collect();
        for raw in complete.split_inclusive('\n') {
            match raw.trim_end_matches(&['\n', '\r'][..]) {
                "" => {
                    if !self.data_lines.is_empty() {
                        payloads.push(self.data_lines.join("\n"));
                        self.data_lines.clear();
                    }
                }
                line => self.accept_line(line),
            }
        }
        payloads
    }

    /// Flush a trailing event that was never terminated by a blank line. Some
    /// servers close the connection right after the last `data:` line.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buffer);
        self.accept_line(tail.trim_end_matches('\r'));
        if self.data_lines.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_lines).join("\n"))
        }
    }

    fn accept_line(&mut self, line: &str) {
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines.push(data.trim_start().to_string());
        }
    }
}
