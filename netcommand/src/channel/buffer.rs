//! Accumulation buffer for an unframed shell byte stream.
//!
//! Bytes are appended as they arrive. A row cursor remembers how much of the
//! buffer has already been handed to the row classifier, so each line is
//! classified exactly once even though the buffer itself keeps growing.

use std::borrow::Cow;

use memchr::{memchr_iter, memrchr};

/// One line of device output that has not been classified yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Trimmed text of the line.
    pub text: String,

    /// Buffer offset just past this line (past the `\n` for complete rows).
    pub end: usize,

    /// Whether the line was newline-terminated.
    pub complete: bool,
}

/// Buffer for accumulating shell output.
#[derive(Debug)]
pub struct LineBuffer {
    /// Everything received since the command was sent.
    buffer: Vec<u8>,

    /// Offset of the first byte not yet consumed by the row classifier.
    cursor: usize,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            cursor: 0,
        }
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Whether the buffer ends with `prompt`, optionally followed by one space.
    pub fn ends_with_prompt(&self, prompt: &str) -> bool {
        let prompt = prompt.as_bytes();
        if self.buffer.ends_with(prompt) {
            return true;
        }
        self.buffer
            .strip_suffix(b" ")
            .is_some_and(|rest| rest.ends_with(prompt))
    }

    /// Rows after the cursor, in arrival order.
    ///
    /// Complete lines come first; a trailing fragment without a newline is
    /// returned last with `complete == false`. Empty rows are included so the
    /// caller can consume them.
    pub fn rows(&self) -> Vec<Row> {
        let pending = &self.buffer[self.cursor..];
        let mut rows = Vec::new();
        let mut start = 0;

        for newline in memchr_iter(b'\n', pending) {
            rows.push(Row {
                text: decode_row(&pending[start..newline]),
                end: self.cursor + newline + 1,
                complete: true,
            });
            start = newline + 1;
        }

        if start < pending.len() {
            rows.push(Row {
                text: decode_row(&pending[start..]),
                end: self.buffer.len(),
                complete: false,
            });
        }

        rows
    }

    /// Mark everything before `end` as classified.
    pub fn consume_to(&mut self, end: usize) {
        self.cursor = end.min(self.buffer.len()).max(self.cursor);
    }

    /// The response body: bytes from `skip` up to the last newline.
    ///
    /// `skip` covers the echoed command, the last line is the prompt.
    pub fn body(&self, skip: usize) -> String {
        match memrchr(b'\n', &self.buffer) {
            Some(last) if last > skip => {
                String::from_utf8_lossy(&self.buffer[skip..last]).into_owned()
            }
            _ => String::new(),
        }
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset the cursor.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_row(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
