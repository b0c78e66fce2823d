use crate::models::event::{BlockEvent, generate_block_id};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

/// Buffered characters without a decodable value before salvage kicks in
pub const SALVAGE_BUFFER_THRESHOLD: usize = 10_000;

lazy_static! {
    static ref JSON_FENCE: Regex = Regex::new(r"(?i)```json\s*").expect("valid fence pattern");
    static ref BARE_FENCE: Regex = Regex::new(r"```\s*").expect("valid fence pattern");
}

/// Remove markdown code fence markers that models wrap around JSON output
pub fn strip_markdown_fences(text: &str) -> String {
    let without_json = JSON_FENCE.replace_all(text, "");
    BARE_FENCE.replace_all(&without_json, "").into_owned()
}

/// Stateful parser that reassembles JSON values from arbitrarily split text.
///
/// Every complete value at the head of the buffer is decoded as soon as its
/// last token arrives. When the buffer grows past the salvage threshold
/// without yielding a value, its contents are released as a partial text
/// block so nothing is lost and memory stays bounded.
pub struct IncrementalJsonParser {
    buffer: String,
    salvage_threshold: usize,
    salvaged: u64,
}

impl IncrementalJsonParser {
    pub fn new() -> Self {
        Self::with_threshold(SALVAGE_BUFFER_THRESHOLD)
    }

    pub fn with_threshold(salvage_threshold: usize) -> Self {
        Self {
            buffer: String::with_capacity(1024),
            salvage_threshold,
            salvaged: 0,
        }
    }

    /// Feed a text fragment and extract every complete JSON value
    pub fn push(&mut self, fragment: &str) -> Vec<Value> {
        let cleaned = strip_markdown_fences(fragment);
        self.buffer.push_str(&cleaned);

        let mut values = self.extract_values();

        if self.needs_salvage() {
            tracing::warn!(
                size = self.buffer.len(),
                threshold = self.salvage_threshold,
                "Parser buffer exceeded salvage threshold without a JSON value"
            );
            values.extend(self.salvage());
        }

        values
    }

    /// Release whatever is still buffered, at end of stream
    pub fn flush(&mut self) -> Vec<Value> {
        let mut values = self.extract_values();
        values.extend(self.salvage());
        values
    }

    fn extract_values(&mut self) -> Vec<Value> {
        let mut values = Vec::new();

        loop {
            self.skip_whitespace();

            if self.buffer.is_empty() {
                break;
            }

            let decoded = {
                let mut stream =
                    serde_json::Deserializer::from_str(&self.buffer).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => Some((value, stream.byte_offset())),
                    // Incomplete or not JSON yet, wait for more input
                    Some(Err(_)) | None => None,
                }
            };

            match decoded {
                Some((value, consumed)) => {
                    self.buffer.drain(..consumed);
                    values.push(value);
                }
                None => break,
            }
        }

        values
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.buffer.len() - self.buffer.trim_start().len();
        if trimmed > 0 {
            self.buffer.drain(..trimmed);
        }
    }

    /// Whether the buffer has grown too large without yielding a value
    pub fn needs_salvage(&self) -> bool {
        // Byte length bounds the char count from above, so check it first
        self.buffer.len() > self.salvage_threshold
            && self.buffer.chars().count() > self.salvage_threshold
    }

    /// Emit the buffer as a partial text block and clear it
    fn salvage(&mut self) -> Vec<Value> {
        let content = self.buffer.trim().to_string();
        self.buffer.clear();

        if content.is_empty() {
            return Vec::new();
        }

        self.salvaged += 1;
        let block_id = generate_block_id("salvaged");
        tracing::debug!(block_id = %block_id, size = content.len(), "Salvaged parser buffer as text");

        vec![
            BlockEvent::start(block_id.clone(), "text").to_value(),
            BlockEvent::delta(block_id.clone(), "content", content).to_value(),
            BlockEvent::end(block_id, true).to_value(),
        ]
    }

    /// Number of buffers released as text so far
    pub fn salvage_count(&self) -> u64 {
        self.salvaged
    }

    /// Get the current size of buffered data
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Reset the parser state
    pub fn reset(&mut self) {
        self.buffer.clear();
        if self.buffer.capacity() > 65536 {
            self.buffer = String::with_capacity(1024);
        }
    }
}

impl Default for IncrementalJsonParser {
    fn default() -> Self {
        Self::new()
    }
}
