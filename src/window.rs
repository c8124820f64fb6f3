//! Bounded sliding window over recent child output.

/// Reference bound, in characters.
pub const DEFAULT_WINDOW_CHARS: usize = 4096;

/// Longest UTF-8 encoding; a carried partial sequence is always shorter.
const MAX_UTF8_LEN: usize = 4;

/// Most recent decoded output, truncated from the front once it exceeds
/// `capacity` characters. Always a suffix of everything pushed.
#[derive(Debug, Clone)]
pub struct OutputWindow {
    text: String,
    chars: usize,
    capacity: usize,
    partial: Vec<u8>,
}

impl OutputWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity.min(DEFAULT_WINDOW_CHARS) * 2),
            chars: 0,
            capacity,
            partial: Vec::with_capacity(MAX_UTF8_LEN),
        }
    }

    /// Decode a raw chunk and append it.
    ///
    /// An incomplete UTF-8 sequence at the end of `bytes` is held back until
    /// the next chunk completes it; invalid bytes become U+FFFD.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut combined = std::mem::take(&mut self.partial);
        combined.extend_from_slice(bytes);
        let complete = complete_prefix_len(&combined);
        self.partial = combined.split_off(complete);
        let decoded = String::from_utf8_lossy(&combined).into_owned();
        self.push_str(&decoded);
    }

    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        self.chars += text.chars().count();
        if self.chars > self.capacity {
            let excess = self.chars - self.capacity;
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map_or(self.text.len(), |(idx, _)| idx);
            self.text.drain(..cut);
            self.chars = self.capacity;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn len_chars(&self) -> usize {
        self.chars
    }

    /// Last `n` characters, used for diagnostics.
    pub fn tail(&self, n: usize) -> &str {
        if self.chars <= n {
            return &self.text;
        }
        let skip = self.chars - n;
        let start = self
            .text
            .char_indices()
            .nth(skip)
            .map_or(self.text.len(), |(idx, _)| idx);
        &self.text[start..]
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
        self.partial.clear();
    }
}

/// Length of `bytes` without a trailing, possibly-incomplete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let floor = len.saturating_sub(MAX_UTF8_LEN - 1);
    for start in (floor..len).rev() {
        let byte = bytes[start];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return len,
        };
        if len - start < needed && std::str::from_utf8(&bytes[start..]).is_err() {
            return start;
        }
        return len;
    }
    len
}
