//! Overlapping text chunker.
//!
//! Splits extracted document text into passages sized for embedding and
//! retrieval. Adjacent passages share a fixed number of characters so a
//! sentence that straddles a boundary is still whole in at least one
//! passage.
//!
//! # Algorithm
//!
//! 1. Empty text yields no chunks; text of at most `max_chars` characters
//!    yields exactly one chunk equal to the input.
//! 2. Otherwise slide a window of `max_chars` characters over the text.
//! 3. Unless the window reaches the end of the text, snap its end back to
//!    the last newline in the back half of the window, or failing that the
//!    last whitespace. With neither, hard-split at `max_chars`.
//! 4. Start the next window `overlap_chars` characters before the previous
//!    end.
//!
//! Lengths are counted in `char`s, so multi-byte UTF-8 text is never split
//! inside a code point. Chunks are not trimmed; the shared overlap is exact.
//!
//! # Example
//!
//! ```rust
//! use docent_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(1000, 200).unwrap();
//! let chunks = chunker.chunk("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use crate::error::{Error, Result};

/// Default passage length in characters.
pub const DEFAULT_MAX_CHARS: usize = 1000;
/// Default characters shared by adjacent passages.
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

/// Deterministic, stateless chunker configured with a size and an overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

impl Chunker {
    /// # Errors
    ///
    /// [`Error::Validation`] if `max_chars` is zero or `overlap_chars` is
    /// not strictly smaller than `max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::Validation("chunk max_chars must be > 0".into()));
        }
        if overlap_chars >= max_chars {
            return Err(Error::Validation(format!(
                "chunk overlap_chars ({}) must be smaller than max_chars ({})",
                overlap_chars, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split `text` into ordered passages.
    ///
    /// # Guarantees
    ///
    /// - `chunk("")` is empty.
    /// - No chunk exceeds `max_chars` characters.
    /// - The last `overlap_chars` characters of chunk `i` are the first
    ///   `overlap_chars` characters of chunk `i + 1`.
    /// - Concatenating the chunks with their overlaps removed reproduces
    ///   `text`.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total <= self.max_chars {
            return vec![text.to_string()];
        }

        // Byte offset of every char boundary, including the end of the text.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.max_chars).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.soft_end(&chars, start, hard_end)
            };

            chunks.push(text[offsets[start]..offsets[end]].to_string());

            if end == total {
                break;
            }
            // end > start + overlap_chars, so every step makes progress.
            start = end - self.overlap_chars;
        }

        chunks
    }

    /// Pick a window end in `[floor, hard_end]` that falls just after a
    /// newline or whitespace, where `floor` keeps the step size sane.
    fn soft_end(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + (self.overlap_chars + 1).max(self.max_chars / 2);
        let lo = floor - 1;
        if lo >= hard_end {
            return hard_end;
        }

        let window = &chars[lo..hard_end];
        window
            .iter()
            .rposition(|&c| c == '\n')
            .or_else(|| window.iter().rposition(|c| c.is_whitespace()))
            .map(|pos| lo + pos + 1)
            .unwrap_or(hard_end)
    }
}
