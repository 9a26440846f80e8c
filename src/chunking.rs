//! Chunking utilities for splitting file text into overlapping segments.
//!
//! Windows are measured in characters. A window that would end inside the
//! text is pulled back to the nearest newline, sentence end, or space so
//! chunks rarely cut through a token; the next window then starts
//! `overlap` characters before the cut.

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Upper bound on chunks kept per file.
pub const MAX_CHUNKS_PER_FILE: usize = 200;

/// Separators tried in order when looking for a clean cut.
const SEPARATORS: &[&str] = &["\n", ". ", " "];

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use srcbert::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// let (chunks, dropped) = config.split("Hello, world!");
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(dropped, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
    /// Chunks beyond this count are dropped.
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            max_chunks: MAX_CHUNKS_PER_FILE,
        }
    }
}

impl ChunkingConfig {
    /// Split `text` and apply the per-file cap.
    ///
    /// Returns the kept chunks and how many were dropped by the cap.
    pub fn split(&self, text: &str) -> (Vec<Chunk>, usize) {
        let mut chunks = chunk_text(text, self.chunk_size, self.overlap);
        let dropped = chunks.len().saturating_sub(self.max_chunks);
        chunks.truncate(self.max_chunks);
        (chunks, dropped)
    }
}

/// A chunk of text from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Byte offset where this chunk starts in the original document.
    pub start_offset: usize,
}

/// Split text into overlapping chunks.
///
/// Empty input yields no chunks; input no longer than `chunk_size` yields a
/// single chunk equal to the input. Consecutive chunks share exactly
/// `overlap` characters, so dropping the first `overlap` characters of
/// every chunk after the first and concatenating reproduces the input.
///
/// `overlap` is clamped below `chunk_size` so the cursor always advances.
///
/// # Examples
///
/// ```
/// use srcbert::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 1000, 200);
/// assert!(chunks.len() >= 2);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < char_count {
        let mut end = (start + chunk_size).min(char_count);
        if end < char_count
            && let Some(cut) =
                find_break(text, &char_to_byte, start, start + overlap, end)
        {
            end = cut;
        }

        let start_byte = char_to_byte[start];
        chunks.push(Chunk {
            text: text[start_byte..char_to_byte[end]].to_string(),
            index: chunks.len(),
            start_offset: start_byte,
        });

        if end >= char_count {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the last separator lying entirely within chars `[from, to)` and
/// return the char position just past it, provided that position leaves the
/// chunk non-empty.
fn find_break(
    text: &str,
    char_to_byte: &[usize],
    start: usize,
    from: usize,
    to: usize,
) -> Option<usize> {
    let from_byte = char_to_byte[from];
    let region = &text[from_byte..char_to_byte[to]];

    SEPARATORS.iter().find_map(|sep| {
        let found = from_byte + region.rfind(sep)?;
        let sep_char = char_to_byte.binary_search(&found).ok()?;
        (sep_char > start).then(|| sep_char + sep.chars().count())
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&chunk.text);
            } else {
                out.extend(chunk.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks =
            chunk_text("short text", DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn long_text_multiple_chunks() {
        let text =
            "The quick brown fox jumps over the lazy dog again and again.";
        let chunks = chunk_text(text, 20, 5);

        assert!(chunks.len() >= 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(!c.text.is_empty());
        }
        let combined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for word in text.split_whitespace() {
            assert!(combined.contains(word), "lost word {word}");
        }
    }

    #[test]
    fn prefers_separators_over_raw_cut() {
        let text = "hello world foo bar baz qux";
        let chunks = chunk_text(text, 15, 3);
        // First window is "hello world foo"; the last space past the
        // overlap region is before "foo".
        assert_eq!(chunks[0].text, "hello world ");
    }

    #[test]
    fn newline_preferred_over_space() {
        let text = "alpha beta\ngamma delta epsilon";
        let chunks = chunk_text(text, 20, 2);
        assert_eq!(chunks[0].text, "alpha beta\n");
    }

    #[test]
    fn chunks_overlap_by_configured_amount() {
        let text = "a".repeat(3000);
        let chunks = chunk_text(&text, 1000, 200);

        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].start_offset, 800);
        assert_eq!(reassemble(&chunks, 200), text);
    }

    #[test]
    fn overlap_larger_than_chunk_is_clamped() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, 3, 10);
        assert!(!chunks.is_empty());
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, 100, 20);

        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks, 20), text);
    }

    #[test]
    fn split_caps_chunk_count() {
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 0,
            max_chunks: 3,
        };
        let (chunks, dropped) = config.split(&"x".repeat(100));
        assert_eq!(chunks.len(), 3);
        assert_eq!(dropped, 7);
    }

    proptest! {
        #[test]
        fn reassembly_reproduces_input(
            text in "[a-z .\n]{0,400}",
            chunk_size in 1usize..80,
            overlap in 0usize..40,
        ) {
            let chunks = chunk_text(&text, chunk_size, overlap);
            let effective = overlap.min(chunk_size.max(1) - 1);
            prop_assert_eq!(reassemble(&chunks, effective), text.clone());
            for c in &chunks {
                prop_assert!(c.text.chars().count() <= chunk_size.max(1));
            }
        }

        #[test]
        fn short_input_is_one_chunk(text in "[a-z ]{1,50}") {
            let chunks = chunk_text(&text, 50, 10);
            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(&chunks[0].text, &text);
        }
    }
}
