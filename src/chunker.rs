//! Recursive separator-hierarchy text chunker.
//!
//! Splits text into [`DocumentChunk`]s of at most `chunk_size` characters,
//! preferring splits at coarse boundaries (paragraph break, line break,
//! sentence end, whitespace) and falling back to finer separators — finally
//! a hard character split — only when a piece still exceeds the limit.
//!
//! Each chunk after the first begins with up to `overlap` characters copied
//! from the end of the previous chunk, so context survives a boundary. All
//! sizes are measured in chars, never bytes, so splits are unicode-safe.

use crate::error::{RagError, Result};
use crate::models::DocumentChunk;

/// Coarse-to-fine separator hierarchy. A piece that exceeds the limit at one
/// level is re-split at the next; past the last level it is hard-split at
/// the character limit.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Fails with [`RagError::Config`] when `chunk_size` is zero or
    /// `overlap >= chunk_size`. Misconfiguration is rejected, not clamped.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".into()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Split `text` into ordered chunks. Non-empty text no longer than
    /// `chunk_size` chars yields exactly one chunk; empty text yields none.
    pub fn chunk(
        &self,
        text: &str,
        source_uri: &str,
        page_number: Option<u32>,
    ) -> Vec<DocumentChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        if char_len(text) <= self.chunk_size {
            return vec![DocumentChunk::new(
                text.to_string(),
                source_uri,
                page_number,
                0,
                0,
            )];
        }

        let pieces = split_pieces(text, 0, self.chunk_size);

        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut buf = String::new();
        let mut buf_len = 0usize;
        // Char offset of the buffer's start within `text`.
        let mut buf_offset = 0usize;
        // Char position in `text` just past the pieces consumed so far.
        let mut cursor = 0usize;

        for piece in &pieces {
            let piece_len = char_len(piece);

            if buf_len + piece_len > self.chunk_size && !buf.is_empty() {
                chunks.push(DocumentChunk::new(
                    std::mem::take(&mut buf),
                    source_uri,
                    page_number,
                    buf_offset,
                    chunks.len(),
                ));

                // Seed the next buffer with the previous chunk's tail. The
                // carry is capped so the next piece still fits the limit.
                let carry = self
                    .overlap
                    .min(buf_len)
                    .min(self.chunk_size.saturating_sub(piece_len));
                let flushed = &chunks.last().expect("just pushed").text;
                buf = tail_chars(flushed, carry).to_string();
                buf_offset = cursor - carry;
                buf_len = carry;
            }

            buf.push_str(piece);
            buf_len += piece_len;
            cursor += piece_len;
        }

        if !buf.is_empty() {
            let index = chunks.len();
            chunks.push(DocumentChunk::new(
                buf,
                source_uri,
                page_number,
                buf_offset,
                index,
            ));
        }

        chunks
    }
}

/// Split `text` into pieces of at most `max` chars, separators preserved so
/// that concatenating the pieces reproduces the input exactly.
fn split_pieces(text: &str, level: usize, max: usize) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }

    if level >= SEPARATORS.len() {
        return hard_split(text, max);
    }

    let parts: Vec<&str> = text.split_inclusive(SEPARATORS[level]).collect();
    if parts.len() == 1 {
        // Separator absent at this level; try the next-finer one.
        return split_pieces(text, level + 1, max);
    }

    let mut out = Vec::new();
    for part in parts {
        if char_len(part) <= max {
            out.push(part.to_string());
        } else {
            out.extend(split_pieces(part, level + 1, max));
        }
    }
    out
}

/// Last-resort split at exact char counts.
fn hard_split(text: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::with_capacity(max * 4);
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == max {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The final `n` chars of `s` as a subslice.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(s);
    if n >= total {
        return s;
    }
    let (idx, _) = s
        .char_indices()
        .nth(total - n)
        .expect("n < total char count");
    &s[idx..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_texts(chunker: &Chunker, text: &str) -> Vec<DocumentChunk> {
        chunker.chunk(text, "test", None)
    }

    #[test]
    fn short_text_single_chunk() {
        let chunker = Chunker::new(100, 10).unwrap();
        let chunks = chunk_texts(&chunker, "Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].char_offset, 0);
    }

    #[test]
    fn empty_text_no_chunks() {
        let chunker = Chunker::new(100, 10).unwrap();
        assert!(chunk_texts(&chunker, "").is_empty());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = Chunker::new(0, 0).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn overlap_ge_chunk_size_rejected() {
        assert!(matches!(
            Chunker::new(10, 10).unwrap_err(),
            RagError::Config(_)
        ));
        assert!(matches!(
            Chunker::new(10, 20).unwrap_err(),
            RagError::Config(_)
        ));
    }

    #[test]
    fn splits_on_paragraphs_first() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunker = Chunker::new(30, 0).unwrap();
        let chunks = chunk_texts(&chunker, text);
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.contains("First paragraph"));
        // No chunk exceeds the limit.
        for c in &chunks {
            assert!(c.text.chars().count() <= 30, "oversized chunk: {:?}", c.text);
        }
    }

    #[test]
    fn indices_contiguous_from_zero() {
        let text = (0..40)
            .map(|i| format!("Sentence number {i} right here."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = Chunker::new(80, 16).unwrap();
        let chunks = chunk_texts(&chunker, &text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn offsets_reconstruct_original() {
        // Dropping each chunk's leading overlap (prev_end - offset chars)
        // must reproduce the input exactly.
        let text = "Alpha beta gamma delta.\n\nEpsilon zeta eta theta.\n\nIota kappa lambda mu. Nu xi omicron pi, rho sigma tau upsilon. Phi chi psi omega.";
        let chunker = Chunker::new(40, 12).unwrap();
        let chunks = chunk_texts(&chunker, text);
        assert!(chunks.len() > 1);

        let mut rebuilt = String::new();
        let mut prev_end = 0usize;
        for c in &chunks {
            assert!(c.char_offset <= prev_end, "chunks must not leave gaps");
            let skip = prev_end - c.char_offset;
            rebuilt.extend(c.text.chars().skip(skip));
            prev_end = c.char_offset + c.text.chars().count();
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn overlap_carried_from_previous_chunk() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunker = Chunker::new(20, 6).unwrap();
        let chunks = chunk_texts(&chunker, text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].char_offset + pair[0].text.chars().count();
            let carried = prev_end - pair[1].char_offset;
            assert!(carried <= 6, "carried overlap exceeds configured overlap");
            // The carried prefix matches the previous chunk's tail.
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - carried)
                .collect();
            let prefix: String = pair[1].text.chars().take(carried).collect();
            assert_eq!(tail, prefix);
        }
    }

    #[test]
    fn long_unbroken_text_hard_splits() {
        let text = "x".repeat(1000);
        let chunker = Chunker::new(100, 0).unwrap();
        let chunks = chunk_texts(&chunker, &text);
        assert_eq!(chunks.len(), 10);
        for c in &chunks {
            assert_eq!(c.text.chars().count(), 100);
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllo wörld ".repeat(50);
        let chunker = Chunker::new(40, 8).unwrap();
        let chunks = chunk_texts(&chunker, &text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 40);
            assert!(c.text.is_char_boundary(0));
        }
    }

    #[test]
    fn deterministic() {
        let text = "alpha\n\nbeta\n\ngamma\n\ndelta epsilon zeta eta theta iota kappa";
        let chunker = Chunker::new(24, 4).unwrap();
        let a = chunk_texts(&chunker, text);
        let b = chunk_texts(&chunker, text);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.char_offset, y.char_offset);
        }
    }
}
