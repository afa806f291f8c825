//! Word-window text chunker.
//!
//! Splits extracted document text on whitespace and slides a window of
//! `chunk_size` words forward by `chunk_size - overlap` words. Every
//! non-empty window becomes a [`Chunk`], so consecutive chunks share
//! `overlap` words of context. Windows start at every multiple of the
//! stride below the word count, which means the tail of a document may
//! appear in a short trailing window as well as in its predecessor.
//!
//! Normalized content is computed here, once, so the lexical search path
//! never lowercases chunk text at query time.

use crate::models::{Chunk, Visibility};

/// Lowercase and trim, the normalization shared by chunks and queries.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Split `text` into overlapping word windows.
///
/// Returns chunks with contiguous indices starting at 0. Empty or
/// whitespace-only text yields no chunks. `overlap` is clamped below
/// `chunk_size` so the window always advances.
pub fn chunk_words(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
    category: &str,
    visibility: Visibility,
) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let stride = chunk_size - overlap.min(chunk_size - 1);

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let content = words[start..end].join(" ");
        if !content.is_empty() {
            chunks.push(Chunk {
                document_id: document_id.to_string(),
                chunk_index: chunks.len(),
                normalized_content: normalize(&content),
                content,
                category: category.to_string(),
                visibility,
            });
        }
        start += stride;
    }

    chunks
}
