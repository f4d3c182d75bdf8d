//! Sliding-window chunking of cleaned document text.
//!
//! A window of `size` characters advances by `size - overlap`. The last
//! window may be shorter; nothing is padded. Offsets and lengths count
//! `char`s, so a window never splits a code point.
//!
//! ```text
//! text   |0 ─────────────────────────────────────────── 250|
//! chunk0 |0 ──────── 100|
//! chunk1          |80 ──────── 180|
//! chunk2                   |160 ──────────── 250|
//! ```

use crate::error::PipelineError;
use crate::model::Chunk;
use tracing::debug;

/// Split `text` into overlapping chunks.
///
/// # Errors
/// [`PipelineError::ChunkConfig`] when `size == 0` or `overlap >= size`.
/// Empty text is not an error: it yields no chunks.
pub fn chunk(
    company: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, PipelineError> {
    if size == 0 || overlap >= size {
        return Err(PipelineError::ChunkConfig { size, overlap });
    }

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let step = size - overlap;
    let mut chunks = Vec::with_capacity(len.div_ceil(step));
    let mut start = 0usize;

    while start < len {
        let end = (start + size).min(len);
        chunks.push(Chunk {
            company: company.to_string(),
            index: chunks.len(),
            start,
            text: text[bounds[start]..bounds[end]].to_string(),
        });
        if end == len {
            break;
        }
        start += step;
    }

    debug!(company, chars = len, chunks = chunks.len(), size, overlap, "chunked document");
    Ok(chunks)
}

/// Rebuild the document text from its chunks by dropping each chunk's
/// prefix that the previous chunk already covered.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for c in chunks {
        let skip = covered.saturating_sub(c.start);
        out.extend(c.text.chars().skip(skip));
        covered = covered.max(c.start + c.text.chars().count());
    }
    out
}
