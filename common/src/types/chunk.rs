use std::ops::Range;

use serde::{Deserialize, Serialize};

/// How a chunk boundary was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Paragraph,
    Sentence,
    Clause,
    /// Emitted when a single sentence exceeded the size limit and had to be
    /// cut at a clause marker or word boundary.
    Forced,
}

/// One piece of the source text. Chunks of a segmentation form a contiguous,
/// non-overlapping cover of the source; `text` is an exact slice of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub byte_range: Range<usize>,
    pub kind: ChunkKind,
}

/// Complete chunker output: the chunks plus the inter-chunk separators the
/// chunker declares (the whitespace between consecutive chunks in the source).
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub chunks: Vec<Chunk>,
    /// `separators.len() == chunks.len().saturating_sub(1)`.
    pub separators: Vec<String>,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Re-concatenate chunk texts and separators. Equals the source text
    /// character-for-character.
    pub fn reconstruct(&self) -> String {
        let mut out = String::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                if let Some(sep) = self.separators.get(i - 1) {
                    out.push_str(sep);
                }
            }
            out.push_str(&chunk.text);
        }
        out
    }
}

/// Outcome of translating one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTranslation {
    pub index: usize,
    pub text: String,
    pub confidence: Option<f32>,
    pub elapsed_ms: u64,
    /// Set when the chunk exhausted its retries and fell back to source text.
    pub error: Option<String>,
}

impl ChunkTranslation {
    pub const fn failed(&self) -> bool {
        self.error.is_some()
    }
}
