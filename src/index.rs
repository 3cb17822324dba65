//! Embedding-backed document index.
//!
//! [`build_index`] embeds chunk texts in configurable batches through the
//! retry client and returns a [`DocumentIndex`] supporting brute-force
//! cosine top-k retrieval. A batch that fails after retries fails the whole
//! build — no partial index is ever returned.

use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::ChunkRecord;

struct IndexEntry {
    chunk_id: String,
    vector: Vec<f32>,
}

/// Similarity index over a session's chunks. Built once per ingest, queried
/// many times; immutable after construction.
pub struct DocumentIndex {
    entries: Vec<IndexEntry>,
}

impl DocumentIndex {
    /// An index with no entries.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Top-`k` chunk ids by cosine similarity to `query_vector`, ranked
    /// descending.
    pub fn query(&self, query_vector: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.chunk_id.clone(),
                    cosine_similarity(query_vector, &entry.vector),
                )
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Embed all chunk texts and build the index. Batches of `batch_size` are
/// sent through the retry client; the chunk ids must already be assigned.
pub async fn build_index(
    client: &ApiClient,
    chunks: &[ChunkRecord],
    batch_size: usize,
) -> Result<DocumentIndex, ApiError> {
    let mut entries = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = client.embed(&texts).await?;
        debug!(batch = batch.len(), "Embedded chunk batch");

        for (chunk, vector) in batch.iter().zip(vectors) {
            entries.push(IndexEntry {
                chunk_id: chunk.id.clone(),
                vector,
            });
        }
    }

    Ok(DocumentIndex { entries })
}

/// Cosine similarity in [-1, 1]; 0.0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
