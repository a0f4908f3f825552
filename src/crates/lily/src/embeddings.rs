//! Embedding storage and cosine search.
//!
//! Vectors live in a sidecar table keyed by decision id, encoded as
//! little-endian f32 blobs. Search embeds the query, scans every vector
//! stored under the configured model, and returns the top-k cosine matches
//! above a threshold. All external failures degrade to "no vectors" rather
//! than propagating.

use crate::error::Result;
use crate::repositories::{DecisionRepository, VectorRepository};
use llm::{HealthStatus, LocalLlmConfig, OllamaClient};
use std::time::Duration;
use tracing::{debug, warn};

/// Pause between backfill embeddings so a large store does not saturate the
/// embedding service.
const BACKFILL_PAUSE: Duration = Duration::from_millis(200);

/// Rows considered per backfill run.
const BACKFILL_BATCH: i64 = 200;

/// A semantic search hit.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub decision_id: String,
    pub similarity: f32,
    pub content: String,
}

/// Encode an embedding as a little-endian f32 byte sequence.
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a little-endian f32 byte sequence; trailing partial floats are
/// dropped.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Standard cosine similarity. Mismatched dimensions or a zero-norm operand
/// yield 0.
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
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embedding client plus vector persistence.
#[derive(Clone)]
pub struct EmbeddingService {
    client: OllamaClient,
    vectors: VectorRepository,
    decisions: DecisionRepository,
    model: String,
}

impl EmbeddingService {
    pub fn new(
        base_url: &str,
        model: &str,
        vectors: VectorRepository,
        decisions: DecisionRepository,
    ) -> Self {
        Self {
            client: OllamaClient::new(LocalLlmConfig::new(base_url, model)),
            vectors,
            decisions,
            model: model.to_string(),
        }
    }

    /// One availability probe with a short timeout.
    pub async fn health(&self) -> HealthStatus {
        self.client.health().await
    }

    /// Compute an embedding; any failure logs and yields `None`.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.client.embed(text).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                None
            }
        }
    }

    /// Compute and upsert the vector for a decision. Returns whether a
    /// vector was stored.
    pub async fn store(&self, decision_id: &str, text: &str) -> bool {
        let Some(embedding) = self.embed(text).await else {
            return false;
        };
        let encoded = encode_embedding(&embedding);
        match self
            .vectors
            .upsert(decision_id, text, &encoded, &self.model)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, decision_id = %decision_id, "failed to store vector");
                false
            }
        }
    }

    /// Embed every decision still lacking a vector, rate-limited.
    pub async fn backfill(&self) -> Result<usize> {
        let pending = self.decisions.missing_vectors(BACKFILL_BATCH).await?;
        let mut stored = 0;
        for decision in &pending {
            let text = decision
                .fact_value
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| decision.description.clone());
            if text.is_empty() {
                continue;
            }
            if self.store(&decision.id, &text).await {
                stored += 1;
            }
            tokio::time::sleep(BACKFILL_PAUSE).await;
        }
        debug!(stored, pending = pending.len(), "vector backfill pass finished");
        Ok(stored)
    }

    /// Top-k cosine matches above `threshold` for the query text.
    pub async fn search(&self, query: &str, k: usize, threshold: f32) -> Vec<SemanticHit> {
        let Some(query_vec) = self.embed(query).await else {
            return Vec::new();
        };

        let rows = match self.vectors.all_for_model(&self.model).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "vector scan failed");
                return Vec::new();
            }
        };

        let mut hits: Vec<SemanticHit> = rows
            .into_iter()
            .filter_map(|row| {
                let stored = decode_embedding(&row.embedding);
                let similarity = cosine_similarity(&query_vec, &stored);
                (similarity >= threshold).then_some(SemanticHit {
                    decision_id: row.decision_id,
                    similarity,
                    content: row.content,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_codec_round_trip() {
        let original = vec![0.25f32, -1.5, 3.75, 0.0];
        assert_eq!(decode_embedding(&encode_embedding(&original)), original);
    }

    #[test]
    fn test_decode_drops_trailing_partial() {
        let mut bytes = encode_embedding(&[1.0, 2.0]);
        bytes.push(0xFF);
        assert_eq!(decode_embedding(&bytes).len(), 2);
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.5f32, 0.5, 0.7];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_or_zero_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-6);
    }
}
