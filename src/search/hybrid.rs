//! Multi-query BM25 with an optional semantic re-rank.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SearchConfig;
use crate::error::{IndexerError, Result};
use crate::search::bm25::Bm25Index;
use crate::search::embedding::{cosine_similarity, EmbeddingClient};
use crate::search::{top_hits, SearchCapability, SearchHit, SearchProvider};

/// Lexical candidates considered for re-ranking, per requested hit.
const CANDIDATE_FACTOR: usize = 5;

pub struct HybridProvider {
    bm25: Arc<Bm25Index>,
    embeddings: Option<EmbeddingClient>,
    semantic_weight: f64,
}

impl HybridProvider {
    pub fn new(bm25: Arc<Bm25Index>, embeddings: Option<EmbeddingClient>, semantic_weight: f64) -> Self {
        Self {
            bm25,
            embeddings,
            semantic_weight: semantic_weight.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &SearchConfig, bm25: Arc<Bm25Index>) -> Result<Self> {
        let embeddings = EmbeddingClient::from_config(config)?;
        if embeddings.is_none() {
            tracing::debug!("No embedding endpoint configured; hybrid search is lexical only");
        }
        Ok(Self::new(bm25, embeddings, config.semantic_weight))
    }

    /// BM25 run per sub-query, summed per document.
    pub fn lexical_scores(&self, queries: &[String]) -> Vec<f64> {
        let mut total = vec![0.0; self.bm25.len()];
        for query in queries {
            for (sum, score) in total.iter_mut().zip(self.bm25.scores(query)) {
                *sum += score;
            }
        }
        total
    }

    async fn rerank(
        &self,
        client: &EmbeddingClient,
        queries: &[String],
        lexical: &[f64],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let candidates = top_hits(self.bm25.documents(), lexical, limit * CANDIDATE_FACTOR);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let positions: Vec<usize> = candidates
            .iter()
            .filter_map(|hit| self.bm25.documents().iter().position(|d| d.fqn == hit.fqn))
            .collect();
        let mut texts = vec![queries.join("\n")];
        texts.extend(positions.iter().map(|&i| self.bm25.documents()[i].text.clone()));

        let vectors = client.embed(&texts).await?;
        let (query_vector, document_vectors) = vectors
            .split_first()
            .ok_or_else(|| IndexerError::Embedding("empty embedding response".to_string()))?;

        let max_lexical = candidates
            .iter()
            .map(|h| h.score)
            .fold(0.0_f64, f64::max);
        let mut blended: Vec<SearchHit> = candidates
            .into_iter()
            .zip(document_vectors)
            .map(|(mut hit, vector)| {
                let lexical = if max_lexical > 0.0 { hit.score / max_lexical } else { 0.0 };
                let semantic = cosine_similarity(query_vector, vector);
                hit.score = (1.0 - self.semantic_weight) * lexical + self.semantic_weight * semantic;
                hit
            })
            .collect();

        blended.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.fqn.cmp(&b.fqn)));
        blended.truncate(limit);
        Ok(blended)
    }
}

#[async_trait]
impl SearchProvider for HybridProvider {
    fn capability(&self) -> SearchCapability {
        SearchCapability::Hybrid
    }

    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        let lexical = self.lexical_scores(queries);
        match &self.embeddings {
            Some(client) => self.rerank(client, queries, &lexical, limit).await,
            None => Ok(top_hits(self.bm25.documents(), &lexical, limit)),
        }
    }
}
