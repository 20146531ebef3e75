//! Retrieval over a loaded index: keyword, BM25 and hybrid providers tried
//! in order until one succeeds.

pub mod bm25;
pub mod embedding;
pub mod hybrid;
pub mod keyword;
pub mod tokenize;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::{IndexerError, Result};
use crate::index::{EntityKind, Index};

pub use bm25::{Bm25Index, Bm25Provider};
pub use embedding::EmbeddingClient;
pub use hybrid::HybridProvider;
pub use keyword::KeywordProvider;
pub use tokenize::{query_tokens, tokenize_identifier, tokenize_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCapability {
    Keyword,
    Bm25,
    Hybrid,
}

impl SearchCapability {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Some(SearchCapability::Keyword),
            "bm25" => Some(SearchCapability::Bm25),
            "hybrid" => Some(SearchCapability::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchCapability::Keyword => "keyword",
            SearchCapability::Bm25 => "bm25",
            SearchCapability::Hybrid => "hybrid",
        }
    }

    /// Strategies tried, in order, when this one is configured.
    pub fn fallback_chain(&self) -> &'static [SearchCapability] {
        match self {
            SearchCapability::Hybrid => &[
                SearchCapability::Hybrid,
                SearchCapability::Bm25,
                SearchCapability::Keyword,
            ],
            SearchCapability::Bm25 => &[SearchCapability::Bm25, SearchCapability::Keyword],
            SearchCapability::Keyword => &[SearchCapability::Keyword],
        }
    }
}

impl std::fmt::Display for SearchCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokenized view of one ranked target or member, rebuilt on every load.
#[derive(Debug, Clone)]
pub struct SearchDocument {
    pub fqn: String,
    pub kind: EntityKind,
    pub snippet: String,
    /// Identifier and docstring tokens, with repetition
    pub tokens: Vec<String>,
    /// Plain text sent to an embedding backend
    pub text: String,
}

impl SearchDocument {
    pub fn new(
        fqn: &str,
        kind: EntityKind,
        signature: Option<&str>,
        summary: Option<&str>,
        docstring: Option<&str>,
    ) -> Self {
        let mut tokens = tokenize_identifier(fqn);
        if let Some(doc) = docstring.or(summary) {
            tokens.extend(tokenize_text(doc));
        }
        let snippet = summary
            .or(signature)
            .map(str::to_string)
            .unwrap_or_else(|| fqn.to_string());
        let text = match docstring.or(summary) {
            Some(doc) => format!("{}\n{}", fqn, doc),
            None => fqn.to_string(),
        };

        Self {
            fqn: fqn.to_string(),
            kind,
            snippet,
            tokens,
            text,
        }
    }

    /// Documents for every ranked target followed by its members, in rank order.
    pub fn from_index(index: &Index) -> Vec<SearchDocument> {
        let mut documents = Vec::new();
        for target in &index.targets {
            documents.push(SearchDocument::new(
                &target.fqn,
                target.entity.kind,
                target.entity.signature.as_deref(),
                target.summary.as_deref(),
                target.entity.docstring.as_deref(),
            ));
            for member in &target.members {
                documents.push(SearchDocument::new(
                    &member.fqn,
                    member.kind,
                    member.signature.as_deref(),
                    member.summary.as_deref(),
                    None,
                ));
            }
        }
        documents
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub fqn: String,
    pub kind: EntityKind,
    pub score: f64,
    pub snippet: String,
}

impl SearchHit {
    pub fn from_document(document: &SearchDocument, score: f64) -> Self {
        Self {
            fqn: document.fqn.clone(),
            kind: document.kind,
            score,
            snippet: document.snippet.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Strategy that produced every hit in this response
    pub provider: SearchCapability,
    pub hits: Vec<SearchHit>,
    /// Strategies that failed before `provider` succeeded
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn capability(&self) -> SearchCapability;

    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>>;
}

/// Keeps hits with a positive score, best first. Ties keep document order.
pub(crate) fn top_hits(documents: &[SearchDocument], scores: &[f64], limit: usize) -> Vec<SearchHit> {
    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| *score > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(i, score)| SearchHit::from_document(&documents[i], score))
        .collect()
}

/// Ordered provider list; the first provider that succeeds answers the query.
pub struct SearchCascade {
    providers: Vec<Box<dyn SearchProvider>>,
}

impl SearchCascade {
    pub fn from_providers(providers: Vec<Box<dyn SearchProvider>>) -> Self {
        Self { providers }
    }

    /// Builds the chain for the configured capability. A strategy that cannot
    /// be constructed (e.g. missing embedding credential) is logged and left out.
    pub fn build(config: &SearchConfig, documents: Arc<Vec<SearchDocument>>) -> Result<Self> {
        let capability = config.capability()?;
        let bm25 = Arc::new(Bm25Index::new(documents.clone(), config.k1, config.b));
        let mut providers: Vec<Box<dyn SearchProvider>> = Vec::new();

        for step in capability.fallback_chain() {
            match step {
                SearchCapability::Hybrid => match HybridProvider::from_config(config, bm25.clone()) {
                    Ok(provider) => providers.push(Box::new(provider)),
                    Err(e) => tracing::warn!("Hybrid search unavailable, falling back: {}", e),
                },
                SearchCapability::Bm25 => providers.push(Box::new(Bm25Provider::new(bm25.clone()))),
                SearchCapability::Keyword => {
                    providers.push(Box::new(KeywordProvider::new(documents.clone())))
                }
            }
        }

        Ok(Self { providers })
    }

    pub fn capabilities(&self) -> Vec<SearchCapability> {
        self.providers.iter().map(|p| p.capability()).collect()
    }

    pub async fn search(&self, queries: &[String], limit: usize) -> Result<SearchResponse> {
        let queries: Vec<String> = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        let mut fallbacks = Vec::new();
        for provider in &self.providers {
            match provider.search(&queries, limit).await {
                Ok(hits) => {
                    return Ok(SearchResponse {
                        provider: provider.capability(),
                        hits,
                        fallbacks,
                    })
                }
                Err(e) => {
                    tracing::warn!("{} search failed, trying next provider: {}", provider.capability(), e);
                    fallbacks.push(format!("{}: {}", provider.capability(), e));
                }
            }
        }

        Err(IndexerError::Configuration(format!(
            "no search provider succeeded ({})",
            if fallbacks.is_empty() {
                "none configured".to_string()
            } else {
                fallbacks.join("; ")
            }
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl SearchProvider for Failing {
        fn capability(&self) -> SearchCapability {
            SearchCapability::Hybrid
        }

        async fn search(&self, _queries: &[String], _limit: usize) -> Result<Vec<SearchHit>> {
            Err(IndexerError::Embedding("backend unreachable".to_string()))
        }
    }

    fn documents() -> Arc<Vec<SearchDocument>> {
        Arc::new(vec![
            SearchDocument::new(
                "google.adk.tools.ToolConfig",
                EntityKind::Class,
                Some("class ToolConfig(BaseModel)"),
                Some("Configuration for a tool."),
                None,
            ),
            SearchDocument::new(
                "google.adk.agents.Agent",
                EntityKind::Class,
                Some("class Agent"),
                Some("An LLM agent."),
                None,
            ),
        ])
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(SearchCapability::from_str("BM25"), Some(SearchCapability::Bm25));
        assert_eq!(SearchCapability::from_str("vector"), None);
        assert_eq!(SearchCapability::Hybrid.fallback_chain().len(), 3);
    }

    #[test]
    fn test_document_snippet_prefers_summary() {
        let docs = documents();
        assert_eq!(docs[0].snippet, "Configuration for a tool.");
        let bare = SearchDocument::new("pkg.f", EntityKind::Function, Some("def f()"), None, None);
        assert_eq!(bare.snippet, "def f()");
    }

    #[tokio::test]
    async fn test_cascade_falls_through_failures() {
        let docs = documents();
        let cascade = SearchCascade::from_providers(vec![
            Box::new(Failing),
            Box::new(KeywordProvider::new(docs)),
        ]);

        let response = cascade.search(&["ToolConfig".to_string()], 5).await.unwrap();
        assert_eq!(response.provider, SearchCapability::Keyword);
        assert_eq!(response.hits[0].fqn, "google.adk.tools.ToolConfig");
        assert_eq!(response.fallbacks.len(), 1);
    }

    #[tokio::test]
    async fn test_cascade_with_only_failures_is_an_error() {
        let cascade = SearchCascade::from_providers(vec![Box::new(Failing)]);
        assert!(cascade.search(&["x".to_string()], 5).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_credential_serves_bm25() {
        let config = SearchConfig {
            embedding_endpoint: Some("http://127.0.0.1:9".to_string()),
            embedding_api_key_env: "API_INDEXER_TEST_UNSET_KEY".to_string(),
            ..SearchConfig::default()
        };
        let cascade = SearchCascade::build(&config, documents()).unwrap();
        assert_eq!(
            cascade.capabilities(),
            vec![SearchCapability::Bm25, SearchCapability::Keyword]
        );

        let response = cascade.search(&["ToolConfig".to_string()], 5).await.unwrap();
        assert_eq!(response.provider, SearchCapability::Bm25);
        assert_eq!(response.hits[0].fqn, "google.adk.tools.ToolConfig");
    }
}
