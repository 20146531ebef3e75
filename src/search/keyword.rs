use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::search::{query_tokens, top_hits, SearchCapability, SearchDocument, SearchHit, SearchProvider};

/// Scores each document by how many distinct query tokens it contains.
pub struct KeywordProvider {
    documents: Arc<Vec<SearchDocument>>,
    token_sets: Vec<HashSet<String>>,
}

impl KeywordProvider {
    pub fn new(documents: Arc<Vec<SearchDocument>>) -> Self {
        let token_sets = documents
            .iter()
            .map(|d| d.tokens.iter().cloned().collect())
            .collect();
        Self {
            documents,
            token_sets,
        }
    }

    pub fn scores(&self, queries: &[String]) -> Vec<f64> {
        let tokens = query_tokens(queries);
        self.token_sets
            .iter()
            .map(|set| tokens.iter().filter(|t| set.contains(*t)).count() as f64)
            .collect()
    }
}

#[async_trait]
impl SearchProvider for KeywordProvider {
    fn capability(&self) -> SearchCapability {
        SearchCapability::Keyword
    }

    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        Ok(top_hits(&self.documents, &self.scores(queries), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::EntityKind;

    fn provider() -> KeywordProvider {
        KeywordProvider::new(Arc::new(vec![
            SearchDocument::new("pkg.tools.ToolConfig", EntityKind::Class, None, None, None),
            SearchDocument::new("pkg.tools.Tool", EntityKind::Class, None, Some("A callable tool."), None),
            SearchDocument::new("pkg.agents.Agent", EntityKind::Class, None, None, None),
        ]))
    }

    #[tokio::test]
    async fn test_ranked_by_match_count() {
        let hits = provider().search(&["tool config".to_string()], 10).await.unwrap();
        let fqns: Vec<_> = hits.iter().map(|h| h.fqn.as_str()).collect();
        assert_eq!(fqns, vec!["pkg.tools.ToolConfig", "pkg.tools.Tool"]);
        assert_eq!(hits[0].score, 2.0);
        assert_eq!(hits[1].score, 1.0);
    }

    #[tokio::test]
    async fn test_no_match_is_empty() {
        let hits = provider().search(&["database".to_string()], 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_limit() {
        let hits = provider().search(&["pkg".to_string()], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
