//! Okapi BM25 over the tokenized documents of one loaded index.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::search::{tokenize_identifier, top_hits, SearchCapability, SearchDocument, SearchHit, SearchProvider};

/// In-memory inverted index, built once per loaded index.
pub struct Bm25Index {
    documents: Arc<Vec<SearchDocument>>,
    postings: HashMap<String, Vec<(usize, u32)>>,
    lengths: Vec<u32>,
    average_length: f64,
    k1: f64,
    b: f64,
}

impl Bm25Index {
    pub fn new(documents: Arc<Vec<SearchDocument>>, k1: f64, b: f64) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut lengths = Vec::with_capacity(documents.len());

        for (doc, document) in documents.iter().enumerate() {
            let mut frequencies: HashMap<&str, u32> = HashMap::new();
            for token in &document.tokens {
                *frequencies.entry(token.as_str()).or_insert(0) += 1;
            }
            for (token, tf) in frequencies {
                postings.entry(token.to_string()).or_default().push((doc, tf));
            }
            lengths.push(document.tokens.len() as u32);
        }

        let average_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().map(|l| *l as f64).sum::<f64>() / lengths.len() as f64
        };

        Self {
            documents,
            postings,
            lengths,
            average_length,
            k1,
            b,
        }
    }

    pub fn documents(&self) -> &[SearchDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn idf(&self, document_frequency: usize) -> f64 {
        let n = self.documents.len() as f64;
        let df = document_frequency as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score of every document for one query string.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0; self.documents.len()];
        let mut tokens = tokenize_identifier(query);
        tokens.sort();
        tokens.dedup();

        for token in &tokens {
            let Some(posting) = self.postings.get(token) else {
                continue;
            };
            let idf = self.idf(posting.len());
            for &(doc, tf) in posting {
                let tf = tf as f64;
                let length_ratio = if self.average_length > 0.0 {
                    self.lengths[doc] as f64 / self.average_length
                } else {
                    1.0
                };
                let norm = self.k1 * (1.0 - self.b + self.b * length_ratio);
                scores[doc] += idf * tf * (self.k1 + 1.0) / (tf + norm);
            }
        }
        scores
    }
}

pub struct Bm25Provider {
    index: Arc<Bm25Index>,
}

impl Bm25Provider {
    pub fn new(index: Arc<Bm25Index>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl SearchProvider for Bm25Provider {
    fn capability(&self) -> SearchCapability {
        SearchCapability::Bm25
    }

    /// Sub-queries are joined into one bag of words.
    async fn search(&self, queries: &[String], limit: usize) -> Result<Vec<SearchHit>> {
        let joined = queries.join(" ");
        Ok(top_hits(self.index.documents(), &self.index.scores(&joined), limit))
    }
}
