//! Vector storage for similarity retrieval.
//!
//! One [`VectorBackend`] trait abstracts the persistence layer; the SQLite
//! implementation lives in [`sqlite`]. Records come in two families: document
//! records (one per indexed candidate URL, no scope) and page-chunk records
//! (grouped under a per-page scope key derived from the source URL, so
//! retrieval can stay inside one page without scanning the rest).
//!
//! Keys are content-addressed (same content, same key), which makes
//! concurrent last-write-wins upserts idempotent.

pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::AssistError;

pub use sqlite::SqliteVectorStore;

/// Partition key grouping all chunk records of one page.
pub fn page_scope(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// Content-addressed record key for one chunk of one page.
pub fn chunk_key(url: &str, content: &str) -> String {
    let mut material = String::with_capacity(url.len() + content.len() + 1);
    material.push_str(url);
    material.push('\n');
    material.push_str(content);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, material.as_bytes()).to_string()
}

/// Record key for a whole candidate document URL.
pub fn document_key(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// A persisted `(key, vector, payload)` tuple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub key: String,
    pub url: String,
    /// Page partition for chunk records; `None` for document records.
    pub scope: Option<String>,
    /// Chunk text for page-chunk records; document records carry none.
    pub content: Option<String>,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    /// Document record: one per indexed candidate URL.
    pub fn document(url: impl Into<String>, embedding: Vec<f32>) -> Self {
        let url = url.into();
        Self {
            key: document_key(&url),
            scope: None,
            content: None,
            url,
            embedding,
        }
    }

    /// Page-chunk record, partitioned under its page's scope.
    pub fn page_chunk(
        url: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let url = url.into();
        let content = content.into();
        Self {
            key: chunk_key(&url, &content),
            scope: Some(page_scope(&url)),
            content: Some(content),
            url,
            embedding,
        }
    }
}

/// One similarity-search result.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub content: Option<String>,
    pub similarity: f32,
}

/// Storage backend contract.
///
/// `put` upserts by key and is independently durable per record; `search`
/// returns results ordered by similarity descending, ties broken by insertion
/// order. A `scope` of `Some` restricts candidates to one page partition;
/// `None` searches the document-record family.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn put(&self, record: VectorRecord) -> Result<(), AssistError>;

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<SearchHit>, AssistError>;

    async fn count(&self, scope: Option<&str>) -> Result<usize, AssistError>;
}

/// Cosine similarity over defensively re-normalized vectors.
///
/// Storage-time vectors are already unit length, but normalization here
/// protects ranking if that invariant is ever violated upstream. Zero-norm
/// vectors yield 0, never a division error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}
